//! Cache configuration.
//!
//! Controls key derivation, timeouts and attribute snapshots via the
//! `[cache]` table of `cachet.toml`.

use std::collections::HashMap;
use std::time::Duration;

use super::keys::{KeyError, KeyTemplate, RequestKeyBuilder};

pub const DEFAULT_VIEW_CACHE_KEY_TPL: &str = "{prefix}:{endpoint}";
pub const DEFAULT_VIEW_CACHE_KEY_PREFIX: &str = "views";
pub const DEFAULT_VIEW_CACHE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Runtime cache options.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Template for request-derived keys.
    pub view_cache_key_tpl: KeyTemplate,
    /// Value substituted for `{prefix}`.
    pub view_cache_key_prefix: String,
    /// Default lifetime of cached responses.
    pub view_cache_timeout: Duration,
    /// Default lifetime of cached fragments; falls back to the view timeout.
    pub fragment_cache_timeout: Option<Duration>,
    /// Register the insert/update hooks that rotate version tags.
    pub auto_model_cache_key: bool,
    /// Attribute names to snapshot, keyed by model name.
    pub cache_model_attrs: HashMap<String, Vec<String>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            view_cache_key_tpl: KeyTemplate::default(),
            view_cache_key_prefix: DEFAULT_VIEW_CACHE_KEY_PREFIX.to_string(),
            view_cache_timeout: DEFAULT_VIEW_CACHE_TIMEOUT,
            fragment_cache_timeout: None,
            auto_model_cache_key: true,
            cache_model_attrs: HashMap::new(),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            view_cache_key_tpl: settings.view_cache_key_tpl.clone(),
            view_cache_key_prefix: settings.view_cache_key_prefix.clone(),
            view_cache_timeout: settings.view_cache_timeout,
            fragment_cache_timeout: settings.fragment_cache_timeout,
            auto_model_cache_key: settings.auto_model_cache_key,
            cache_model_attrs: settings.cache_model_attrs.clone(),
        }
    }
}

impl CacheConfig {
    /// Replace the key template, validating its placeholders.
    pub fn with_key_template(mut self, template: &str) -> Result<Self, KeyError> {
        self.view_cache_key_tpl = KeyTemplate::parse(template)?;
        Ok(self)
    }

    /// Snapshot attributes configured for a model name.
    ///
    /// Env sources lowercase their keys, so an exact match falls back to a
    /// case-insensitive one.
    pub fn snapshot_attrs(&self, model: &str) -> &[String] {
        self.cache_model_attrs
            .get(model)
            .or_else(|| {
                self.cache_model_attrs
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(model))
                    .map(|(_, attrs)| attrs)
            })
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Fragment lifetime: explicit, then fragment default, then view default.
    pub fn fragment_timeout(&self, explicit: Option<Duration>) -> Duration {
        explicit
            .or(self.fragment_cache_timeout)
            .unwrap_or(self.view_cache_timeout)
    }

    /// Response lifetime: explicit, then view default.
    pub fn view_timeout(&self, explicit: Option<Duration>) -> Duration {
        explicit.unwrap_or(self.view_cache_timeout)
    }

    pub fn request_key_builder(&self) -> RequestKeyBuilder {
        RequestKeyBuilder::new(
            self.view_cache_key_tpl.clone(),
            self.view_cache_key_prefix.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.view_cache_key_tpl.as_str(), "{prefix}:{endpoint}");
        assert_eq!(config.view_cache_key_prefix, "views");
        assert_eq!(config.view_cache_timeout, Duration::from_secs(3600));
        assert!(config.fragment_cache_timeout.is_none());
        assert!(config.auto_model_cache_key);
        assert!(config.cache_model_attrs.is_empty());
    }

    #[test]
    fn fragment_timeout_falls_back_to_view_timeout() {
        let config = CacheConfig::default();
        assert_eq!(config.fragment_timeout(None), Duration::from_secs(3600));
    }

    #[test]
    fn fragment_timeout_prefers_fragment_default() {
        let config = CacheConfig {
            fragment_cache_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        assert_eq!(config.fragment_timeout(None), Duration::from_secs(60));
        assert_eq!(
            config.fragment_timeout(Some(Duration::from_secs(5))),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn snapshot_attrs_for_unknown_model_is_empty() {
        let config = CacheConfig {
            cache_model_attrs: HashMap::from([(
                "Profile".to_string(),
                vec!["name".to_string()],
            )]),
            ..Default::default()
        };
        assert_eq!(config.snapshot_attrs("Profile"), ["name".to_string()]);
        assert_eq!(config.snapshot_attrs("PROFILE"), ["name".to_string()]);
        assert!(config.snapshot_attrs("Invoice").is_empty());
    }

    #[test]
    fn with_key_template_rejects_unknown_placeholders() {
        assert!(CacheConfig::default().with_key_template("{host}").is_err());
        let config = CacheConfig::default()
            .with_key_template("{prefix}:{method}:{path}")
            .expect("valid template");
        assert_eq!(config.view_cache_key_tpl.as_str(), "{prefix}:{method}:{path}");
    }
}
