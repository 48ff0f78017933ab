//! The model contract the caches rely on.

use std::fmt::Display;
use std::hash::Hash;

use serde::Serialize;
use serde_json::Value;

use crate::cache::VersionTag;

use super::error::DomainError;

/// A persisted domain object with dynamic field access.
///
/// Field access is explicit rather than reflective: partial proxies and
/// attribute snapshots address fields by name and exchange
/// [`serde_json::Value`]s.
pub trait Model: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + Display + Serialize + Send + Sync + 'static;

    /// Class name used in snapshot keys (`models_attrs:<NAME>:<pk>`) and in
    /// the `cache_model_attrs` configuration.
    const NAME: &'static str;

    /// Name of the identity attribute.
    const PK_FIELD: &'static str = "id";

    fn pk(&self) -> &Self::Id;

    /// Current version tag, absent until the first refresh.
    fn version_tag(&self) -> Option<&VersionTag>;

    fn set_version_tag(&mut self, tag: VersionTag);

    /// Read a field by name; `None` when the model has no such field.
    fn field(&self, name: &str) -> Option<Value>;

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), DomainError>;
}
