//! Cache key composition.
//!
//! Keys have the shape `[namespace:]base[:facet1:facet2...]`, with every
//! segment joined by `:`. Segments are not escaped: a `:` inside a facet name
//! or value can make two distinct inputs produce the same key.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display};
use std::str::FromStr;

use thiserror::Error;

const SEPARATOR: &str = ":";
const DEFAULT_TEMPLATE: &str = "{prefix}:{endpoint}";

/// Failure while composing a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("unknown placeholder `{{{name}}}` in key template `{template}`")]
    UnknownPlaceholder { name: String, template: String },
    #[error("unbalanced brace at byte {position} in key template `{template}`")]
    UnbalancedBrace { position: usize, template: String },
}

/// Base or namespace input: one value, or a sequence joined with `:`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyParts(Vec<String>);

impl KeyParts {
    pub fn new<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        Self(parts.into_iter().map(|part| part.to_string()).collect())
    }

    /// Joined form; an empty result counts as "absent".
    pub fn joined(&self) -> String {
        self.0.join(SEPARATOR)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(String::is_empty)
    }
}

impl From<&str> for KeyParts {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl From<String> for KeyParts {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<&String> for KeyParts {
    fn from(value: &String) -> Self {
        Self(vec![value.clone()])
    }
}

impl<T: Display> From<Vec<T>> for KeyParts {
    fn from(value: Vec<T>) -> Self {
        Self::new(value)
    }
}

impl<T: Display, const N: usize> From<[T; N]> for KeyParts {
    fn from(value: [T; N]) -> Self {
        Self::new(value)
    }
}

impl<T: Display> From<&[T]> for KeyParts {
    fn from(value: &[T]) -> Self {
        Self::new(value)
    }
}

/// Facets appended after the base segment.
///
/// `Values` are emitted verbatim in the given order. `Pairs` render as
/// `k=v`, in the order they were supplied. Converting from a `HashMap` keeps
/// whatever order that map iterates in, so callers who need stable keys
/// should pass an ordered sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Facets {
    Values(Vec<String>),
    Pairs(Vec<(String, String)>),
}

impl Facets {
    pub fn values<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        Self::Values(values.into_iter().map(|value| value.to_string()).collect())
    }

    pub fn pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Display,
        V: Display,
    {
        Self::Pairs(
            pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Values(values) => values.is_empty(),
            Self::Pairs(pairs) => pairs.is_empty(),
        }
    }

    /// Insert a leading facet. Mapping facets are rendered first.
    pub fn prepend(self, value: impl Display) -> Self {
        let mut segments = self.into_segments();
        segments.insert(0, value.to_string());
        Self::Values(segments)
    }

    pub fn into_segments(self) -> Vec<String> {
        match self {
            Self::Values(values) => values,
            Self::Pairs(pairs) => pairs
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
        }
    }
}

impl Default for Facets {
    fn default() -> Self {
        Self::Values(Vec::new())
    }
}

impl<T: Display> From<Vec<T>> for Facets {
    fn from(value: Vec<T>) -> Self {
        Self::values(value)
    }
}

impl<T: Display, const N: usize> From<[T; N]> for Facets {
    fn from(value: [T; N]) -> Self {
        Self::values(value)
    }
}

impl<K: Display, V: Display, S> From<HashMap<K, V, S>> for Facets {
    fn from(value: HashMap<K, V, S>) -> Self {
        Self::pairs(value)
    }
}

impl<K: Display, V: Display> From<BTreeMap<K, V>> for Facets {
    fn from(value: BTreeMap<K, V>) -> Self {
        Self::pairs(value)
    }
}

/// A fully composed cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Compose `[namespace:]base[:facets]`.
    pub fn build(
        base: impl Into<KeyParts>,
        namespace: Option<KeyParts>,
        facets: Option<Facets>,
    ) -> Self {
        let mut key = base.into().joined();

        if let Some(namespace) = namespace.filter(|ns| !ns.is_empty()) {
            key = format!("{}{SEPARATOR}{key}", namespace.joined());
        }

        if let Some(facets) = facets.filter(|facets| !facets.is_empty()) {
            key.push_str(SEPARATOR);
            key.push_str(&facets.into_segments().join(SEPARATOR));
        }

        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(value: CacheKey) -> Self {
        value.0
    }
}

/// Request metadata folded into request-derived keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Logical handler name (the matched route for HTTP requests).
    pub endpoint: String,
    pub path: String,
    pub method: String,
}

impl RequestInfo {
    pub fn new(
        endpoint: impl Into<String>,
        path: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            path: path.into(),
            method: method.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TemplateField {
    Prefix,
    Endpoint,
    Path,
    Method,
}

impl TemplateField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "prefix" => Some(Self::Prefix),
            "endpoint" => Some(Self::Endpoint),
            "path" => Some(Self::Path),
            "method" => Some(Self::Method),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(TemplateField),
}

/// A key template with `{prefix}`, `{endpoint}`, `{path}` and `{method}`
/// placeholders. `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl KeyTemplate {
    pub fn parse(source: &str) -> Result<Self, KeyError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((position, ch)) = chars.next() {
            match ch {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, inner) in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(KeyError::UnbalancedBrace {
                            position,
                            template: source.to_string(),
                        });
                    }
                    let field =
                        TemplateField::parse(&name).ok_or_else(|| KeyError::UnknownPlaceholder {
                            name,
                            template: source.to_string(),
                        })?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                }
                '}' => {
                    return Err(KeyError::UnbalancedBrace {
                        position,
                        template: source.to_string(),
                    });
                }
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn render(&self, prefix: &str, request: &RequestInfo) -> String {
        let mut out = String::with_capacity(self.source.len() + request.path.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(TemplateField::Prefix) => out.push_str(prefix),
                Segment::Field(TemplateField::Endpoint) => out.push_str(&request.endpoint),
                Segment::Field(TemplateField::Path) => out.push_str(&request.path),
                Segment::Field(TemplateField::Method) => out.push_str(&request.method),
            }
        }
        out
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl Default for KeyTemplate {
    /// `{prefix}:{endpoint}`
    fn default() -> Self {
        Self {
            source: DEFAULT_TEMPLATE.to_string(),
            segments: vec![
                Segment::Field(TemplateField::Prefix),
                Segment::Literal(SEPARATOR.to_string()),
                Segment::Field(TemplateField::Endpoint),
            ],
        }
    }
}

impl FromStr for KeyTemplate {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Display for KeyTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Builds request-derived keys from the configured template and prefix.
#[derive(Debug, Clone)]
pub struct RequestKeyBuilder {
    template: KeyTemplate,
    prefix: String,
}

impl RequestKeyBuilder {
    pub fn new(template: KeyTemplate, prefix: impl Into<String>) -> Self {
        Self {
            template,
            prefix: prefix.into(),
        }
    }

    /// Render `key` (or the configured template when `key` is absent or
    /// empty) against the request, then apply namespace and facets.
    pub fn build(
        &self,
        key: Option<&str>,
        request: &RequestInfo,
        namespace: Option<KeyParts>,
        facets: Option<Facets>,
    ) -> Result<CacheKey, KeyError> {
        let base = match key.filter(|key| !key.is_empty()) {
            Some(custom) => KeyTemplate::parse(custom)?.render(&self.prefix, request),
            None => self.template.render(&self.prefix, request),
        };
        Ok(CacheKey::build(base, namespace, facets))
    }

    pub fn template(&self) -> &KeyTemplate {
        &self.template
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}
