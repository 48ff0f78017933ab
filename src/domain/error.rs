use std::error::Error as StdError;

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("model `{model}` has no field `{field}`")]
    UnknownField { model: &'static str, field: String },
    #[error("invalid value for `{model}.{field}`: {reason}")]
    InvalidValue {
        model: &'static str,
        field: String,
        reason: String,
    },
    #[error("model `{model}` with id `{id}` not found")]
    NotFound { model: &'static str, id: String },
    #[error("model hook `{hook}` failed")]
    Hook {
        hook: &'static str,
        #[source]
        source: BoxError,
    },
}

impl DomainError {
    pub fn unknown_field(model: &'static str, field: impl Into<String>) -> Self {
        Self::UnknownField {
            model,
            field: field.into(),
        }
    }

    pub fn invalid_value(
        model: &'static str,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            model,
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(model: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            model,
            id: id.to_string(),
        }
    }

    pub fn hook(hook: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Hook {
            hook,
            source: source.into(),
        }
    }
}
