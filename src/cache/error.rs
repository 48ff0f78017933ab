use thiserror::Error;

use crate::domain::DomainError;

use super::keys::KeyError;
use super::store::StoreError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("request cache used outside of a request scope")]
    MissingRequestScope,
}
