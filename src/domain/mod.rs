//! Domain contracts: models, the object store collaborator, and the sample
//! `Profile` model.

pub mod error;
pub mod model;
pub mod objects;
pub mod profiles;

pub use error::DomainError;
pub use model::Model;
pub use objects::{ModelHook, ObjectStore, ObservableObjectStore};
pub use profiles::Profile;
