//! Member profiles served by the demo application.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::VersionTag;

use super::error::DomainError;
use super::model::Model;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub bio: String,
    #[serde(default)]
    pub cache_key: Option<VersionTag>,
}

impl Profile {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        email: impl Into<String>,
        bio: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
            bio: bio.into(),
            cache_key: None,
        }
    }

    fn text_field(&mut self, name: &str) -> Option<&mut String> {
        match name {
            "name" => Some(&mut self.name),
            "email" => Some(&mut self.email),
            "bio" => Some(&mut self.bio),
            _ => None,
        }
    }
}

impl Model for Profile {
    type Id = u64;

    const NAME: &'static str = "Profile";

    fn pk(&self) -> &u64 {
        &self.id
    }

    fn version_tag(&self) -> Option<&VersionTag> {
        self.cache_key.as_ref()
    }

    fn set_version_tag(&mut self, tag: VersionTag) {
        self.cache_key = Some(tag);
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "name" => Some(Value::from(self.name.as_str())),
            "email" => Some(Value::from(self.email.as_str())),
            "bio" => Some(Value::from(self.bio.as_str())),
            "cache_key" => Some(
                self.cache_key
                    .as_ref()
                    .map_or(Value::Null, |tag| Value::from(tag.as_str())),
            ),
            _ => None,
        }
    }

    fn set_field(&mut self, name: &str, value: Value) -> Result<(), DomainError> {
        match name {
            "id" => Err(DomainError::invalid_value(
                Self::NAME,
                name,
                "primary key is immutable",
            )),
            "cache_key" => Err(DomainError::invalid_value(
                Self::NAME,
                name,
                "version tags are assigned by the cache",
            )),
            _ => {
                let slot = self
                    .text_field(name)
                    .ok_or_else(|| DomainError::unknown_field(Self::NAME, name))?;
                match value {
                    Value::String(text) => {
                        *slot = text;
                        Ok(())
                    }
                    other => Err(DomainError::invalid_value(
                        Self::NAME,
                        name,
                        format!("expected a string, got {other}"),
                    )),
                }
            }
        }
    }
}
