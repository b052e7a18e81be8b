//! Entity ID type representing a domain.object_id pair

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for invalid entity IDs
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityIdError {
    #[error("entity_id is required")]
    Missing,

    #[error("entity_id '{0}' must contain exactly one '.' separator")]
    InvalidFormat(String),

    #[error("entity_id '{0}' has an empty domain or object_id")]
    EmptyPart(String),

    #[error("entity_id '{0}' contains invalid characters")]
    InvalidChars(String),
}

/// An entity ID such as `sensor.outside_temperature`
///
/// Both halves are lowercase alphanumeric with underscores. Writers hand in
/// raw ids through [`EntityId::normalize`], which lower-cases before parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId {
    domain: String,
    object_id: String,
}

impl EntityId {
    /// Create a new EntityId from domain and object_id parts
    pub fn new(
        domain: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Result<Self, EntityIdError> {
        let domain = domain.into();
        let object_id = object_id.into();
        let full = format!("{}.{}", domain, object_id);

        if domain.is_empty() || object_id.is_empty() {
            return Err(EntityIdError::EmptyPart(full));
        }
        if domain.contains("__") || !is_slug(&domain) || !is_slug(&object_id) {
            return Err(EntityIdError::InvalidChars(full));
        }

        Ok(Self { domain, object_id })
    }

    /// Lower-case and parse a caller-supplied id
    pub fn normalize(raw: &str) -> Result<Self, EntityIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EntityIdError::Missing);
        }
        trimmed.to_lowercase().parse()
    }

    /// Get the domain part of the entity ID
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Get the object_id part of the entity ID
    pub fn object_id(&self) -> &str {
        &self.object_id
    }
}

/// `(?!_)[\da-z_]+(?<!_)`
fn is_slug(s: &str) -> bool {
    !s.starts_with('_')
        && !s.ends_with('_')
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

impl FromStr for EntityId {
    type Err = EntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((domain, object_id)) if !object_id.contains('.') => {
                Self::new(domain, object_id)
            }
            _ => Err(EntityIdError::InvalidFormat(s.to_string())),
        }
    }
}

impl TryFrom<String> for EntityId {
    type Error = EntityIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> String {
        id.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.object_id)
    }
}
