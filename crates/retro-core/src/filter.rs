//! Include/exclude filtering of entities by id or domain

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::EntityId;

/// A set of entity ids and domains
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default)]
    pub domains: HashSet<String>,
    #[serde(default)]
    pub entities: HashSet<String>,
}

impl FilterSet {
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty() && self.entities.is_empty()
    }

    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.domains.contains(entity_id.domain())
            || self.entities.contains(&entity_id.to_string())
    }
}

/// Entity filter shared by the recorder and the exporter
///
/// Exclusion wins. When any include is configured, an entity must match it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFilter {
    #[serde(default)]
    pub include: FilterSet,
    #[serde(default)]
    pub exclude: FilterSet,
}

impl EntityFilter {
    pub fn accepts(&self, entity_id: &EntityId) -> bool {
        if self.exclude.contains(entity_id) {
            return false;
        }
        self.include.is_empty() || self.include.contains(entity_id)
    }
}
