//! Entity registry.
//!
//! The host keeps one [`Registry`] for the lifetime of the process, filled only
//! by publish calls. The intermediary fetches it once at startup as an
//! immutable [`RegistrySnapshot`]; the client only ever sees that snapshot
//! through the relay.
//!
//! ```text
//! { "entities": { "<name>": { "kind": "property", "scope": ["client"], "access": ["read"] } } }
//! ```

pub mod entity;

pub use entity::{Access, AccessSet, EntityInfo, EntityKind, EventDirection, Scope, ScopeSet};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Host-side table of published entities.
#[derive(Debug, Default)]
pub struct Registry {
    entities: BTreeMap<String, EntityInfo>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity, replacing any earlier registration under the same name.
    pub fn insert(&mut self, name: impl Into<String>, info: EntityInfo) -> Option<EntityInfo> {
        self.entities.insert(name.into(), info)
    }

    pub fn get(&self, name: &str) -> Option<&EntityInfo> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Copy the table for transfer to the intermediary.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entities: self.entities.clone(),
        }
    }
}

/// Immutable copy of the registry held by consumers for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    entities: BTreeMap<String, EntityInfo>,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&EntityInfo> {
        self.entities.get(name)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityInfo)> {
        self.entities.iter().map(|(name, info)| (name.as_str(), info))
    }

    /// Names visible in `scope`, in sorted order.
    pub fn visible_names(&self, scope: Scope) -> Vec<String> {
        self.entities
            .iter()
            .filter(|(_, info)| info.is_visible_to(scope))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
