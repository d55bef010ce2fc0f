//! Entity metadata: kind, scope, access and event direction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A consumer context an entity can be provided into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Intermediary,
    Client,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Intermediary => "intermediary",
            Scope::Client => "client",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of scopes an entity is visible in. Defaults to both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet(BTreeSet<Scope>);

impl ScopeSet {
    pub fn all() -> Self {
        Self([Scope::Intermediary, Scope::Client].into_iter().collect())
    }

    /// Registered but invisible to every consumer.
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn only(scope: Scope) -> Self {
        Self(BTreeSet::from([scope]))
    }

    pub fn contains(&self, scope: Scope) -> bool {
        self.0.contains(&scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.0.iter().copied()
    }
}

impl Default for ScopeSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<Scope> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = Scope>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Permission on a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    Read,
    Write,
}

/// Set of permissions granted on a property.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessSet(BTreeSet<Access>);

impl AccessSet {
    pub fn read_write() -> Self {
        Self(BTreeSet::from([Access::Read, Access::Write]))
    }

    pub fn read_only() -> Self {
        Self(BTreeSet::from([Access::Read]))
    }

    pub fn write_only() -> Self {
        Self(BTreeSet::from([Access::Write]))
    }

    /// Grant read when a getter exists and write when a setter exists.
    pub fn derived(has_getter: bool, has_setter: bool) -> Self {
        let mut set = BTreeSet::new();
        if has_getter {
            set.insert(Access::Read);
        }
        if has_setter {
            set.insert(Access::Write);
        }
        Self(set)
    }

    pub fn contains(&self, access: Access) -> bool {
        self.0.contains(&access)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Access> for AccessSet {
    fn from_iter<I: IntoIterator<Item = Access>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Function,
    Property,
    Event,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Function => "function",
            EntityKind::Property => "property",
            EntityKind::Event => "event",
        })
    }
}

/// Which side of the boundary emits an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventDirection {
    /// Emitted by the host, subscribed to by consumers.
    Downstream,
    /// Emitted by consumers, listened to by the host.
    Upstream,
}

/// Registry record for one published entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    pub kind: EntityKind,
    pub scope: ScopeSet,
    #[serde(default, skip_serializing_if = "AccessSet::is_empty")]
    pub access: AccessSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<EventDirection>,
}

impl EntityInfo {
    pub fn function(scope: ScopeSet) -> Self {
        Self {
            kind: EntityKind::Function,
            scope,
            access: AccessSet::default(),
            direction: None,
        }
    }

    pub fn property(scope: ScopeSet, access: AccessSet) -> Self {
        Self {
            kind: EntityKind::Property,
            scope,
            access,
            direction: None,
        }
    }

    pub fn event(direction: EventDirection, scope: ScopeSet) -> Self {
        Self {
            kind: EntityKind::Event,
            scope,
            access: AccessSet::default(),
            direction: Some(direction),
        }
    }

    pub fn is_visible_to(&self, scope: Scope) -> bool {
        self.scope.contains(scope)
    }

    pub fn can_read(&self) -> bool {
        self.access.contains(Access::Read)
    }

    pub fn can_write(&self) -> bool {
        self.access.contains(Access::Write)
    }

    pub fn is_event(&self, direction: EventDirection) -> bool {
        self.kind == EntityKind::Event && self.direction == Some(direction)
    }
}
