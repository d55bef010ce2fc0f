//! Centralized configuration for Tether.
//!
//! Channel prefixes, process roles and other fixed parameters of the bridge.

use crate::registry::Scope;
use std::fmt;

/// Wire channel names and affixes.
///
/// Every channel is a plain string concatenation of one of these with an
/// entity name; see [`crate::channel::Channel`].
pub struct ChannelConfig;

impl ChannelConfig {
    pub const PUBLIC_INFO: &'static str = "GET_PUBLIC_INFO";
    pub const FUNCTION_CALL_PREFIX: &'static str = "FUNCTION_CALL_";
    pub const PROPERTY_GET_PREFIX: &'static str = "PROPERTY_GET_";
    pub const PROPERTY_SET_PREFIX: &'static str = "PROPERTY_SET_";
    pub const EVENT_EMIT_PREFIX: &'static str = "EVENT_EMIT_";
    pub const EVENT_ON: &'static str = "EVENT_ON";
    pub const EVENT_ONCE: &'static str = "EVENT_ONCE";
    pub const DEFERRED_SUFFIX: &'static str = "_PROMISE";
}

/// Bridge-level configuration.
pub struct BridgeConfig;

impl BridgeConfig {
    /// Error text used when a failure carries no description.
    pub const UNKNOWN_ERROR: &'static str = "Unknown error";
    /// Envelope tag marking a snapshot value.
    pub const SNAPSHOT_KIND: &'static str = "snapshot";
}

/// The role a process plays in the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Host,
    Intermediary,
    Client,
}

impl ProcessRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessRole::Host => "host",
            ProcessRole::Intermediary => "intermediary",
            ProcessRole::Client => "client",
        }
    }

    /// The consumer scope this role resolves entities under. The host has none.
    pub fn scope(&self) -> Option<Scope> {
        match self {
            ProcessRole::Host => None,
            ProcessRole::Intermediary => Some(Scope::Intermediary),
            ProcessRole::Client => Some(Scope::Client),
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(ProcessRole::Host.to_string(), "host");
        assert_eq!(ProcessRole::Intermediary.as_str(), "intermediary");
        assert_eq!(format!("{} process", ProcessRole::Client), "client process");
    }

    #[test]
    fn test_role_scope() {
        assert_eq!(ProcessRole::Host.scope(), None);
        assert_eq!(ProcessRole::Client.scope(), Some(Scope::Client));
        assert_eq!(
            ProcessRole::Intermediary.scope(),
            Some(Scope::Intermediary)
        );
    }
}
