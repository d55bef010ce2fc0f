//! Channel naming.
//!
//! Maps (entity kind, entity name) pairs to wire channel strings. The mapping
//! is pure and deterministic; distinct pairs never produce the same channel
//! as long as names pass [`Channel::validate_name`].

use crate::config::ChannelConfig;
use crate::error::{Result, TetherError};

/// Channel name builder.
pub struct Channel;

impl Channel {
    /// Channel the intermediary fetches the registry snapshot from.
    pub fn public_info() -> &'static str {
        ChannelConfig::PUBLIC_INFO
    }

    pub fn function_call(name: &str) -> String {
        format!("{}{}", ChannelConfig::FUNCTION_CALL_PREFIX, name)
    }

    pub fn property_get(name: &str) -> String {
        format!("{}{}", ChannelConfig::PROPERTY_GET_PREFIX, name)
    }

    pub fn property_set(name: &str) -> String {
        format!("{}{}", ChannelConfig::PROPERTY_SET_PREFIX, name)
    }

    pub fn event_emit(name: &str) -> String {
        format!("{}{}", ChannelConfig::EVENT_EMIT_PREFIX, name)
    }

    /// Shared channel announcing a recurring subscription.
    pub fn event_on() -> &'static str {
        ChannelConfig::EVENT_ON
    }

    /// Shared channel announcing a one-shot subscription.
    pub fn event_once() -> &'static str {
        ChannelConfig::EVENT_ONCE
    }

    /// Channel carrying the settled result of a deferred call on `base`.
    pub fn deferred(base: &str) -> String {
        format!("{}{}", base, ChannelConfig::DEFERRED_SUFFIX)
    }

    /// Check that an entity name keeps the channel space collision-free.
    ///
    /// A name ending in the deferred suffix would make its call channel equal
    /// the deferred channel of another entity.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TetherError::InvalidName {
                name: name.to_string(),
                reason: "name must not be empty".to_string(),
            });
        }

        if name.ends_with(ChannelConfig::DEFERRED_SUFFIX) {
            return Err(TetherError::InvalidName {
                name: name.to_string(),
                reason: format!(
                    "name must not end with the reserved suffix '{}'",
                    ChannelConfig::DEFERRED_SUFFIX
                ),
            });
        }

        Ok(())
    }
}
