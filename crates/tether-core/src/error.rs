//! Error types for Tether.
//!
//! Errors fall into the categories a bridge caller has to tell apart:
//! registration mistakes on the host, visibility and permission failures that
//! are detected locally before any message is sent, failures raised by a remote
//! implementation, and bootstrap/transport problems.

use crate::config::ProcessRole;
use crate::registry::{EntityKind, Scope};
use thiserror::Error;

/// Main error type for the Tether bridge.
#[derive(Debug, Error)]
pub enum TetherError {
    // Registration errors
    #[error("{operation} is only available in the {expected} process, not in the {actual} process")]
    WrongRole {
        operation: &'static str,
        expected: ProcessRole,
        actual: ProcessRole,
    },

    #[error("Invalid entity name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    // Visibility errors
    #[error("'{name}' is not published from the host")]
    NotPublished { name: String },

    #[error("'{name}' is not provided into the {scope} scope")]
    OutOfScope { name: String, scope: Scope },

    // Permission errors
    #[error("No read access to property '{name}'")]
    NoReadAccess { name: String },

    #[error("Property '{name}' is read-only")]
    ReadOnly { name: String },

    #[error("'{name}' is not a {expected}")]
    KindMismatch { name: String, expected: EntityKind },

    #[error("Event '{name}' cannot be {action} from this side")]
    WrongDirection { name: String, action: &'static str },

    // Remote execution errors
    #[error("Error on {channel}: {message}")]
    Remote { channel: String, message: String },

    // Bootstrap errors
    #[error("No public entities found. Publish entities from the host before starting the relay")]
    NothingPublished,

    // Transport and protocol errors
    #[error("Transport error on {channel}: {message}")]
    Transport { channel: String, message: String },

    #[error("Malformed message on {channel}: {message}")]
    Protocol { channel: String, message: String },

    #[error("Deferred result on {channel} was dropped before it settled")]
    DeferredDropped { channel: String },

    // Snapshot errors
    #[error("Snapshot restore failed for {type_name}: {message}")]
    Snapshot {
        type_name: &'static str,
        message: String,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tether operations.
pub type Result<T> = std::result::Result<T, TetherError>;

/// Coarse classification of a [`TetherError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Registration,
    Visibility,
    Permission,
    RemoteExecution,
    Bootstrap,
    Transport,
    Internal,
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        TetherError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl TetherError {
    /// Create a remote execution error carrying the originating channel.
    pub fn remote(channel: impl Into<String>, message: impl Into<String>) -> Self {
        TetherError::Remote {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error for a payload that could not be understood.
    pub fn protocol(channel: impl Into<String>, message: impl Into<String>) -> Self {
        TetherError::Protocol {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            TetherError::WrongRole { .. } | TetherError::InvalidName { .. } => {
                ErrorCategory::Registration
            }

            TetherError::NotPublished { .. } | TetherError::OutOfScope { .. } => {
                ErrorCategory::Visibility
            }

            TetherError::NoReadAccess { .. }
            | TetherError::ReadOnly { .. }
            | TetherError::KindMismatch { .. }
            | TetherError::WrongDirection { .. } => ErrorCategory::Permission,

            TetherError::Remote { .. } => ErrorCategory::RemoteExecution,

            TetherError::NothingPublished => ErrorCategory::Bootstrap,

            TetherError::Transport { .. }
            | TetherError::Protocol { .. }
            | TetherError::DeferredDropped { .. } => ErrorCategory::Transport,

            _ => ErrorCategory::Internal,
        }
    }

    /// True for errors detected before any message crosses the boundary.
    pub fn is_local_check(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Visibility | ErrorCategory::Permission
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TetherError::OutOfScope {
            name: "secret".into(),
            scope: Scope::Client,
        };
        assert_eq!(
            err.to_string(),
            "'secret' is not provided into the client scope"
        );

        let err = TetherError::remote("FUNCTION_CALL_fail", "boom");
        assert_eq!(err.to_string(), "Error on FUNCTION_CALL_fail: boom");
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            TetherError::NotPublished { name: "x".into() }.category(),
            ErrorCategory::Visibility
        );
        assert_eq!(
            TetherError::ReadOnly { name: "x".into() }.category(),
            ErrorCategory::Permission
        );
        assert_eq!(
            TetherError::NothingPublished.category(),
            ErrorCategory::Bootstrap
        );
        assert_eq!(
            TetherError::WrongRole {
                operation: "Publishing",
                expected: ProcessRole::Host,
                actual: ProcessRole::Client,
            }
            .category(),
            ErrorCategory::Registration
        );
    }

    #[test]
    fn test_local_checks() {
        assert!(TetherError::NoReadAccess { name: "x".into() }.is_local_check());
        assert!(!TetherError::remote("c", "m").is_local_check());
    }
}
