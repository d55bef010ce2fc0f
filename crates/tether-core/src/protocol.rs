//! Wire message types.
//!
//! Every downstream request carries an argument list and an optional
//! correlation id. Every reply carries exactly one of a value, an error
//! description, or the channel a deferred result will arrive on, plus the
//! echoed id.
//!
//! ```text
//! request: { "args": [..], "id": "..." }
//! result:  { "value": .. } | { "error": ".." } | { "deferredChannel": ".." }  (+ "id")
//! ```

use crate::error::{Result, TetherError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request sent from a consumer to the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl InvocationRequest {
    pub fn new(args: Vec<Value>) -> Self {
        Self { args, id: None }
    }

    /// Create a request correlated with `id`.
    pub fn with_id(args: Vec<Value>, id: impl Into<String>) -> Self {
        Self {
            args,
            id: Some(id.into()),
        }
    }

    /// Parse a request received on `channel`. A null payload is an empty request.
    pub fn from_payload(channel: &str, payload: Value) -> Result<Self> {
        if payload.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(payload)
            .map_err(|e| TetherError::protocol(channel, format!("invalid request: {}", e)))
    }

    pub fn into_payload(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result returned by the host for a request, or pushed on a deferred/event channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// What a decoded result asks the caller to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    Value(Value),
    Deferred(String),
}

impl InvocationResult {
    /// Create a success result.
    pub fn with_value(value: Value, id: Option<String>) -> Self {
        Self {
            value: Some(value),
            id,
            ..Default::default()
        }
    }

    /// Create an error result.
    pub fn with_error(error: impl Into<String>, id: Option<String>) -> Self {
        Self {
            error: Some(error.into()),
            id,
            ..Default::default()
        }
    }

    /// Create a result announcing a deferred completion channel.
    pub fn with_deferred(channel: impl Into<String>, id: Option<String>) -> Self {
        Self {
            deferred_channel: Some(channel.into()),
            id,
            ..Default::default()
        }
    }

    pub fn from_payload(channel: &str, payload: Value) -> Result<Self> {
        serde_json::from_value(payload)
            .map_err(|e| TetherError::protocol(channel, format!("invalid result: {}", e)))
    }

    pub fn into_payload(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Turn the result into a value, a deferred channel, or the remote error it carries.
    ///
    /// A result without value, error or deferred channel is a null value.
    pub fn into_outcome(self, channel: &str) -> Result<ResultOutcome> {
        if let Some(error) = self.error {
            return Err(TetherError::remote(channel, error));
        }
        if let Some(deferred) = self.deferred_channel {
            return Ok(ResultOutcome::Deferred(deferred));
        }
        Ok(ResultOutcome::Value(self.value.unwrap_or(Value::Null)))
    }

    /// Like [`into_outcome`](Self::into_outcome) for channels that never defer.
    pub fn into_value(self, channel: &str) -> Result<Value> {
        match self.into_outcome(channel)? {
            ResultOutcome::Value(value) => Ok(value),
            ResultOutcome::Deferred(deferred) => Err(TetherError::protocol(
                channel,
                format!("unexpected deferred channel {}", deferred),
            )),
        }
    }
}
