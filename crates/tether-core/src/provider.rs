//! The capability the intermediary hands to the client.
//!
//! [`Provider`] is the seam between the consumer proxy and whatever actually
//! reaches the host. The relay implements it over a [`ChannelTransport`];
//! tests can substitute their own.
//!
//! [`ChannelTransport`]: crate::transport::ChannelTransport

use crate::error::Result;
use crate::registry::RegistrySnapshot;
use crate::relay::DeferredResult;
use crate::subscription::{SubscribeMode, Subscription};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Listener for a host event as seen through a provider.
///
/// Receives the emitted value, or the error message of an error emission.
pub type EventListener = Arc<dyn Fn(std::result::Result<Value, String>) + Send + Sync>;

/// What a consumer emits on an upstream event.
pub enum Emission {
    Value(Value),
    /// Awaited before forwarding; an error is forwarded as an error emission.
    Deferred(BoxFuture<'static, anyhow::Result<Value>>),
}

impl std::fmt::Debug for Emission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Emission::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Emission::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Reply to a forwarded function call.
#[derive(Debug)]
pub enum CallReply {
    Ready(Value),
    Deferred(DeferredResult),
}

impl CallReply {
    pub fn is_deferred(&self) -> bool {
        matches!(self, CallReply::Deferred(_))
    }

    /// The value, if the host answered immediately.
    pub fn into_ready(self) -> Option<Value> {
        match self {
            CallReply::Ready(value) => Some(value),
            CallReply::Deferred(_) => None,
        }
    }

    /// Wait for the final value either way.
    pub async fn settle(self) -> Result<Value> {
        match self {
            CallReply::Ready(value) => Ok(value),
            CallReply::Deferred(deferred) => deferred.await,
        }
    }
}

/// Forwarding surface over the host's published entities.
///
/// Implementations check that a name exists and has the right kind; scope and
/// access checks belong to the caller.
pub trait Provider: Send + Sync {
    /// Registry fetched at bootstrap.
    fn registry(&self) -> &RegistrySnapshot;

    fn call_function(&self, name: &str, id: &str, args: Vec<Value>) -> Result<CallReply>;

    fn get_property(&self, name: &str) -> Result<Value>;

    fn set_property(&self, name: &str, value: Value) -> Result<()>;

    fn subscribe(&self, name: &str, mode: SubscribeMode, listener: EventListener) -> Result<Subscription>;

    fn emit(&self, name: &str, emission: Emission) -> Result<()>;
}

pub type ProviderHandle = Arc<dyn Provider>;
