//! Results of host implementations and how they are settled.

use crate::config::BridgeConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// What a published function produced.
pub enum Outcome {
    /// Available now; sent back in the synchronous reply.
    Ready(Value),
    /// Settles later; announced via a deferred channel.
    Deferred(BoxFuture<'static, anyhow::Result<Value>>),
}

impl Outcome {
    pub fn ready(value: impl Into<Value>) -> Self {
        Outcome::Ready(value.into())
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Outcome::Deferred(future.boxed())
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Outcome::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// Describe an implementation error the way it travels on the wire.
pub(crate) fn describe_error(error: &anyhow::Error) -> String {
    let description = format!("{:#}", error);
    if description.is_empty() {
        BridgeConfig::UNKNOWN_ERROR.to_string()
    } else {
        description
    }
}

fn describe_panic(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

/// Run host code, turning both errors and panics into a description.
pub(crate) fn catch_failure<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match std::panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(describe_error(&error)),
        Err(panic) => Err(describe_panic(panic.as_ref())),
    }
}

/// Await a deferred result, turning both errors and panics into a description.
pub(crate) async fn settle(future: BoxFuture<'static, anyhow::Result<Value>>) -> Result<Value, String> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(describe_error(&error)),
        Err(panic) => Err(describe_panic(panic.as_ref())),
    }
}

/// Handle of the runtime deferred work is spawned on.
pub(crate) fn runtime_handle() -> Result<tokio::runtime::Handle, String> {
    tokio::runtime::Handle::try_current()
        .map_err(|_| "no async runtime available to settle a deferred result".to_string())
}
