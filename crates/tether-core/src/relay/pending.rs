//! Correlation of deferred replies with the calls that are waiting for them.

use crate::error::{Result, TetherError};
use crate::protocol::InvocationResult;
use crate::transport::ChannelTransport;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::{debug, warn};

type Waiters = HashMap<String, oneshot::Sender<InvocationResult>>;

/// Waiters keyed by deferred channel, then by correlation id.
///
/// A channel gets its transport listener on first use and keeps it.
pub(crate) struct PendingCalls {
    transport: Arc<dyn ChannelTransport>,
    channels: Mutex<HashMap<String, Waiters>>,
}

impl PendingCalls {
    pub(crate) fn new(transport: Arc<dyn ChannelTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Start waiting for the reply tagged `id` on `channel`.
    ///
    /// Must be called before the request is sent.
    pub(crate) fn register(self: &Arc<Self>, channel: &str, id: &str) -> DeferredResult {
        let (sender, receiver) = oneshot::channel();
        let mut channels = self.channels.lock().expect("pending lock poisoned");
        let waiters = channels.entry(channel.to_string()).or_insert_with(|| {
            let pending = Arc::downgrade(self);
            let listened = channel.to_string();
            self.transport.listen(
                channel,
                Arc::new(move |payload: Value| {
                    if let Some(pending) = pending.upgrade() {
                        pending.resolve(&listened, payload);
                    }
                }),
            );
            debug!("Listening for deferred results on {}", channel);
            HashMap::new()
        });
        waiters.insert(id.to_string(), sender);

        DeferredResult {
            channel: channel.to_string(),
            id: id.to_string(),
            receiver,
            pending: Arc::downgrade(self),
        }
    }

    fn resolve(&self, channel: &str, payload: Value) {
        let result = match InvocationResult::from_payload(channel, payload) {
            Ok(result) => result,
            Err(e) => {
                warn!("Ignoring deferred result: {}", e);
                return;
            }
        };
        let Some(id) = result.id.clone() else {
            debug!("Ignoring deferred result without id on {}", channel);
            return;
        };

        let sender = self
            .channels
            .lock()
            .expect("pending lock poisoned")
            .get_mut(channel)
            .and_then(|waiters| waiters.remove(&id));
        match sender {
            Some(sender) => {
                if sender.send(result).is_err() {
                    debug!("Caller for {} on {} went away", id, channel);
                }
            }
            None => debug!("No waiter for {} on {}", id, channel),
        }
    }

    fn cancel(&self, channel: &str, id: &str) {
        if let Some(waiters) = self
            .channels
            .lock()
            .expect("pending lock poisoned")
            .get_mut(channel)
        {
            waiters.remove(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn waiting(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .expect("pending lock poisoned")
            .get(channel)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

/// Eventual result of a deferred call.
///
/// Dropping it before it settles withdraws the waiter.
pub struct DeferredResult {
    channel: String,
    id: String,
    receiver: oneshot::Receiver<InvocationResult>,
    pending: Weak<PendingCalls>,
}

impl DeferredResult {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Future for DeferredResult {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result.into_value(&self.channel)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TetherError::DeferredDropped {
                channel: self.channel.clone(),
            })),
        }
    }
}

impl Drop for DeferredResult {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.upgrade() {
            pending.cancel(&self.channel, &self.id);
        }
    }
}

impl fmt::Debug for DeferredResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredResult")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}
