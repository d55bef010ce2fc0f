//! Transport seam.
//!
//! The bridge does not implement a transport of its own. It needs three
//! primitives from whatever connects the processes:
//!
//! - **Host side** ([`HostTransport`]): one handler per channel, whose return
//!   value (if any) is the synchronous reply to the sender.
//! - **Downstream side** ([`ChannelTransport`]): a blocking `send_sync` that
//!   waits for exactly one paired reply, a fire-and-forget `send`, and channel
//!   listeners for messages pushed by the host.
//! - **Endpoints** ([`Endpoint`]): the host's handle on a connected context,
//!   used to push deferred results and events and to detect torn-down contexts.
//!
//! [`loopback`] provides an in-memory implementation of all three.

pub mod loopback;

pub use loopback::{LoopbackBus, LoopbackHost, LoopbackPort};

use crate::error::Result;
use serde_json::Value;
use std::sync::Arc;

/// Identity of a connected downstream context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

/// Identity of a listener registered on a [`ChannelTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// The host's handle on a downstream context.
pub trait Endpoint: Send + Sync {
    fn id(&self) -> EndpointId;

    /// Push a message to the context's listeners on `channel`.
    fn send(&self, channel: &str, payload: Value) -> Result<()>;

    /// Whether the context has been torn down.
    fn is_destroyed(&self) -> bool;
}

pub type EndpointRef = Arc<dyn Endpoint>;

/// A message delivered to a host handler.
pub struct IncomingMessage {
    pub sender: EndpointRef,
    pub payload: Value,
}

/// Host handler. Returning `Some` answers a synchronous send.
pub type HostHandler = Arc<dyn Fn(IncomingMessage) -> Option<Value> + Send + Sync>;

/// Listener for messages pushed to a downstream context.
pub type ChannelListener = Arc<dyn Fn(Value) + Send + Sync>;

/// Host side of the transport.
pub trait HostTransport: Send + Sync {
    /// Install `handler` for `channel`, replacing any previous handler.
    fn set_handler(&self, channel: &str, handler: HostHandler);

    fn remove_handler(&self, channel: &str);
}

/// Downstream side of the transport.
///
/// Implementations must not invoke listeners from inside
/// [`listen`](Self::listen) itself.
pub trait ChannelTransport: Send + Sync {
    /// Send and block until the single paired reply arrives.
    fn send_sync(&self, channel: &str, payload: Value) -> Result<Value>;

    /// Send without waiting for a reply.
    fn send(&self, channel: &str, payload: Value) -> Result<()>;

    fn listen(&self, channel: &str, listener: ChannelListener) -> ListenerId;

    fn unlisten(&self, channel: &str, id: ListenerId);
}
