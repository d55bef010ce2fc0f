//! In-memory transport connecting a host to downstream ports in one process.
//!
//! Used by tests and the demo binary to stand in for real process boundaries.
//! A synchronous send runs the host handler inline and returns its reply;
//! host pushes run the port's listeners inline. No locks are held while
//! handlers or listeners run, so either side may re-enter the bus.

use super::{
    ChannelListener, ChannelTransport, Endpoint, EndpointId, EndpointRef, HostHandler,
    HostTransport, IncomingMessage, ListenerId,
};
use crate::error::{Result, TetherError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

#[derive(Default)]
struct BusInner {
    handlers: RwLock<HashMap<String, HostHandler>>,
    next_endpoint: AtomicU64,
}

impl BusInner {
    fn handler(&self, channel: &str) -> Option<HostHandler> {
        self.handlers
            .read()
            .expect("handlers lock poisoned")
            .get(channel)
            .cloned()
    }
}

/// Shared in-memory bus.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host side of the bus.
    pub fn host(&self) -> LoopbackHost {
        LoopbackHost {
            inner: self.inner.clone(),
        }
    }

    /// Connect a new downstream context.
    pub fn connect(&self) -> LoopbackPort {
        let id = EndpointId(self.inner.next_endpoint.fetch_add(1, Ordering::Relaxed) + 1);
        debug!("Loopback port {:?} connected", id);
        LoopbackPort {
            bus: self.inner.clone(),
            state: Arc::new(PortState {
                id,
                listeners: Mutex::new(HashMap::new()),
                next_listener: AtomicU64::new(1),
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

/// Host handle on a [`LoopbackBus`].
#[derive(Clone)]
pub struct LoopbackHost {
    inner: Arc<BusInner>,
}

impl HostTransport for LoopbackHost {
    fn set_handler(&self, channel: &str, handler: HostHandler) {
        self.inner
            .handlers
            .write()
            .expect("handlers lock poisoned")
            .insert(channel.to_string(), handler);
    }

    fn remove_handler(&self, channel: &str) {
        self.inner
            .handlers
            .write()
            .expect("handlers lock poisoned")
            .remove(channel);
    }
}

struct PortState {
    id: EndpointId,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, ChannelListener)>>>,
    next_listener: AtomicU64,
    destroyed: AtomicBool,
}

impl PortState {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn deliver(&self, channel: &str, payload: Value) -> usize {
        let listeners: Vec<ChannelListener> = {
            let listeners = self.listeners.lock().expect("listeners lock poisoned");
            listeners
                .get(channel)
                .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
                .unwrap_or_default()
        };

        for listener in &listeners {
            listener(payload.clone());
        }
        listeners.len()
    }
}

/// One downstream context connected to a [`LoopbackBus`].
#[derive(Clone)]
pub struct LoopbackPort {
    bus: Arc<BusInner>,
    state: Arc<PortState>,
}

impl LoopbackPort {
    pub fn id(&self) -> EndpointId {
        self.state.id
    }

    /// The host's view of this port.
    pub fn endpoint(&self) -> EndpointRef {
        Arc::new(PortEndpoint {
            state: self.state.clone(),
        })
    }

    /// Tear the context down. Later sends in either direction fail.
    pub fn close(&self) {
        self.state.destroyed.store(true, Ordering::SeqCst);
        self.state
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .clear();
        debug!("Loopback port {:?} closed", self.state.id);
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_destroyed()
    }

    fn ensure_open(&self, channel: &str) -> Result<()> {
        if self.state.is_destroyed() {
            return Err(TetherError::Transport {
                channel: channel.to_string(),
                message: "port is closed".to_string(),
            });
        }
        Ok(())
    }

    fn dispatch(&self, channel: &str, payload: Value) -> Result<Option<Value>> {
        self.ensure_open(channel)?;
        let Some(handler) = self.bus.handler(channel) else {
            return Err(TetherError::Transport {
                channel: channel.to_string(),
                message: "no host handler".to_string(),
            });
        };
        Ok(handler(IncomingMessage {
            sender: self.endpoint(),
            payload,
        }))
    }
}

impl ChannelTransport for LoopbackPort {
    fn send_sync(&self, channel: &str, payload: Value) -> Result<Value> {
        self.dispatch(channel, payload)?
            .ok_or_else(|| TetherError::Transport {
                channel: channel.to_string(),
                message: "host handler returned no reply".to_string(),
            })
    }

    fn send(&self, channel: &str, payload: Value) -> Result<()> {
        match self.dispatch(channel, payload) {
            Ok(_) => Ok(()),
            Err(TetherError::Transport { message, .. }) if !self.state.is_destroyed() => {
                debug!("Dropped message on {}: {}", channel, message);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn listen(&self, channel: &str, listener: ChannelListener) -> ListenerId {
        let id = ListenerId(self.state.next_listener.fetch_add(1, Ordering::Relaxed));
        self.state
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .entry(channel.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn unlisten(&self, channel: &str, id: ListenerId) {
        let mut listeners = self.state.listeners.lock().expect("listeners lock poisoned");
        if let Some(entries) = listeners.get_mut(channel) {
            entries.retain(|(existing, _)| *existing != id);
            if entries.is_empty() {
                listeners.remove(channel);
            }
        }
    }
}

struct PortEndpoint {
    state: Arc<PortState>,
}

impl Endpoint for PortEndpoint {
    fn id(&self) -> EndpointId {
        self.state.id
    }

    fn send(&self, channel: &str, payload: Value) -> Result<()> {
        if self.state.is_destroyed() {
            return Err(TetherError::Transport {
                channel: channel.to_string(),
                message: format!("endpoint {:?} is destroyed", self.state.id),
            });
        }
        let delivered = self.state.deliver(channel, payload);
        if delivered == 0 {
            debug!("No listener on {} for endpoint {:?}", channel, self.state.id);
        }
        Ok(())
    }

    fn is_destroyed(&self) -> bool {
        self.state.is_destroyed()
    }
}
