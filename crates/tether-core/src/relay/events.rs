//! Event forwarding in the intermediary.
//!
//! Each subscription is announced to the host on `EVENT_ON`/`EVENT_ONCE`.
//! Emissions arrive once per context on `EVENT_EMIT_<name>` and are fanned
//! out to the local listeners here.

use crate::channel::Channel;
use crate::error::{Result, TetherError};
use crate::protocol::{InvocationRequest, InvocationResult};
use crate::provider::{Emission, EventListener};
use crate::publish::outcome::{runtime_handle, settle};
use crate::subscription::{SubscribeMode, Subscription};
use crate::transport::ChannelTransport;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[derive(Default)]
struct LocalListeners {
    on: Vec<(u64, EventListener)>,
    once: Vec<(u64, EventListener)>,
}

pub(crate) struct EventHub {
    transport: Arc<dyn ChannelTransport>,
    /// An entry exists once the emit channel listener is installed.
    events: Mutex<HashMap<String, LocalListeners>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub(crate) fn new(transport: Arc<dyn ChannelTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            events: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn subscribe(
        self: &Arc<Self>,
        name: &str,
        mode: SubscribeMode,
        listener: EventListener,
    ) -> Result<Subscription> {
        let channel = match mode {
            SubscribeMode::On => Channel::event_on(),
            SubscribeMode::Once => Channel::event_once(),
        };

        // Local listener first: the host may emit before the announce returns.
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut events = self.events.lock().expect("events lock poisoned");
            let listeners = events.entry(name.to_string()).or_insert_with(|| {
                self.install_emit_listener(name);
                LocalListeners::default()
            });
            match mode {
                SubscribeMode::On => listeners.on.push((id, listener)),
                SubscribeMode::Once => listeners.once.push((id, listener)),
            }
        }

        let request = InvocationRequest::new(vec![Value::String(name.to_string())]);
        let announced = self
            .transport
            .send_sync(channel, request.into_payload())
            .and_then(|reply| InvocationResult::from_payload(channel, reply)?.into_value(channel));
        if let Err(e) = announced {
            self.remove(name, id);
            return Err(e);
        }
        debug!("Subscribed to '{}' ({:?})", name, mode);

        let hub = Arc::downgrade(self);
        let event = name.to_string();
        Ok(Subscription::new(move || {
            if let Some(hub) = hub.upgrade() {
                hub.remove(&event, id);
            }
        }))
    }

    fn install_emit_listener(self: &Arc<Self>, name: &str) {
        let hub = Arc::downgrade(self);
        let event = name.to_string();
        self.transport.listen(
            &Channel::event_emit(name),
            Arc::new(move |payload: Value| {
                if let Some(hub) = hub.upgrade() {
                    hub.deliver(&event, payload);
                }
            }),
        );
    }

    fn remove(&self, name: &str, id: u64) {
        if let Some(listeners) = self
            .events
            .lock()
            .expect("events lock poisoned")
            .get_mut(name)
        {
            listeners.on.retain(|(existing, _)| *existing != id);
            listeners.once.retain(|(existing, _)| *existing != id);
        }
    }

    fn deliver(&self, name: &str, payload: Value) {
        let channel = Channel::event_emit(name);
        let emitted = match InvocationResult::from_payload(&channel, payload) {
            Ok(InvocationResult {
                error: Some(error), ..
            }) => Err(error),
            Ok(result) => Ok(result.value.unwrap_or(Value::Null)),
            Err(e) => {
                warn!("Ignoring emission: {}", e);
                return;
            }
        };

        let listeners: Vec<EventListener> = {
            let mut events = self.events.lock().expect("events lock poisoned");
            let Some(listeners) = events.get_mut(name) else {
                return;
            };
            let mut selected: Vec<EventListener> =
                listeners.on.iter().map(|(_, l)| l.clone()).collect();
            selected.extend(listeners.once.drain(..).map(|(_, l)| l));
            selected
        };

        for listener in listeners {
            listener(emitted.clone());
        }
    }

    pub(crate) fn emit(&self, name: &str, emission: Emission) -> Result<()> {
        let channel = Channel::event_emit(name);
        match emission {
            Emission::Value(value) => self
                .transport
                .send(&channel, InvocationResult::with_value(value, None).into_payload()),
            Emission::Deferred(future) => {
                let runtime = runtime_handle().map_err(TetherError::Other)?;
                let transport = self.transport.clone();
                runtime.spawn(async move {
                    let result = match settle(future).await {
                        Ok(value) => InvocationResult::with_value(value, None),
                        Err(description) => InvocationResult::with_error(description, None),
                    };
                    if let Err(e) = transport.send(&channel, result.into_payload()) {
                        debug!("Deferred emission on {} not sent: {}", channel, e);
                    }
                });
                Ok(())
            }
        }
    }
}
