//! Intermediary relay.
//!
//! Fetches the host registry once at startup and forwards every call,
//! property access and event subscription over the channel transport. The
//! client never sees the transport, only the [`Provider`] returned by
//! [`Relay::expose`].

mod events;
mod pending;

pub use pending::DeferredResult;

use crate::channel::Channel;
use crate::config::ProcessRole;
use crate::error::{Result, TetherError};
use crate::protocol::{InvocationRequest, InvocationResult, ResultOutcome};
use crate::provider::{CallReply, Emission, EventListener, Provider, ProviderHandle};
use crate::registry::{EntityKind, EventDirection, RegistrySnapshot};
use crate::subscription::{SubscribeMode, Subscription};
use crate::transport::ChannelTransport;
use events::EventHub;
use pending::PendingCalls;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Precomputed channels for one entity.
#[derive(Debug, Clone)]
enum Forwarder {
    Function { call: String, deferred: String },
    Property { get: String, set: String },
    Event { direction: EventDirection },
}

impl Forwarder {
    fn kind(&self) -> EntityKind {
        match self {
            Forwarder::Function { .. } => EntityKind::Function,
            Forwarder::Property { .. } => EntityKind::Property,
            Forwarder::Event { .. } => EntityKind::Event,
        }
    }
}

/// Forwarding layer between the host and the client.
pub struct Relay {
    registry: RegistrySnapshot,
    transport: Arc<dyn ChannelTransport>,
    forwarders: BTreeMap<String, Forwarder>,
    pending: Arc<PendingCalls>,
    events: Arc<EventHub>,
}

impl Relay {
    /// Fetch the host registry and build the forwarding table.
    ///
    /// Fails with the transport error when the host cannot be reached, and
    /// with [`TetherError::NothingPublished`] when it has published nothing.
    pub fn bootstrap(role: ProcessRole, transport: Arc<dyn ChannelTransport>) -> Result<Arc<Self>> {
        if role != ProcessRole::Intermediary {
            return Err(TetherError::WrongRole {
                operation: "Relay bootstrap",
                expected: ProcessRole::Intermediary,
                actual: role,
            });
        }

        let channel = Channel::public_info();
        let reply = transport
            .send_sync(channel, Value::Null)
            .inspect_err(|e| warn!("Registry request failed: {}", e))?;
        let value = InvocationResult::from_payload(channel, reply)?.into_value(channel)?;
        let registry: RegistrySnapshot = serde_json::from_value(value)?;
        if registry.is_empty() {
            return Err(TetherError::NothingPublished);
        }

        let forwarders = registry
            .iter()
            .map(|(name, info)| {
                let forwarder = match info.kind {
                    EntityKind::Function => {
                        let call = Channel::function_call(name);
                        let deferred = Channel::deferred(&call);
                        Forwarder::Function { call, deferred }
                    }
                    EntityKind::Property => Forwarder::Property {
                        get: Channel::property_get(name),
                        set: Channel::property_set(name),
                    },
                    EntityKind::Event => Forwarder::Event {
                        direction: info.direction.unwrap_or(EventDirection::Downstream),
                    },
                };
                (name.to_string(), forwarder)
            })
            .collect();

        info!("Relay bootstrapped with {} entities", registry.len());
        Ok(Arc::new(Self {
            registry,
            pending: PendingCalls::new(transport.clone()),
            events: EventHub::new(transport.clone()),
            transport,
            forwarders,
        }))
    }

    /// The opaque capability handed to the client context.
    pub fn expose(self: &Arc<Self>) -> ProviderHandle {
        self.clone()
    }

    fn forwarder(&self, name: &str, expected: EntityKind) -> Result<&Forwarder> {
        let forwarder = self
            .forwarders
            .get(name)
            .ok_or_else(|| TetherError::NotPublished {
                name: name.to_string(),
            })?;
        if forwarder.kind() != expected {
            return Err(TetherError::KindMismatch {
                name: name.to_string(),
                expected,
            });
        }
        Ok(forwarder)
    }

    fn require_direction(
        &self,
        name: &str,
        direction: EventDirection,
        action: &'static str,
    ) -> Result<()> {
        match self.forwarder(name, EntityKind::Event)? {
            Forwarder::Event { direction: actual } if *actual == direction => Ok(()),
            _ => Err(TetherError::WrongDirection {
                name: name.to_string(),
                action,
            }),
        }
    }

    fn request(&self, channel: &str, request: InvocationRequest) -> Result<Value> {
        let reply = self.transport.send_sync(channel, request.into_payload())?;
        InvocationResult::from_payload(channel, reply)?.into_value(channel)
    }
}

impl Provider for Relay {
    fn registry(&self) -> &RegistrySnapshot {
        &self.registry
    }

    fn call_function(&self, name: &str, id: &str, args: Vec<Value>) -> Result<CallReply> {
        let Forwarder::Function { call, deferred } = self.forwarder(name, EntityKind::Function)?
        else {
            return Err(TetherError::KindMismatch {
                name: name.to_string(),
                expected: EntityKind::Function,
            });
        };

        // The waiter exists before the request leaves, so an early result is kept.
        let waiter = self.pending.register(deferred, id);
        let reply = self
            .transport
            .send_sync(call, InvocationRequest::with_id(args, id).into_payload())?;

        match InvocationResult::from_payload(call, reply)?.into_outcome(call)? {
            ResultOutcome::Value(value) => Ok(CallReply::Ready(value)),
            ResultOutcome::Deferred(channel) if channel == *deferred => {
                debug!("{} deferred to {} ({})", call, channel, id);
                Ok(CallReply::Deferred(waiter))
            }
            ResultOutcome::Deferred(channel) => Err(TetherError::protocol(
                call.as_str(),
                format!("unexpected deferred channel {}", channel),
            )),
        }
    }

    fn get_property(&self, name: &str) -> Result<Value> {
        let Forwarder::Property { get, .. } = self.forwarder(name, EntityKind::Property)? else {
            return Err(TetherError::KindMismatch {
                name: name.to_string(),
                expected: EntityKind::Property,
            });
        };
        self.request(get, InvocationRequest::new(Vec::new()))
    }

    fn set_property(&self, name: &str, value: Value) -> Result<()> {
        let Forwarder::Property { set, .. } = self.forwarder(name, EntityKind::Property)? else {
            return Err(TetherError::KindMismatch {
                name: name.to_string(),
                expected: EntityKind::Property,
            });
        };
        self.request(set, InvocationRequest::new(vec![value]))?;
        Ok(())
    }

    fn subscribe(
        &self,
        name: &str,
        mode: SubscribeMode,
        listener: EventListener,
    ) -> Result<Subscription> {
        self.require_direction(name, EventDirection::Downstream, "subscribed to")?;
        self.events.subscribe(name, mode, listener)
    }

    fn emit(&self, name: &str, emission: Emission) -> Result<()> {
        self.require_direction(name, EventDirection::Upstream, "emitted")?;
        self.events.emit(name, emission)
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("entities", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{FunctionOptions, Outcome, PropertyDescriptor, PropertyOptions, Publisher};
    use crate::registry::ScopeSet;
    use crate::transport::LoopbackBus;
    use serde_json::json;
    use std::sync::Mutex;

    type Emitted = std::result::Result<Value, String>;

    fn host(bus: &LoopbackBus) -> Publisher {
        Publisher::new(ProcessRole::Host, Arc::new(bus.host())).unwrap()
    }

    #[test]
    fn test_bootstrap_requires_intermediary_role() {
        let bus = LoopbackBus::new();
        let result = Relay::bootstrap(ProcessRole::Client, Arc::new(bus.connect()));
        assert!(matches!(result, Err(TetherError::WrongRole { .. })));
    }

    #[test]
    fn test_bootstrap_failures() {
        let bus = LoopbackBus::new();
        let result = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(bus.connect()));
        assert!(matches!(
            result,
            Err(TetherError::Transport { ref channel, .. }) if channel == "GET_PUBLIC_INFO"
        ));

        let _host = host(&bus);
        let closed = bus.connect();
        closed.close();
        let result = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(closed));
        assert!(matches!(result, Err(TetherError::Transport { .. })));

        let result = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(bus.connect()));
        assert!(matches!(result, Err(TetherError::NothingPublished)));
    }

    #[test]
    fn test_forwarding_checks_kind() {
        let bus = LoopbackBus::new();
        let publisher = host(&bus);
        publisher
            .publish_function("double", FunctionOptions::default(), |args| {
                Ok(Outcome::ready(args.get::<i64>(0)? * 2))
            })
            .unwrap();
        publisher
            .publish_variable(
                "count",
                PropertyDescriptor::constant(json!(3)),
                PropertyOptions::default(),
            )
            .unwrap();

        let relay = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(bus.connect())).unwrap();
        let reply = relay.call_function("double", "id-1", vec![json!(4)]).unwrap();
        assert_eq!(reply.into_ready(), Some(json!(8)));
        assert_eq!(relay.get_property("count").unwrap(), json!(3));

        assert!(matches!(
            relay.get_property("double"),
            Err(TetherError::KindMismatch { .. })
        ));
        assert!(matches!(
            relay.call_function("missing", "id-2", vec![]),
            Err(TetherError::NotPublished { .. })
        ));
    }

    #[test]
    fn test_event_subscription_and_direction() {
        let bus = LoopbackBus::new();
        let publisher = host(&bus);
        let tick = publisher.publish_host_event("tick", ScopeSet::all()).unwrap();
        publisher
            .publish_consumer_event("saved", ScopeSet::all(), None)
            .unwrap();

        let relay = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(bus.connect())).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        relay
            .subscribe(
                "tick",
                SubscribeMode::On,
                Arc::new(move |value: Emitted| sink.lock().unwrap().push(value)),
            )
            .unwrap();

        tick.emit(json!(1)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![Ok(json!(1))]);

        assert!(matches!(
            relay.subscribe("saved", SubscribeMode::On, Arc::new(|_: Emitted| {})),
            Err(TetherError::WrongDirection { .. })
        ));
        assert!(matches!(
            relay.emit("tick", Emission::Value(json!(1))),
            Err(TetherError::WrongDirection { .. })
        ));
    }
}
