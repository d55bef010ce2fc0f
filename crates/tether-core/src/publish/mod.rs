//! Host-side publishing.
//!
//! A [`Publisher`] owns the host registry and installs one transport handler
//! per channel for everything it publishes. Publishing the same name again
//! replaces both the registry record and the handlers.

mod events;
pub(crate) mod outcome;

pub use events::HostListener;
pub use outcome::Outcome;

use crate::channel::Channel;
use crate::config::ProcessRole;
use crate::error::{Result, TetherError};
use crate::protocol::{InvocationRequest, InvocationResult};
use crate::registry::{
    AccessSet, EntityInfo, EntityKind, EventDirection, Registry, RegistrySnapshot, ScopeSet,
};
use crate::subscription::{SubscribeMode, Subscription};
use crate::transfer::{prepare_args, prepare_value, Arg, Args, SnapshotType};
use crate::transport::{EndpointRef, HostTransport, IncomingMessage};
use events::{EndpointSubscriptions, HostListeners};
use futures::future::BoxFuture;
use futures::FutureExt;
use outcome::{catch_failure, runtime_handle, settle};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, info, warn};

/// Host implementation of a published function.
pub type FunctionImpl = Arc<dyn Fn(Args) -> anyhow::Result<Outcome> + Send + Sync>;

pub type Getter = Arc<dyn Fn() -> anyhow::Result<Value> + Send + Sync>;

pub type Setter = Arc<dyn Fn(Value) -> anyhow::Result<()> + Send + Sync>;

/// Options for [`Publisher::publish_function`].
#[derive(Debug, Clone, Default)]
pub struct FunctionOptions {
    pub scope: ScopeSet,
    /// Snapshot types to rebuild, consumed in order: one per argument that
    /// arrives as a snapshot envelope, wherever it sits in the list.
    pub receives: Vec<SnapshotType>,
}

/// Accessors backing a published property.
#[derive(Clone, Default)]
pub struct PropertyDescriptor {
    get: Option<Getter>,
    set: Option<Setter>,
}

impl PropertyDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// A read-only property with a fixed value.
    pub fn constant(value: Value) -> Self {
        Self::new().getter(move || Ok(value.clone()))
    }

    pub fn getter<F>(mut self, get: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.get = Some(Arc::new(get));
        self
    }

    pub fn setter<F>(mut self, set: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }

    pub fn has_getter(&self) -> bool {
        self.get.is_some()
    }

    pub fn has_setter(&self) -> bool {
        self.set.is_some()
    }
}

/// Options for [`Publisher::publish_variable`].
#[derive(Debug, Clone, Default)]
pub struct PropertyOptions {
    pub scope: ScopeSet,
    /// Explicit access. Derived from the descriptor's accessors when `None`.
    pub access: Option<AccessSet>,
}

struct PublisherState {
    transport: Arc<dyn HostTransport>,
    registry: RwLock<Registry>,
    subscriptions: Mutex<EndpointSubscriptions>,
    listeners: Mutex<HostListeners>,
}

impl PublisherState {
    /// Record `info` under `name`. Handlers and subscribers left over from a
    /// previous record of another kind or direction are dropped.
    fn register(&self, name: &str, info: EntityInfo) {
        let kind = info.kind;
        let served = served_channels(name, &info);
        let upstream = info.is_event(EventDirection::Upstream);
        let downstream = info.is_event(EventDirection::Downstream);
        let previous = self
            .registry
            .write()
            .expect("registry lock poisoned")
            .insert(name, info);

        let Some(previous) = previous else {
            info!("Published {} '{}'", kind, name);
            return;
        };
        for channel in served_channels(name, &previous) {
            if !served.contains(&channel) {
                self.transport.remove_handler(&channel);
                debug!("Removed stale handler for {}", channel);
            }
        }
        if previous.is_event(EventDirection::Upstream) && !upstream {
            self.listeners
                .lock()
                .expect("listeners lock poisoned")
                .clear(name);
        }
        if previous.is_event(EventDirection::Downstream) && !downstream {
            self.subscriptions
                .lock()
                .expect("subscriptions lock poisoned")
                .clear(name);
        }
        info!("Re-published {} '{}'", kind, name);
    }

    fn snapshot(&self) -> RegistrySnapshot {
        self.registry.read().expect("registry lock poisoned").snapshot()
    }

    fn require_event(&self, name: &str, direction: EventDirection, action: &'static str) -> Result<()> {
        let registry = self.registry.read().expect("registry lock poisoned");
        let Some(info) = registry.get(name) else {
            return Err(TetherError::NotPublished {
                name: name.to_string(),
            });
        };
        if info.kind != EntityKind::Event {
            return Err(TetherError::KindMismatch {
                name: name.to_string(),
                expected: EntityKind::Event,
            });
        }
        if info.direction != Some(direction) {
            return Err(TetherError::WrongDirection {
                name: name.to_string(),
                action,
            });
        }
        Ok(())
    }

    fn handle_subscription(
        &self,
        channel: &str,
        mode: SubscribeMode,
        message: IncomingMessage,
    ) -> InvocationResult {
        let request = match InvocationRequest::from_payload(channel, message.payload) {
            Ok(request) => request,
            Err(e) => return InvocationResult::with_error(e.to_string(), None),
        };
        let id = request.id;
        let Some(name) = request.args.first().and_then(Value::as_str) else {
            return InvocationResult::with_error("missing event name", id);
        };
        if let Err(e) = self.require_event(name, EventDirection::Downstream, "subscribed to") {
            return InvocationResult::with_error(e.to_string(), id);
        }

        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .add(name, mode, message.sender.clone());
        debug!(
            "Endpoint {:?} subscribed to '{}' ({:?})",
            message.sender.id(),
            name,
            mode
        );
        InvocationResult::with_value(Value::Null, id)
    }

    /// Push one emission to every subscribed endpoint; returns the number reached.
    fn broadcast(&self, name: &str, result: InvocationResult) -> usize {
        let recipients = self
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .take_recipients(name);
        let channel = Channel::event_emit(name);
        let payload = result.into_payload();

        let mut delivered = 0;
        for endpoint in recipients {
            match endpoint.send(&channel, payload.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("Emission of '{}' not delivered: {}", name, e),
            }
        }
        delivered
    }

    fn dispatch_upstream(&self, name: &str, arg: &Arg) {
        let listeners = self
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .take_for_dispatch(name);
        for listener in listeners {
            if let Err(description) = catch_failure(|| {
                listener(arg);
                Ok(())
            }) {
                warn!("Listener for '{}' failed: {}", name, description);
            }
        }
    }
}

/// Host-side entry point: publishes entities and serves them to consumers.
#[derive(Clone)]
pub struct Publisher {
    state: Arc<PublisherState>,
}

impl Publisher {
    /// Create the publisher and start answering registry and subscription requests.
    pub fn new(role: ProcessRole, transport: Arc<dyn HostTransport>) -> Result<Self> {
        if role != ProcessRole::Host {
            return Err(TetherError::WrongRole {
                operation: "Publishing",
                expected: ProcessRole::Host,
                actual: role,
            });
        }

        let publisher = Self {
            state: Arc::new(PublisherState {
                transport,
                registry: RwLock::new(Registry::new()),
                subscriptions: Mutex::new(EndpointSubscriptions::default()),
                listeners: Mutex::new(HostListeners::default()),
            }),
        };
        publisher.install_core_handlers();
        info!("Publisher ready");
        Ok(publisher)
    }

    fn install_core_handlers(&self) {
        let transport = &self.state.transport;

        let state = Arc::downgrade(&self.state);
        transport.set_handler(
            Channel::public_info(),
            Arc::new(move |_message: IncomingMessage| {
                let state = state.upgrade()?;
                let result = match serde_json::to_value(state.snapshot()) {
                    Ok(value) => InvocationResult::with_value(value, None),
                    Err(e) => InvocationResult::with_error(e.to_string(), None),
                };
                Some(result.into_payload())
            }),
        );

        for (channel, mode) in [
            (Channel::event_on(), SubscribeMode::On),
            (Channel::event_once(), SubscribeMode::Once),
        ] {
            let state = Arc::downgrade(&self.state);
            transport.set_handler(
                channel,
                Arc::new(move |message: IncomingMessage| {
                    let state = state.upgrade()?;
                    Some(state.handle_subscription(channel, mode, message).into_payload())
                }),
            );
        }
    }

    /// Copy of the registry as consumers will see it.
    pub fn registry_snapshot(&self) -> RegistrySnapshot {
        self.state.snapshot()
    }

    /// Publish a callable function.
    ///
    /// The implementation's errors and panics are reported to the caller as
    /// error replies. A [`Outcome::Deferred`] result is settled on the current
    /// tokio runtime and pushed to the calling context only.
    pub fn publish_function<F>(&self, name: &str, options: FunctionOptions, implementation: F) -> Result<()>
    where
        F: Fn(Args) -> anyhow::Result<Outcome> + Send + Sync + 'static,
    {
        Channel::validate_name(name)?;
        let channel = Channel::function_call(name);
        let implementation: FunctionImpl = Arc::new(implementation);
        let receives = options.receives;

        let handler_channel = channel.clone();
        self.state.transport.set_handler(
            &channel,
            Arc::new(move |message: IncomingMessage| {
                Some(invoke_function(&handler_channel, &implementation, &receives, message).into_payload())
            }),
        );
        self.state.register(name, EntityInfo::function(options.scope));
        Ok(())
    }

    /// Publish a property backed by the descriptor's accessors.
    ///
    /// Both get and set channels are always served; a missing accessor
    /// answers with an error.
    pub fn publish_variable(
        &self,
        name: &str,
        descriptor: PropertyDescriptor,
        options: PropertyOptions,
    ) -> Result<()> {
        Channel::validate_name(name)?;
        let access = options
            .access
            .unwrap_or_else(|| AccessSet::derived(descriptor.has_getter(), descriptor.has_setter()));

        let get_channel = Channel::property_get(name);
        let getter = descriptor.get;
        let property = name.to_string();
        let handler_channel = get_channel.clone();
        self.state.transport.set_handler(
            &get_channel,
            Arc::new(move |message: IncomingMessage| {
                let id = request_id(&handler_channel, message.payload);
                let result = match &getter {
                    Some(getter) => match catch_failure(|| getter()) {
                        Ok(value) => InvocationResult::with_value(value, id),
                        Err(description) => InvocationResult::with_error(description, id),
                    },
                    None => InvocationResult::with_error(
                        format!("Property '{}' has no getter", property),
                        id,
                    ),
                };
                Some(result.into_payload())
            }),
        );

        let set_channel = Channel::property_set(name);
        let setter = descriptor.set;
        let property = name.to_string();
        let handler_channel = set_channel.clone();
        self.state.transport.set_handler(
            &set_channel,
            Arc::new(move |message: IncomingMessage| {
                let request = match InvocationRequest::from_payload(&handler_channel, message.payload) {
                    Ok(request) => request,
                    Err(e) => return Some(InvocationResult::with_error(e.to_string(), None).into_payload()),
                };
                let id = request.id;
                let value = request.args.into_iter().next().unwrap_or(Value::Null);
                let result = match &setter {
                    Some(setter) => match catch_failure(|| setter(value)) {
                        Ok(()) => InvocationResult::with_value(Value::Null, id),
                        Err(description) => InvocationResult::with_error(description, id),
                    },
                    None => InvocationResult::with_error(
                        format!("Property '{}' has no setter", property),
                        id,
                    ),
                };
                Some(result.into_payload())
            }),
        );

        self.state.register(name, EntityInfo::property(options.scope, access));
        Ok(())
    }

    /// Publish an event the host emits and consumers subscribe to.
    pub fn publish_host_event(&self, name: &str, scope: ScopeSet) -> Result<HostEvent> {
        Channel::validate_name(name)?;
        self.state
            .register(name, EntityInfo::event(EventDirection::Downstream, scope));
        Ok(HostEvent {
            name: name.to_string(),
            state: self.state.clone(),
        })
    }

    /// Emit a previously published host event by name.
    ///
    /// Returns the number of contexts the emission reached.
    pub fn emit(&self, name: &str, value: Value) -> Result<usize> {
        self.state
            .require_event(name, EventDirection::Downstream, "emitted by the host")?;
        Ok(self.state.broadcast(name, InvocationResult::with_value(value, None)))
    }

    /// Publish an event consumers emit and the host listens to.
    ///
    /// When `receives` is set, a snapshot envelope in the emitted value is
    /// rebuilt before listeners see it.
    pub fn publish_consumer_event(
        &self,
        name: &str,
        scope: ScopeSet,
        receives: Option<SnapshotType>,
    ) -> Result<()> {
        Channel::validate_name(name)?;
        let channel = Channel::event_emit(name);
        let event = name.to_string();
        let handler_channel = channel.clone();
        let state = Arc::downgrade(&self.state);

        self.state.transport.set_handler(
            &channel,
            Arc::new(move |message: IncomingMessage| {
                let state = state.upgrade()?;
                receive_emission(&state, &event, &handler_channel, receives.as_ref(), message.payload);
                Some(InvocationResult::with_value(Value::Null, None).into_payload())
            }),
        );
        self.state
            .register(name, EntityInfo::event(EventDirection::Upstream, scope));
        Ok(())
    }

    /// Listen to every emission of a consumer event.
    pub fn on<F>(&self, name: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(&Arg) + Send + Sync + 'static,
    {
        self.listen(name, SubscribeMode::On, Arc::new(listener))
    }

    /// Listen to the next emission of a consumer event only.
    pub fn once<F>(&self, name: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(&Arg) + Send + Sync + 'static,
    {
        self.listen(name, SubscribeMode::Once, Arc::new(listener))
    }

    fn listen(&self, name: &str, mode: SubscribeMode, listener: HostListener) -> Result<Subscription> {
        self.state
            .require_event(name, EventDirection::Upstream, "listened to on the host")?;
        let id = self
            .state
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .add(name, mode, listener);

        let state: Weak<PublisherState> = Arc::downgrade(&self.state);
        let event = name.to_string();
        Ok(Subscription::new(move || {
            if let Some(state) = state.upgrade() {
                state
                    .listeners
                    .lock()
                    .expect("listeners lock poisoned")
                    .remove(&event, id);
            }
        }))
    }

    /// Number of live contexts subscribed to a host event.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.state
            .subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .subscriber_count(name)
    }
}

/// Emitter for a published host event.
#[derive(Clone)]
pub struct HostEvent {
    name: String,
    state: Arc<PublisherState>,
}

impl HostEvent {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn require_published(&self) -> Result<()> {
        self.state
            .require_event(&self.name, EventDirection::Downstream, "emitted by the host")
    }

    /// Push `value` to every subscribed context. Returns the number reached.
    ///
    /// Fails once the name has been re-published as something other than a
    /// host event.
    pub fn emit(&self, value: Value) -> Result<usize> {
        self.require_published()?;
        Ok(self
            .state
            .broadcast(&self.name, InvocationResult::with_value(value, None)))
    }

    /// Settle `future` on the current runtime, then push its value, or its
    /// error as an error emission.
    pub fn emit_deferred<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.require_published()?;
        let runtime = runtime_handle().map_err(TetherError::Other)?;
        let state = self.state.clone();
        let name = self.name.clone();
        let future: BoxFuture<'static, anyhow::Result<Value>> = future.boxed();
        runtime.spawn(async move {
            let result = match settle(future).await {
                Ok(value) => InvocationResult::with_value(value, None),
                Err(description) => {
                    debug!("Deferred emission of '{}' failed: {}", name, description);
                    InvocationResult::with_error(description, None)
                }
            };
            if let Err(e) = state.require_event(&name, EventDirection::Downstream, "emitted by the host") {
                debug!("Dropping deferred emission: {}", e);
                return;
            }
            state.broadcast(&name, result);
        });
        Ok(())
    }
}

impl std::fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEvent").field("name", &self.name).finish()
    }
}

/// Channels the host serves a handler on for an entity.
fn served_channels(name: &str, info: &EntityInfo) -> Vec<String> {
    match info.kind {
        EntityKind::Function => vec![Channel::function_call(name)],
        EntityKind::Property => vec![Channel::property_get(name), Channel::property_set(name)],
        EntityKind::Event if info.is_event(EventDirection::Upstream) => {
            vec![Channel::event_emit(name)]
        }
        EntityKind::Event => Vec::new(),
    }
}

fn request_id(channel: &str, payload: Value) -> Option<String> {
    InvocationRequest::from_payload(channel, payload)
        .ok()
        .and_then(|request| request.id)
}

fn invoke_function(
    channel: &str,
    implementation: &FunctionImpl,
    receives: &[SnapshotType],
    message: IncomingMessage,
) -> InvocationResult {
    let request = match InvocationRequest::from_payload(channel, message.payload) {
        Ok(request) => request,
        Err(e) => return InvocationResult::with_error(e.to_string(), None),
    };
    let id = request.id;
    let args = request.args;

    let outcome = catch_failure(|| {
        let args = prepare_args(args, receives)?;
        implementation(args)
    });

    match outcome {
        Ok(Outcome::Ready(value)) => InvocationResult::with_value(value, id),
        Ok(Outcome::Deferred(future)) => {
            let deferred = Channel::deferred(channel);
            match spawn_settlement(future, message.sender, deferred.clone(), id.clone()) {
                Ok(()) => InvocationResult::with_deferred(deferred, id),
                Err(description) => InvocationResult::with_error(description, id),
            }
        }
        Err(description) => {
            debug!("{} failed: {}", channel, description);
            InvocationResult::with_error(description, id)
        }
    }
}

/// Settle a deferred function result and push it to the caller only.
fn spawn_settlement(
    future: BoxFuture<'static, anyhow::Result<Value>>,
    sender: EndpointRef,
    channel: String,
    id: Option<String>,
) -> std::result::Result<(), String> {
    let runtime = runtime_handle()?;
    runtime.spawn(async move {
        let result = match settle(future).await {
            Ok(value) => InvocationResult::with_value(value, id),
            Err(description) => InvocationResult::with_error(description, id),
        };
        if let Err(e) = sender.send(&channel, result.into_payload()) {
            debug!("Deferred result on {} not delivered: {}", channel, e);
        }
    });
    Ok(())
}

fn receive_emission(
    state: &PublisherState,
    event: &str,
    channel: &str,
    receives: Option<&SnapshotType>,
    payload: Value,
) {
    let result = match InvocationResult::from_payload(channel, payload) {
        Ok(result) => result,
        Err(e) => {
            warn!("Ignoring emission of '{}': {}", event, e);
            return;
        }
    };
    let value = match result.into_value(channel) {
        Ok(value) => value,
        Err(e) => {
            warn!("Consumer emitted an error for '{}': {}", event, e);
            return;
        }
    };
    match prepare_value(value, receives) {
        Ok(arg) => state.dispatch_upstream(event, &arg),
        Err(e) => warn!("Ignoring emission of '{}': {}", event, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Scope;
    use crate::transport::{ChannelTransport, LoopbackBus};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn publisher(bus: &LoopbackBus) -> Publisher {
        Publisher::new(ProcessRole::Host, Arc::new(bus.host())).unwrap()
    }

    #[test]
    fn test_publisher_requires_host_role() {
        let bus = LoopbackBus::new();
        let result = Publisher::new(ProcessRole::Client, Arc::new(bus.host()));
        assert!(matches!(
            result,
            Err(TetherError::WrongRole {
                actual: ProcessRole::Client,
                ..
            })
        ));
    }

    #[test]
    fn test_public_info_reflects_publications() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_function("double", FunctionOptions::default(), |args| {
            Ok(Outcome::ready(args.get::<i64>(0)? * 2))
        })
        .unwrap();
        host.publish_variable(
            "version",
            PropertyDescriptor::constant(json!("1.0")),
            PropertyOptions {
                scope: ScopeSet::only(Scope::Client),
                access: None,
            },
        )
        .unwrap();

        let port = bus.connect();
        let reply = port.send_sync(Channel::public_info(), Value::Null).unwrap();
        let snapshot: RegistrySnapshot =
            serde_json::from_value(reply["value"].clone()).unwrap();
        assert_eq!(snapshot, host.registry_snapshot());
        assert!(snapshot.get("version").unwrap().can_read());
        assert!(!snapshot.get("version").unwrap().can_write());
    }

    #[test]
    fn test_function_reply_echoes_id_and_reports_errors() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_function("fail", FunctionOptions::default(), |_| {
            Err(anyhow::anyhow!("boom"))
        })
        .unwrap();
        host.publish_function("double", FunctionOptions::default(), |args| {
            Ok(Outcome::ready(args.get::<i64>(0)? * 2))
        })
        .unwrap();

        let port = bus.connect();
        let ok = port
            .send_sync(
                &Channel::function_call("double"),
                InvocationRequest::with_id(vec![json!(21)], "abc").into_payload(),
            )
            .unwrap();
        assert_eq!(ok, json!({"value": 42, "id": "abc"}));

        let err = port
            .send_sync(&Channel::function_call("fail"), InvocationRequest::new(vec![]).into_payload())
            .unwrap();
        assert_eq!(err, json!({"error": "boom"}));
    }

    #[test]
    fn test_republish_replaces_metadata_and_handler() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_function("f", FunctionOptions::default(), |_| Ok(Outcome::ready(1)))
            .unwrap();
        host.publish_function(
            "f",
            FunctionOptions {
                scope: ScopeSet::only(Scope::Intermediary),
                receives: Vec::new(),
            },
            |_| Ok(Outcome::ready(2)),
        )
        .unwrap();

        let info = host.registry_snapshot().get("f").cloned().unwrap();
        assert_eq!(info.scope, ScopeSet::only(Scope::Intermediary));

        let port = bus.connect();
        let reply = port
            .send_sync(&Channel::function_call("f"), Value::Null)
            .unwrap();
        assert_eq!(reply["value"], json!(2));
    }

    #[test]
    fn test_republish_as_other_kind_drops_old_handlers() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_function("x", FunctionOptions::default(), |_| {
            Ok(Outcome::ready("old function"))
        })
        .unwrap();
        host.publish_variable(
            "x",
            PropertyDescriptor::constant(json!("property")),
            PropertyOptions::default(),
        )
        .unwrap();

        let info = host.registry_snapshot().get("x").cloned().unwrap();
        assert_eq!(info.kind, EntityKind::Property);

        let port = bus.connect();
        assert!(matches!(
            port.send_sync(&Channel::function_call("x"), Value::Null),
            Err(TetherError::Transport { .. })
        ));
        let reply = port
            .send_sync(&Channel::property_get("x"), Value::Null)
            .unwrap();
        assert_eq!(reply["value"], json!("property"));

        host.publish_function("x", FunctionOptions::default(), |_| Ok(Outcome::ready(1)))
            .unwrap();
        assert!(matches!(
            port.send_sync(&Channel::property_get("x"), Value::Null),
            Err(TetherError::Transport { .. })
        ));
    }

    #[test]
    fn test_republish_with_other_direction_drops_listeners() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_consumer_event("e", ScopeSet::all(), None).unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        host.on("e", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let event = host.publish_host_event("e", ScopeSet::all()).unwrap();
        let port = bus.connect();
        port.send(
            &Channel::event_emit("e"),
            InvocationResult::with_value(json!(1), None).into_payload(),
        )
        .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        port.send_sync(
            Channel::event_on(),
            InvocationRequest::new(vec![json!("e")]).into_payload(),
        )
        .unwrap();
        assert_eq!(host.subscriber_count("e"), 1);

        // Back to a consumer event: the old emitter and its subscribers are gone.
        host.publish_consumer_event("e", ScopeSet::all(), None).unwrap();
        assert_eq!(host.subscriber_count("e"), 0);
        assert!(matches!(
            event.emit(json!(2)),
            Err(TetherError::WrongDirection { .. })
        ));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        let result = host.publish_host_event("tick_PROMISE", ScopeSet::all());
        assert!(matches!(result, Err(TetherError::InvalidName { .. })));
        assert!(host.registry_snapshot().is_empty());
    }

    #[test]
    fn test_missing_setter_answers_error() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_variable(
            "theme",
            PropertyDescriptor::constant(json!("dark")),
            PropertyOptions {
                scope: ScopeSet::all(),
                access: Some(AccessSet::read_write()),
            },
        )
        .unwrap();

        let port = bus.connect();
        let reply = port
            .send_sync(
                &Channel::property_set("theme"),
                InvocationRequest::new(vec![json!("light")]).into_payload(),
            )
            .unwrap();
        assert_eq!(reply["error"], json!("Property 'theme' has no setter"));
    }

    #[test]
    fn test_subscription_requires_downstream_event() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_consumer_event("saved", ScopeSet::all(), None)
            .unwrap();

        let port = bus.connect();
        let reply = port
            .send_sync(
                Channel::event_on(),
                InvocationRequest::new(vec![json!("saved")]).into_payload(),
            )
            .unwrap();
        assert!(reply["error"].is_string());

        let reply = port
            .send_sync(
                Channel::event_on(),
                InvocationRequest::new(vec![json!("unknown")]).into_payload(),
            )
            .unwrap();
        assert!(reply["error"].is_string());
    }

    #[test]
    fn test_host_event_emission_reaches_subscribers() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        let tick = host.publish_host_event("tick", ScopeSet::all()).unwrap();

        let port = bus.connect();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        port.listen(
            &Channel::event_emit("tick"),
            Arc::new(move |payload: Value| sink.lock().unwrap().push(payload)),
        );
        port.send_sync(
            Channel::event_once(),
            InvocationRequest::new(vec![json!("tick")]).into_payload(),
        )
        .unwrap();

        assert_eq!(host.subscriber_count("tick"), 1);
        assert_eq!(tick.emit(json!(1)).unwrap(), 1);
        assert_eq!(tick.emit(json!(2)).unwrap(), 0);
        assert_eq!(*received.lock().unwrap(), vec![json!({"value": 1})]);

        assert!(matches!(
            host.emit("missing", Value::Null),
            Err(TetherError::NotPublished { .. })
        ));
    }

    #[test]
    fn test_consumer_emission_reaches_host_listeners() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_consumer_event("saved", ScopeSet::all(), None)
            .unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let subscription = host
            .on("saved", move |arg| {
                assert_eq!(arg.as_value(), Some(&json!("doc")));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let port = bus.connect();
        let channel = Channel::event_emit("saved");
        port.send(&channel, InvocationResult::with_value(json!("doc"), None).into_payload())
            .unwrap();
        port.send(&channel, InvocationResult::with_error("bad", None).into_payload())
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        port.send(&channel, InvocationResult::with_value(json!("doc"), None).into_payload())
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_host_cannot_listen_to_own_event() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_host_event("tick", ScopeSet::all()).unwrap();
        assert!(matches!(
            host.on("tick", |_| {}),
            Err(TetherError::WrongDirection { .. })
        ));
    }

    #[tokio::test]
    async fn test_deferred_result_goes_to_caller_only() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_function("slow", FunctionOptions::default(), |_| {
            Ok(Outcome::deferred(async { Ok(json!("done")) }))
        })
        .unwrap();

        let caller = bus.connect();
        let bystander = bus.connect();
        let deferred_channel = Channel::deferred(&Channel::function_call("slow"));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let caller_tx = tx.clone();
        caller.listen(
            &deferred_channel,
            Arc::new(move |payload: Value| {
                let _ = caller_tx.send(("caller", payload));
            }),
        );
        bystander.listen(
            &deferred_channel,
            Arc::new(move |payload: Value| {
                let _ = tx.send(("bystander", payload));
            }),
        );

        let reply = caller
            .send_sync(
                &Channel::function_call("slow"),
                InvocationRequest::with_id(vec![], "call-1").into_payload(),
            )
            .unwrap();
        assert_eq!(
            reply,
            json!({"deferredChannel": deferred_channel, "id": "call-1"})
        );

        let (who, payload) = rx.recv().await.unwrap();
        assert_eq!(who, "caller");
        assert_eq!(payload, json!({"value": "done", "id": "call-1"}));
    }

    #[test]
    fn test_deferred_without_runtime_is_an_error_reply() {
        let bus = LoopbackBus::new();
        let host = publisher(&bus);
        host.publish_function("slow", FunctionOptions::default(), |_| {
            Ok(Outcome::deferred(async { Ok(Value::Null) }))
        })
        .unwrap();

        let reply = bus
            .connect()
            .send_sync(&Channel::function_call("slow"), Value::Null)
            .unwrap();
        assert!(reply["error"].as_str().unwrap().contains("no async runtime"));
    }
}
