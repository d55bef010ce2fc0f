//! Consumer-side proxy.
//!
//! A [`Bridge`] mirrors the host's published entities in the intermediary or
//! the client. Every access resolves the name against the registry fetched at
//! bootstrap and checks scope, kind, access and event direction locally, so a
//! request that would be refused never leaves the process.

mod capability;

pub use capability::{Capability, EventHandle, FunctionHandle, PropertyHandle, SurfaceMember};

use crate::config::ProcessRole;
use crate::error::{Result, TetherError};
use crate::provider::{CallReply, Emission, EventListener, ProviderHandle};
use crate::registry::{EntityInfo, EntityKind, EventDirection, RegistrySnapshot, Scope};
use crate::subscription::{SubscribeMode, Subscription};
use crate::transfer::{restore, HasSnapshot};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Typed view over a bridge.
///
/// Narrowing with [`Bridge::cast`] has no runtime effect; the facade decides
/// which names it forwards to.
pub trait Facade: Sized {
    fn wrap(bridge: Bridge) -> Self;
}

/// Proxy over a [`Provider`](crate::provider::Provider) for one consumer context.
#[derive(Clone)]
pub struct Bridge {
    provider: ProviderHandle,
    scope: Scope,
}

impl Bridge {
    /// Build the proxy for the context `role`. The host has no proxy.
    pub fn connect(role: ProcessRole, provider: ProviderHandle) -> Result<Self> {
        let Some(scope) = role.scope() else {
            return Err(TetherError::WrongRole {
                operation: "Connecting a bridge",
                expected: ProcessRole::Intermediary,
                actual: role,
            });
        };
        debug!(
            "Bridge connected in {} scope ({} entities)",
            scope,
            provider.registry().len()
        );
        Ok(Self { provider, scope })
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn registry(&self) -> &RegistrySnapshot {
        self.provider.registry()
    }

    /// Names of the entities visible in this context, sorted.
    pub fn members(&self) -> Vec<String> {
        self.registry().visible_names(self.scope)
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry()
            .get(name)
            .is_some_and(|info| info.is_visible_to(self.scope))
    }

    pub fn cast<T: Facade>(&self) -> T {
        T::wrap(self.clone())
    }

    /// Resolve a member name.
    ///
    /// Surface members take precedence over entities of the same name; those
    /// entities stay reachable through [`call`](Self::call), [`get`](Self::get)
    /// and friends.
    pub fn resolve(&self, name: &str) -> Result<Capability> {
        if let Some(member) = SurfaceMember::from_name(name) {
            return Ok(Capability::Surface(member));
        }
        let info = self.visible(name)?;
        Ok(match info.kind {
            EntityKind::Function => Capability::Function(FunctionHandle::new(self.clone(), name)),
            EntityKind::Property => Capability::Property(PropertyHandle::new(
                self.clone(),
                name,
                info.access.clone(),
            )),
            EntityKind::Event => Capability::Event(EventHandle::new(
                self.clone(),
                name,
                info.direction.unwrap_or(EventDirection::Downstream),
            )),
        })
    }

    fn visible(&self, name: &str) -> Result<&EntityInfo> {
        let info = self
            .registry()
            .get(name)
            .ok_or_else(|| TetherError::NotPublished {
                name: name.to_string(),
            })?;
        if !info.is_visible_to(self.scope) {
            return Err(TetherError::OutOfScope {
                name: name.to_string(),
                scope: self.scope,
            });
        }
        Ok(info)
    }

    fn entity(&self, name: &str, kind: EntityKind) -> Result<&EntityInfo> {
        let info = self.visible(name)?;
        if info.kind != kind {
            return Err(TetherError::KindMismatch {
                name: name.to_string(),
                expected: kind,
            });
        }
        Ok(info)
    }

    fn event(&self, name: &str, direction: EventDirection, action: &'static str) -> Result<()> {
        if !self.entity(name, EntityKind::Event)?.is_event(direction) {
            return Err(TetherError::WrongDirection {
                name: name.to_string(),
                action,
            });
        }
        Ok(())
    }

    /// Call a function with a fresh correlation id.
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<CallReply> {
        self.entity(name, EntityKind::Function)?;
        let id = Uuid::new_v4().to_string();
        self.provider.call_function(name, &id, args)
    }

    /// Call a function and wait for its value, deferred or not.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value> {
        self.call(name, args)?.settle().await
    }

    /// Call a function whose result is a snapshot of `T` and rebuild it.
    pub async fn invoke_restoring<T>(&self, name: &str, args: Vec<Value>) -> Result<T>
    where
        T: HasSnapshot + Default,
    {
        let value = self.invoke(name, args).await?;
        restore::<T>(value)
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        if !self.entity(name, EntityKind::Property)?.can_read() {
            return Err(TetherError::NoReadAccess {
                name: name.to_string(),
            });
        }
        self.provider.get_property(name)
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(name)?)?)
    }

    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        if !self.entity(name, EntityKind::Property)?.can_write() {
            return Err(TetherError::ReadOnly {
                name: name.to_string(),
            });
        }
        self.provider.set_property(name, value)
    }

    /// Listen to every emission of a host event.
    ///
    /// An error emission reaches the listener as [`TetherError::Remote`].
    pub fn on<F>(&self, name: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(Result<Value>) + Send + Sync + 'static,
    {
        self.subscribe(name, SubscribeMode::On, listener)
    }

    /// Listen to the next emission of a host event only.
    pub fn once<F>(&self, name: &str, listener: F) -> Result<Subscription>
    where
        F: Fn(Result<Value>) + Send + Sync + 'static,
    {
        self.subscribe(name, SubscribeMode::Once, listener)
    }

    fn subscribe<F>(&self, name: &str, mode: SubscribeMode, listener: F) -> Result<Subscription>
    where
        F: Fn(Result<Value>) + Send + Sync + 'static,
    {
        self.event(name, EventDirection::Downstream, "subscribed to")?;
        let channel = format!("event: {}", name);
        let forward: EventListener = Arc::new(move |emitted: std::result::Result<Value, String>| {
            listener(emitted.map_err(|message| TetherError::remote(channel.as_str(), message)))
        });
        self.provider.subscribe(name, mode, forward)
    }

    /// Emit a consumer event to the host.
    pub fn emit(&self, name: &str, value: Value) -> Result<()> {
        self.event(name, EventDirection::Upstream, "emitted")?;
        self.provider.emit(name, Emission::Value(value))
    }

    /// Emit a consumer event once `future` settles; an error is emitted as an error.
    pub fn emit_deferred<F>(&self, name: &str, future: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.event(name, EventDirection::Upstream, "emitted")?;
        self.provider.emit(name, Emission::Deferred(future.boxed()))
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("scope", &self.scope)
            .field("entities", &self.registry().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Provider;
    use crate::registry::{AccessSet, Registry, ScopeSet};
    use serde_json::json;
    use std::sync::Mutex;

    /// Provider that records what reaches it.
    #[derive(Default)]
    struct RecordingProvider {
        registry: RegistrySnapshot,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingProvider {
        fn with(registry: Registry) -> Arc<Self> {
            Arc::new(Self {
                registry: registry.snapshot(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn record(&self, entry: String) {
            self.calls.lock().unwrap().push(entry);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Provider for RecordingProvider {
        fn registry(&self) -> &RegistrySnapshot {
            &self.registry
        }

        fn call_function(&self, name: &str, id: &str, args: Vec<Value>) -> Result<CallReply> {
            self.record(format!("call {}", name));
            assert!(Uuid::parse_str(id).is_ok());
            Ok(CallReply::Ready(Value::Array(args)))
        }

        fn get_property(&self, name: &str) -> Result<Value> {
            self.record(format!("get {}", name));
            Ok(json!("value"))
        }

        fn set_property(&self, name: &str, _value: Value) -> Result<()> {
            self.record(format!("set {}", name));
            Ok(())
        }

        fn subscribe(
            &self,
            name: &str,
            _mode: SubscribeMode,
            listener: EventListener,
        ) -> Result<Subscription> {
            self.record(format!("subscribe {}", name));
            listener(Err("went wrong".to_string()));
            Ok(Subscription::new(|| {}))
        }

        fn emit(&self, name: &str, _emission: Emission) -> Result<()> {
            self.record(format!("emit {}", name));
            Ok(())
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.insert("double", EntityInfo::function(ScopeSet::all()));
        registry.insert("secret", EntityInfo::function(ScopeSet::only(Scope::Intermediary)));
        registry.insert(
            "version",
            EntityInfo::property(ScopeSet::all(), AccessSet::read_only()),
        );
        registry.insert(
            "token",
            EntityInfo::property(ScopeSet::all(), AccessSet::write_only()),
        );
        registry.insert(
            "tick",
            EntityInfo::event(EventDirection::Downstream, ScopeSet::all()),
        );
        registry.insert(
            "saved",
            EntityInfo::event(EventDirection::Upstream, ScopeSet::all()),
        );
        registry.insert("call", EntityInfo::function(ScopeSet::all()));
        registry
    }

    fn client(provider: &Arc<RecordingProvider>) -> Bridge {
        Bridge::connect(ProcessRole::Client, provider.clone()).unwrap()
    }

    #[test]
    fn test_connect_rejects_host() {
        let provider = RecordingProvider::with(registry());
        assert!(matches!(
            Bridge::connect(ProcessRole::Host, provider),
            Err(TetherError::WrongRole { .. })
        ));
    }

    #[test]
    fn test_members_are_scope_visible_names() {
        let provider = RecordingProvider::with(registry());
        let bridge = client(&provider);
        assert_eq!(
            bridge.members(),
            vec!["call", "double", "saved", "tick", "token", "version"]
        );
        assert!(!bridge.has("secret"));

        let intermediary = Bridge::connect(ProcessRole::Intermediary, provider).unwrap();
        assert!(intermediary.has("secret"));
    }

    #[test]
    fn test_out_of_scope_call_sends_nothing() {
        let provider = RecordingProvider::with(registry());
        let bridge = client(&provider);
        assert!(matches!(
            bridge.call("secret", vec![]),
            Err(TetherError::OutOfScope {
                scope: Scope::Client,
                ..
            })
        ));
        assert!(matches!(
            bridge.call("nope", vec![]),
            Err(TetherError::NotPublished { .. })
        ));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_property_access_checked_locally() {
        let provider = RecordingProvider::with(registry());
        let bridge = client(&provider);

        assert!(matches!(
            bridge.set("version", json!("2.0")),
            Err(TetherError::ReadOnly { .. })
        ));
        assert!(matches!(
            bridge.get("token"),
            Err(TetherError::NoReadAccess { .. })
        ));
        assert!(matches!(
            bridge.get("double"),
            Err(TetherError::KindMismatch { .. })
        ));
        assert!(provider.calls().is_empty());

        assert_eq!(bridge.get_as::<String>("version").unwrap(), "value");
        bridge.set("token", json!("abc")).unwrap();
        assert_eq!(provider.calls(), vec!["get version", "set token"]);
    }

    #[test]
    fn test_event_direction_checked_locally() {
        let provider = RecordingProvider::with(registry());
        let bridge = client(&provider);

        assert!(matches!(
            bridge.emit("tick", json!(1)),
            Err(TetherError::WrongDirection { .. })
        ));
        assert!(matches!(
            bridge.on("saved", |_| {}),
            Err(TetherError::WrongDirection { .. })
        ));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_error_emission_reaches_listener_as_remote_error() {
        let provider = RecordingProvider::with(registry());
        let bridge = client(&provider);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bridge
            .on("tick", move |emitted| sink.lock().unwrap().push(emitted.unwrap_err().to_string()))
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["Error on event: tick: went wrong".to_string()]
        );
    }

    #[test]
    fn test_resolve_prefers_surface_members() {
        let provider = RecordingProvider::with(registry());
        let bridge = client(&provider);

        assert!(matches!(
            bridge.resolve("call").unwrap(),
            Capability::Surface(SurfaceMember::Call)
        ));
        assert!(matches!(
            bridge.resolve("double").unwrap(),
            Capability::Function(_)
        ));
        assert!(matches!(
            bridge.resolve("secret"),
            Err(TetherError::OutOfScope { .. })
        ));

        // Shadowed entities stay reachable through the generic surface.
        let reply = bridge.call("call", vec![json!(1)]).unwrap();
        assert_eq!(reply.into_ready(), Some(json!([1])));
    }

    #[tokio::test]
    async fn test_cast_to_facade() {
        struct Api {
            bridge: Bridge,
        }

        impl Facade for Api {
            fn wrap(bridge: Bridge) -> Self {
                Self { bridge }
            }
        }

        impl Api {
            async fn double(&self, x: i64) -> Result<Value> {
                self.bridge.invoke("double", vec![json!(x)]).await
            }
        }

        let provider = RecordingProvider::with(registry());
        let api: Api = client(&provider).cast();
        assert_eq!(api.double(4).await.unwrap(), json!([4]));
    }
}
