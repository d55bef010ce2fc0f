//! What a resolved member name turns out to be.

use super::Bridge;
use crate::error::Result;
use crate::provider::CallReply;
use crate::registry::{Access, AccessSet, EventDirection};
use crate::subscription::Subscription;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;

/// Members every bridge has regardless of what the host published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceMember {
    As,
    Call,
    Get,
    Set,
    On,
    Once,
    Emit,
}

impl SurfaceMember {
    pub const ALL: [SurfaceMember; 7] = [
        SurfaceMember::As,
        SurfaceMember::Call,
        SurfaceMember::Get,
        SurfaceMember::Set,
        SurfaceMember::On,
        SurfaceMember::Once,
        SurfaceMember::Emit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceMember::As => "as",
            SurfaceMember::Call => "call",
            SurfaceMember::Get => "get",
            SurfaceMember::Set => "set",
            SurfaceMember::On => "on",
            SurfaceMember::Once => "once",
            SurfaceMember::Emit => "emit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|member| member.as_str() == name)
    }
}

/// A resolved member.
#[derive(Debug)]
pub enum Capability {
    Surface(SurfaceMember),
    Function(FunctionHandle),
    Property(PropertyHandle),
    Event(EventHandle),
}

impl Capability {
    pub fn into_function(self) -> Option<FunctionHandle> {
        match self {
            Capability::Function(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_property(self) -> Option<PropertyHandle> {
        match self {
            Capability::Property(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn into_event(self) -> Option<EventHandle> {
        match self {
            Capability::Event(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Callable forwarder for a published function.
#[derive(Debug, Clone)]
pub struct FunctionHandle {
    bridge: Bridge,
    name: String,
}

impl FunctionHandle {
    pub(super) fn new(bridge: Bridge, name: &str) -> Self {
        Self {
            bridge,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: Vec<Value>) -> Result<CallReply> {
        self.bridge.call(&self.name, args)
    }

    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        self.bridge.invoke(&self.name, args).await
    }
}

/// Accessor pair for a published property.
#[derive(Debug, Clone)]
pub struct PropertyHandle {
    bridge: Bridge,
    name: String,
    access: AccessSet,
}

impl PropertyHandle {
    pub(super) fn new(bridge: Bridge, name: &str, access: AccessSet) -> Self {
        Self {
            bridge,
            name: name.to_string(),
            access,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn can_read(&self) -> bool {
        self.access.contains(Access::Read)
    }

    pub fn can_write(&self) -> bool {
        self.access.contains(Access::Write)
    }

    pub fn get(&self) -> Result<Value> {
        self.bridge.get(&self.name)
    }

    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.bridge.get_as(&self.name)
    }

    pub fn set(&self, value: Value) -> Result<()> {
        self.bridge.set(&self.name, value)
    }
}

/// Subscribe or emit handle for a published event, depending on its direction.
#[derive(Debug, Clone)]
pub struct EventHandle {
    bridge: Bridge,
    name: String,
    direction: EventDirection,
}

impl EventHandle {
    pub(super) fn new(bridge: Bridge, name: &str, direction: EventDirection) -> Self {
        Self {
            bridge,
            name: name.to_string(),
            direction,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> EventDirection {
        self.direction
    }

    pub fn on<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(Result<Value>) + Send + Sync + 'static,
    {
        self.bridge.on(&self.name, listener)
    }

    pub fn once<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(Result<Value>) + Send + Sync + 'static,
    {
        self.bridge.once(&self.name, listener)
    }

    pub fn emit(&self, value: Value) -> Result<()> {
        self.bridge.emit(&self.name, value)
    }

    pub fn emit_deferred<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.bridge.emit_deferred(&self.name, future)
    }
}
