//! Tether - cross-process entity bridge.
//!
//! A privileged host process publishes functions, properties and events by
//! name. An intermediary fetches the host registry once and relays access over
//! named channels; a client sees only the capability the intermediary exposes.
//! Both consumers use a [`Bridge`], which checks scope, access and event
//! direction before any message is sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tether_core::{
//!     Bridge, FunctionOptions, LoopbackBus, Outcome, ProcessRole, Publisher, Relay,
//! };
//!
//! #[tokio::main]
//! async fn main() -> tether_core::Result<()> {
//!     let bus = LoopbackBus::new();
//!
//!     // Host
//!     let host = Publisher::new(ProcessRole::Host, Arc::new(bus.host()))?;
//!     host.publish_function("double", FunctionOptions::default(), |args| {
//!         Ok(Outcome::ready(args.get::<i64>(0)? * 2))
//!     })?;
//!
//!     // Intermediary, then client
//!     let relay = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(bus.connect()))?;
//!     let client = Bridge::connect(ProcessRole::Client, relay.expose())?;
//!
//!     let doubled = client.invoke("double", vec![21.into()]).await?;
//!     assert_eq!(doubled, 42);
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod channel;
pub mod config;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod publish;
pub mod registry;
pub mod relay;
pub mod subscription;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use bridge::{Bridge, Capability, Facade};
pub use channel::Channel;
pub use config::{BridgeConfig, ChannelConfig, ProcessRole};
pub use error::{ErrorCategory, Result, TetherError};
pub use provider::{CallReply, Emission, Provider, ProviderHandle};
pub use publish::{
    FunctionOptions, HostEvent, Outcome, PropertyDescriptor, PropertyOptions, Publisher,
};
pub use registry::{
    Access, AccessSet, EntityInfo, EntityKind, EventDirection, RegistrySnapshot, Scope, ScopeSet,
};
pub use relay::{DeferredResult, Relay};
pub use subscription::{SubscribeMode, Subscription};
pub use transfer::{to_transferable, Arg, Args, HasSnapshot, SnapshotType};
pub use transport::{ChannelTransport, Endpoint, HostTransport, LoopbackBus};
