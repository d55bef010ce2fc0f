//! Host side of the demo: what gets published and how it is backed.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::{
    AccessSet, FunctionOptions, HasSnapshot, HostEvent, LoopbackBus, Outcome, ProcessRole,
    PropertyDescriptor, PropertyOptions, Publisher, Scope, ScopeSet, SnapshotType,
};
use tracing::info;

/// A drawing that travels between processes as a snapshot.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Sketch {
    pub title: String,
    pub strokes: Vec<(i32, i32)>,
}

impl HasSnapshot for Sketch {
    fn take_snapshot(&self) -> Value {
        json!({"title": self.title, "strokes": self.strokes})
    }

    fn restore_from_snapshot(&mut self, snapshot: Value) -> anyhow::Result<()> {
        *self = serde_json::from_value(snapshot)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Settings {
    theme: String,
}

pub struct DemoHost {
    pub publisher: Publisher,
    pub tick: HostEvent,
}

pub fn publish(bus: &LoopbackBus, delay_ms: u64) -> Result<DemoHost> {
    let publisher = Publisher::new(ProcessRole::Host, Arc::new(bus.host()))?;

    publisher.publish_function("double", FunctionOptions::default(), |args| {
        Ok(Outcome::ready(args.get::<i64>(0)? * 2))
    })?;

    publisher.publish_function("fetch-greeting", FunctionOptions::default(), move |args| {
        let name: String = args.get(0)?;
        Ok(Outcome::deferred(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok(json!(format!("Hello, {}", name)))
        }))
    })?;

    publisher.publish_function(
        "session-token",
        FunctionOptions {
            scope: ScopeSet::only(Scope::Intermediary),
            receives: Vec::new(),
        },
        |_| Ok(Outcome::ready("intermediary-only-token")),
    )?;

    publisher.publish_function(
        "measure-sketch",
        FunctionOptions {
            scope: ScopeSet::all(),
            receives: vec![SnapshotType::of::<Sketch>()],
        },
        |args| {
            let sketch = args
                .restored::<Sketch>(0)
                .ok_or_else(|| anyhow::anyhow!("expected a sketch snapshot"))?;
            Ok(Outcome::ready(sketch.strokes.len()))
        },
    )?;

    publisher.publish_variable(
        "version",
        PropertyDescriptor::constant(json!(env!("CARGO_PKG_VERSION"))),
        PropertyOptions::default(),
    )?;

    let settings = Arc::new(Mutex::new(Settings {
        theme: "dark".to_string(),
    }));
    let read = settings.clone();
    publisher.publish_variable(
        "theme",
        PropertyDescriptor::new()
            .getter(move || {
                let settings = read.lock().expect("settings lock poisoned");
                Ok(json!(settings.theme))
            })
            .setter(move |value| {
                let theme: String = serde_json::from_value(value)?;
                settings.lock().expect("settings lock poisoned").theme = theme;
                Ok(())
            }),
        PropertyOptions {
            scope: ScopeSet::only(Scope::Client),
            access: Some(AccessSet::read_write()),
        },
    )?;

    let tick = publisher.publish_host_event("tick", ScopeSet::all())?;

    publisher.publish_consumer_event(
        "sketch-saved",
        ScopeSet::only(Scope::Client),
        Some(SnapshotType::of::<Sketch>()),
    )?;
    publisher.on("sketch-saved", |arg| match arg.downcast_ref::<Sketch>() {
        Some(sketch) => info!(
            "Host received sketch '{}' with {} strokes",
            sketch.title,
            sketch.strokes.len()
        ),
        None => info!("Host received {:?}", arg),
    })?;

    Ok(DemoHost { publisher, tick })
}
