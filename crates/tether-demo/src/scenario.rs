//! Consumer side of the demo.

use crate::host::{DemoHost, Sketch};
use anyhow::Result;
use serde_json::json;
use tether_core::{to_transferable, Bridge, TetherError};
use tracing::{info, warn};

fn report_refusal(action: &str, result: tether_core::Result<impl std::fmt::Debug>) {
    match result {
        Ok(value) => warn!("{} unexpectedly succeeded: {:?}", action, value),
        Err(e) => info!("{} refused ({:?}): {}", action, e.category(), e),
    }
}

pub async fn run(host: &DemoHost, intermediary: &Bridge, client: &Bridge, ticks: u32) -> Result<()> {
    info!("Client sees: {}", client.members().join(", "));
    info!("Intermediary sees: {}", intermediary.members().join(", "));

    // Functions
    let doubled = client.invoke("double", vec![json!(21)]).await?;
    info!("double(21) = {}", doubled);

    let reply = client.call("fetch-greeting", vec![json!("client")])?;
    info!("fetch-greeting deferred: {}", reply.is_deferred());
    info!("fetch-greeting settled: {}", reply.settle().await?);

    report_refusal("Client session-token", client.call("session-token", vec![]));
    let token = intermediary.invoke("session-token", vec![]).await?;
    info!("Intermediary session-token = {}", token);

    let sketch = Sketch {
        title: "spiral".to_string(),
        strokes: vec![(0, 0), (1, 1), (2, 4)],
    };
    let strokes = client
        .invoke("measure-sketch", vec![to_transferable(&sketch)])
        .await?;
    info!("measure-sketch = {}", strokes);

    // Properties
    info!("version = {}", client.get("version")?);
    report_refusal("Setting version", client.set("version", json!("9.9.9")));

    client.set("theme", json!("light"))?;
    info!("theme = {}", client.get_as::<String>("theme")?);
    report_refusal("Intermediary theme", intermediary.get("theme"));

    // Events
    let subscription = client.on("tick", |emitted| match emitted {
        Ok(value) => info!("Client tick {}", value),
        Err(e) => warn!("Client tick failed: {}", e),
    })?;
    intermediary.once("tick", |emitted| {
        if let Ok(value) = emitted {
            info!("Intermediary first tick {}", value);
        }
    })?;

    for n in 1..=ticks {
        let reached = host.tick.emit(json!(n))?;
        info!("tick {} reached {} context(s)", n, reached);
    }
    subscription.unsubscribe();

    report_refusal("Client emitting tick", client.emit("tick", json!(0)));
    client.emit("sketch-saved", to_transferable(&sketch))?;

    match intermediary.emit("sketch-saved", json!(null)) {
        Err(TetherError::OutOfScope { .. }) => info!("sketch-saved is client-only"),
        other => warn!("Unexpected result from intermediary emit: {:?}", other),
    }

    Ok(())
}
