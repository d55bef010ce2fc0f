//! Tether demo - host, intermediary and client in one process.
//!
//! The three roles are wired over the in-memory loopback transport, so the
//! whole publish / relay / consume path can be exercised without spawning
//! processes.

mod host;
mod scenario;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tether_core::{Bridge, LoopbackBus, ProcessRole, Relay};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "tether-demo")]
#[command(about = "Exercise a Tether host, relay and client over the loopback transport")]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// How long the host takes to settle deferred calls, in milliseconds
    #[arg(long, default_value = "50")]
    delay_ms: u64,

    /// Number of ticks the host emits
    #[arg(long, default_value = "3")]
    ticks: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Tether demo");

    let bus = LoopbackBus::new();
    let host = host::publish(&bus, args.delay_ms)?;
    info!("Host published {} entities", host.publisher.registry_snapshot().len());

    let relay = Relay::bootstrap(ProcessRole::Intermediary, Arc::new(bus.connect()))?;
    let intermediary = Bridge::connect(ProcessRole::Intermediary, relay.expose())?;
    let client = Bridge::connect(ProcessRole::Client, relay.expose())?;

    scenario::run(&host, &intermediary, &client, args.ticks).await?;

    info!("Demo finished");
    Ok(())
}
