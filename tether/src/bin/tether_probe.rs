//! tether-probe: run a messaging client and print everything it reports.
//!
//! # Usage
//!
//! Against a real backend:
//! ```bash
//! cargo run --bin tether-probe -- --address ws://127.0.0.1:8000/ws --duration 60
//! ```
//!
//! Against the built-in loopback backend:
//! ```bash
//! cargo run --bin tether-probe -- --loopback --duration 10
//! ```
//!
//! Set `RUST_LOG=tether=debug` for the client's own logs.

use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};
use tether::{
    Client, ClientConfig, ClientEvent, FileStore, KeyValueStore, MemoryServer, MemoryStore,
    MemoryTransport, OutboundMessage, SnapshotConsumer, TokioProviders, Transport,
    WebSocketTransport,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "tether-probe")]
#[command(about = "Connect a tether client and print its events", long_about = None)]
struct Args {
    /// JSON configuration file (any subset of fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address, overrides the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Run against an in-process echo backend instead of the network
    #[arg(long)]
    loopback: bool,

    /// Directory for the persisted offline queue (in memory if omitted)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Seconds to run before shutting down
    #[arg(short, long, default_value = "30")]
    duration: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tether=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::local_backend(),
    };
    if let Some(address) = &args.address {
        config = config.with_server_address(address.clone());
    }
    config.validate()?;

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let result = match (&args.store, args.loopback) {
                (Some(dir), true) => {
                    let (transport, server) = MemoryTransport::pair();
                    tokio::task::spawn_local(echo_backend(server));
                    run_probe(transport, FileStore::new(dir), config, args.duration).await
                }
                (None, true) => {
                    let (transport, server) = MemoryTransport::pair();
                    tokio::task::spawn_local(echo_backend(server));
                    run_probe(transport, MemoryStore::new(), config, args.duration).await
                }
                (Some(dir), false) => {
                    run_probe(WebSocketTransport::new(), FileStore::new(dir), config, args.duration)
                        .await
                }
                (None, false) => {
                    run_probe(WebSocketTransport::new(), MemoryStore::new(), config, args.duration)
                        .await
                }
            };
            if let Err(e) = &result {
                tracing::error!("Probe failed: {}", e);
            }
            result
        })
        .await?;

    Ok(())
}

async fn run_probe<T: Transport, S: KeyValueStore>(
    transport: T,
    store: S,
    config: ClientConfig,
    duration: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let consumer = Rc::new(SnapshotConsumer::new());
    let client = Client::new(
        TokioProviders::new(),
        transport,
        store,
        config,
        consumer.clone(),
    )
    .await?;
    let mut events = client.subscribe();

    println!("tether-probe: {} for {}s", client.config().server_address, duration);
    client.connect_default();

    // Submitted immediately: queued offline until the link comes up.
    let delivery = client
        .send(OutboundMessage::new(
            "system_status",
            json!({"action": "probe_started", "id": "probe"}),
        ))
        .await?;
    println!("  startup message: {:?}", delivery);

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);
    let mut requested = false;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("  event: {:?}", event);
                if event == ClientEvent::Connected && !requested {
                    requested = true;
                    match client.request("ping", json!({"from": "tether-probe"})).await {
                        Ok(reply) => println!("  reply: {}", reply),
                        Err(e) => println!("  request failed: {}", e),
                    }
                }
            }
        }
    }

    let metrics = client.metrics();
    println!(
        "  sent={} received={} queued={} lost={} state={}",
        metrics.messages_sent,
        metrics.messages_received,
        client.queue_len(),
        metrics.messages_lost(),
        consumer.state()
    );
    client.shutdown().await?;
    Ok(())
}

/// Minimal backend: confirms connections, acknowledges heartbeats, answers
/// requests and emits a short out-of-order burst of state updates.
async fn echo_backend(mut server: MemoryServer) {
    while let Some(mut link) = server.accept().await {
        tokio::task::spawn_local(async move {
            link.send_json(&json!({"type": "connection_established", "data": {"sequence": 0}}));
            for sequence in [1u64, 0, 2] {
                link.send_json(&json!({
                    "type": "state_update",
                    "sequence": sequence,
                    "data": {"tick": sequence}
                }));
            }

            while let Some(frame) = link.recv_json().await {
                let kind = frame.get("type").and_then(Value::as_str).unwrap_or_default();
                let data = frame.get("data").cloned().unwrap_or(Value::Null);
                let reply = match (kind, frame.get("request_id")) {
                    ("heartbeat", _) => json!({"type": "heartbeat_ack", "data": data}),
                    (_, Some(id)) => json!({"type": "response", "request_id": id, "data": data}),
                    _ => json!({"type": "notification", "data": {"echo": kind}}),
                };
                link.send_json(&reply);
            }
        });
    }
}
