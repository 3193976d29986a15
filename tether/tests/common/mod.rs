//! Shared fixtures for client integration tests.
//!
//! Every test runs on a current-thread runtime with a paused clock inside a
//! `LocalSet`, so backoff, heartbeat and timeout schedules advance
//! deterministically whenever all tasks are idle.

#![allow(dead_code)]

use std::rc::Rc;
use std::time::Duration;

use serde_json::{json, Value};
use tether::{
    Client, ClientConfig, ClientEvent, MemoryLink, MemoryServer, MemoryStore, MemoryTransport,
    SnapshotConsumer, Subscription, TokioProviders,
};

pub type TestClient = Client<TokioProviders, MemoryStore, SnapshotConsumer>;

pub const ADDRESS: &str = "mem://backend";

/// Upper bound for waiting on an event in virtual time.
const EVENT_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct Harness {
    pub client: Rc<TestClient>,
    pub server: MemoryServer,
    pub store: MemoryStore,
    pub consumer: Rc<SnapshotConsumer>,
    pub events: Subscription,
}

/// Configuration with short, jitter-free timings.
pub fn test_config() -> ClientConfig {
    ClientConfig::default()
        .with_server_address(ADDRESS)
        .with_backoff(
            Duration::from_millis(100),
            Duration::from_secs(1),
            Duration::ZERO,
        )
        .with_retry_limit(3, Duration::from_secs(2))
        .with_heartbeat(Duration::from_secs(30), Duration::ZERO)
        .with_drain(10, Duration::from_secs(5), Duration::from_millis(10))
}

pub async fn harness(config: ClientConfig) -> Harness {
    harness_with_store(config, MemoryStore::new()).await
}

pub async fn harness_with_store(config: ClientConfig, store: MemoryStore) -> Harness {
    let (transport, server) = MemoryTransport::pair();
    let consumer = Rc::new(SnapshotConsumer::new());
    let client = Client::new(
        TokioProviders::new(),
        transport,
        store.clone(),
        config,
        consumer.clone(),
    )
    .await
    .expect("client");
    let events = client.subscribe();
    Harness {
        client: Rc::new(client),
        server,
        store,
        consumer,
        events,
    }
}

impl Harness {
    /// Connect and return the backend side of the new link once the client
    /// reports it is up.
    pub async fn connect(&mut self) -> MemoryLink {
        self.client.connect(ADDRESS);
        let link = self.server.accept().await.expect("accept");
        wait_for(&mut self.events, |e| *e == ClientEvent::Connected).await;
        link
    }

    pub async fn next_event(&mut self) -> ClientEvent {
        next_event(&mut self.events).await
    }

    pub async fn wait_for<F>(&mut self, predicate: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        wait_for(&mut self.events, predicate).await
    }
}

pub async fn next_event(events: &mut Subscription) -> ClientEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus closed")
}

/// Skip events until one matches.
pub async fn wait_for<F>(events: &mut Subscription, mut predicate: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if predicate(&event) {
            return event;
        }
    }
}

/// Read frames from the link until one of `kind` arrives.
pub async fn recv_kind(link: &mut MemoryLink, kind: &str) -> Value {
    loop {
        let frame = tokio::time::timeout(EVENT_TIMEOUT, link.recv_json())
            .await
            .expect("timed out waiting for frame")
            .expect("link closed");
        if frame["type"] == kind {
            return frame;
        }
    }
}

pub fn state_update(sequence: u64, data: Value) -> Value {
    json!({ "type": "state_update", "sequence": sequence, "data": data })
}
