//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use streamstore::store::EventStore;
use streamstore::{EventSource, Id, StoreConfig, StoreStreams};
use streamstore_memory::{InMemoryEventStore, InMemoryPublisher, InMemorySnapshotStore};

/// A plain aggregate kind.
pub struct Order;

impl EventSource for Order {
    const NAME: &'static str = "Order";
}

/// A snapshotting aggregate kind.
pub struct Ledger;

impl EventSource for Ledger {
    const NAME: &'static str = "Ledger";
    const SNAPSHOTTING: bool = true;
}

/// An engine wired to in-memory collaborators that stay inspectable.
pub struct Harness {
    pub events: InMemoryEventStore,
    pub snapshots: InMemorySnapshotStore,
    pub publisher: InMemoryPublisher,
    pub engine: StoreStreams,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let events = InMemoryEventStore::new();
        Self::over(events.clone(), Arc::new(events), config)
    }

    /// Wires the engine to `store`, which must write through to `events`.
    pub fn over(events: InMemoryEventStore, store: Arc<dyn EventStore>, config: StoreConfig) -> Self {
        let snapshots = InMemorySnapshotStore::new();
        let publisher = InMemoryPublisher::new();
        let engine = StoreStreams::new(
            store,
            Arc::new(snapshots.clone()),
            Arc::new(publisher.clone()),
        )
        .with_config(config);
        Self {
            events,
            snapshots,
            publisher,
            engine,
        }
    }
}

pub fn order_id(n: i64) -> Id {
    Id::from(n)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("streamstore=debug")
        .try_init();
}
