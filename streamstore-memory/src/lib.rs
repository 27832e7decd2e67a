//! In-memory collaborators for `streamstore`
//!
//! This crate provides in-memory implementations of every collaborator the
//! `streamstore` engines consume: the event store, the snapshot store, the
//! message publisher and the delayed channel. They are useful for testing
//! and development scenarios where persistence is not required.
//!
//! [`chaos::ChaosEventStore`] wraps any event store and injects failures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

pub mod chaos;
mod channel;
mod event_store;
mod publisher;
mod snapshot_store;

pub use channel::InMemoryDelayedChannel;
pub use event_store::InMemoryEventStore;
pub use publisher::{InMemoryPublisher, Published};
pub use snapshot_store::InMemorySnapshotStore;
