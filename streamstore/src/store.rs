//! Collaborator contracts consumed by the persistence engine.
//!
//! The event log, snapshot store and message bus are external systems. These
//! traits are the port interfaces the engine talks to; `streamstore-memory`
//! provides in-memory adapters.

use crate::errors::EventStoreResult;
use crate::event::{FullEvent, Headers};
use crate::id::Id;
use crate::stream::Snapshot;
use crate::types::StreamVersion;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

/// Expected version for optimistic concurrency control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// The stream must not exist
    New,
    /// The stream must exist and its last event must have exactly this version
    Exact(StreamVersion),
    /// Any version is acceptable (no concurrency control)
    Any,
}

impl ExpectedVersion {
    /// The expectation for writing after a stream read at `commit_version`.
    pub fn after(commit_version: StreamVersion) -> Self {
        if commit_version.is_new_stream() {
            Self::New
        } else {
            Self::Exact(commit_version)
        }
    }
}

/// Stream-level metadata written alongside events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    /// Custom key/value metadata, merged over existing custom entries.
    pub custom: Option<BTreeMap<String, String>>,
    /// Events older than this may be discarded by the store.
    pub max_age: Option<Duration>,
}

impl StreamMetadata {
    /// Metadata carrying one custom entry.
    pub fn custom(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            custom: Some(BTreeMap::from([(key.into(), value.into())])),
            max_age: None,
        }
    }

    /// Metadata carrying a maximum event age.
    pub const fn max_age(max_age: Duration) -> Self {
        Self {
            custom: None,
            max_age: Some(max_age),
        }
    }
}

/// The append-only event log, addressed by physical stream name.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Reads events oldest first, starting at version `start` (inclusive).
    async fn get_events(
        &self,
        stream: &str,
        start: Option<StreamVersion>,
        count: Option<usize>,
    ) -> EventStoreResult<Vec<FullEvent>>;

    /// Reads events newest first, starting at version `start` (inclusive) or
    /// at the end of the stream.
    async fn get_events_backwards(
        &self,
        stream: &str,
        start: Option<StreamVersion>,
        count: Option<usize>,
    ) -> EventStoreResult<Vec<FullEvent>>;

    /// Appends `events`, returning the version of the last one written.
    ///
    /// Fails with [`EventStoreError::WrongExpectedVersion`](crate::EventStoreError::WrongExpectedVersion)
    /// when the stream does not match `expected`.
    async fn write_events(
        &self,
        stream: &str,
        events: &[FullEvent],
        commit_headers: &Headers,
        expected: ExpectedVersion,
    ) -> EventStoreResult<StreamVersion>;

    /// Writes stream metadata.
    async fn write_metadata(&self, stream: &str, metadata: StreamMetadata) -> EventStoreResult<()>;

    /// Reads one custom metadata entry.
    async fn get_metadata(&self, stream: &str, key: &str) -> EventStoreResult<Option<String>>;

    /// Number of events in the stream.
    async fn size(&self, stream: &str) -> EventStoreResult<u64>;
}

/// Stores aggregate snapshots, one per stream.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Reads the latest snapshot of a stream.
    async fn get_snapshot(
        &self,
        kind: &str,
        bucket: &str,
        stream_id: &Id,
        parents: &[Id],
    ) -> EventStoreResult<Option<Snapshot>>;

    /// Replaces the snapshot of a stream.
    async fn write_snapshot(
        &self,
        kind: &str,
        bucket: &str,
        stream_id: &Id,
        parents: &[Id],
        snapshot: &Snapshot,
        commit_headers: &Headers,
    ) -> EventStoreResult<()>;
}

/// Publishes transient OOB events on the message bus.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes `events` to `destination`.
    async fn publish(
        &self,
        destination: &str,
        events: &[FullEvent],
        commit_headers: &Headers,
    ) -> EventStoreResult<()>;
}
