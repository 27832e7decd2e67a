//! The in-memory view of an aggregate's event stream.
//!
//! An [`EventStream`] holds the committed history read from the store plus
//! the events, OOB definitions and snapshot the aggregate has produced since.
//! `stream_version() == commit_version() + uncommitted().len()` always holds.

use crate::event::{EventDescriptor, FullEvent, Headers, StreamType, OOB_CHANNEL_HEADER};
use crate::id::Id;
use crate::oob::OobDefinition;
use crate::types::StreamVersion;
use serde::{Deserialize, Serialize};

/// A kind of aggregate whose state is kept in an event stream.
pub trait EventSource: Send + Sync + 'static {
    /// The kind name used in stream names.
    const NAME: &'static str;

    /// Whether streams of this kind load snapshots before replaying events.
    const SNAPSHOTTING: bool = false;
}

/// A stored snapshot of aggregate state at a stream version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The version of the last event folded into the payload.
    pub version: StreamVersion,
    /// Serialized aggregate state.
    pub payload: serde_json::Value,
}

/// A snapshot raised by the aggregate, waiting for the next write.
pub type PendingSnapshot = Snapshot;

/// An aggregate's event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct EventStream {
    kind: String,
    bucket: String,
    stream_id: Id,
    parents: Vec<Id>,
    commit_version: StreamVersion,
    committed: Vec<FullEvent>,
    uncommitted: Vec<FullEvent>,
    snapshot: Option<Snapshot>,
    oobs: Vec<OobDefinition>,
    pending_oobs: Vec<OobDefinition>,
    pending_snapshot: Option<PendingSnapshot>,
}

impl EventStream {
    /// Creates a stream that has never been written.
    pub fn new(kind: impl Into<String>, bucket: impl Into<String>, stream_id: Id, parents: Vec<Id>) -> Self {
        Self {
            kind: kind.into(),
            bucket: bucket.into(),
            stream_id,
            parents,
            commit_version: StreamVersion::new_stream(),
            committed: Vec::new(),
            uncommitted: Vec::new(),
            snapshot: None,
            oobs: Vec::new(),
            pending_oobs: Vec::new(),
            pending_snapshot: None,
        }
    }

    /// Assembles a stream from what was read from the stores.
    ///
    /// `events` are the events after the snapshot, if any. The commit version
    /// is that of the last event, else the snapshot's, else a new stream.
    pub fn from_history(
        kind: impl Into<String>,
        bucket: impl Into<String>,
        stream_id: Id,
        parents: Vec<Id>,
        oobs: Vec<OobDefinition>,
        events: Vec<FullEvent>,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let commit_version = events
            .last()
            .map(|event| event.descriptor.version)
            .or_else(|| snapshot.as_ref().map(|snapshot| snapshot.version))
            .unwrap_or_else(StreamVersion::new_stream);

        Self {
            commit_version,
            committed: events,
            snapshot,
            oobs,
            ..Self::new(kind, bucket, stream_id, parents)
        }
    }

    /// The aggregate kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The bucket the stream lives in.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// The stream id.
    pub const fn stream_id(&self) -> &Id {
        &self.stream_id
    }

    /// Ordered parent ids.
    pub fn parents(&self) -> &[Id] {
        &self.parents
    }

    /// The last durably written version, -1 for a new stream.
    pub const fn commit_version(&self) -> StreamVersion {
        self.commit_version
    }

    /// The version including uncommitted events.
    pub fn stream_version(&self) -> StreamVersion {
        self.commit_version.advance(self.uncommitted.len())
    }

    /// The version the Domain stream reaches once uncommitted Domain events
    /// are written. OOB events do not count.
    pub fn domain_version(&self) -> StreamVersion {
        let domain = self
            .uncommitted
            .iter()
            .filter(|event| event.descriptor.stream_type == StreamType::Domain)
            .count();
        self.commit_version.advance(domain)
    }

    /// Events read from the store.
    pub fn committed(&self) -> &[FullEvent] {
        &self.committed
    }

    /// Events raised since the stream was read.
    pub fn uncommitted(&self) -> &[FullEvent] {
        &self.uncommitted
    }

    /// The snapshot the stream was loaded from.
    pub const fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// OOB channels already defined in the store.
    pub fn oobs(&self) -> &[OobDefinition] {
        &self.oobs
    }

    /// OOB channels defined since the stream was read.
    pub fn pending_oobs(&self) -> &[OobDefinition] {
        &self.pending_oobs
    }

    /// The snapshot waiting to be written.
    pub const fn pending_snapshot(&self) -> Option<&PendingSnapshot> {
        self.pending_snapshot.as_ref()
    }

    /// Returns whether anything is waiting to be written.
    pub fn is_dirty(&self) -> bool {
        !self.uncommitted.is_empty() || !self.pending_oobs.is_empty() || self.pending_snapshot.is_some()
    }

    /// Raises a Domain event.
    pub fn add(&mut self, payload: serde_json::Value, headers: Headers) {
        self.push(StreamType::Domain, payload, headers);
    }

    /// Raises an event on OOB channel `channel`.
    ///
    /// The channel must be defined, here or in the store, before the stream
    /// is written.
    pub fn add_oob(&mut self, channel: &str, payload: serde_json::Value, mut headers: Headers) {
        headers.insert(OOB_CHANNEL_HEADER.to_owned(), channel.to_owned());
        self.push(StreamType::Oob, payload, headers);
    }

    /// Defines an OOB channel, replacing a pending definition with the same id.
    pub fn define_oob(&mut self, definition: OobDefinition) {
        self.pending_oobs.retain(|pending| pending.id != definition.id);
        self.pending_oobs.push(definition);
    }

    /// Records a snapshot of aggregate state at the current
    /// [`domain_version`](Self::domain_version).
    pub fn add_snapshot(&mut self, payload: serde_json::Value) {
        self.pending_snapshot = Some(Snapshot {
            version: self.domain_version(),
            payload,
        });
    }

    /// A copy holding only what was read from the store.
    ///
    /// This is the immutable form kept in the stream cache.
    #[must_use]
    pub fn clone_committed(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            bucket: self.bucket.clone(),
            stream_id: self.stream_id.clone(),
            parents: self.parents.clone(),
            commit_version: self.commit_version,
            committed: self.committed.clone(),
            uncommitted: Vec::new(),
            snapshot: self.snapshot.clone(),
            oobs: self.oobs.clone(),
            pending_oobs: Vec::new(),
            pending_snapshot: None,
        }
    }

    fn push(&mut self, stream_type: StreamType, payload: serde_json::Value, headers: Headers) {
        let version = self.stream_version().next();
        self.uncommitted.push(FullEvent {
            event_id: None,
            descriptor: EventDescriptor {
                version,
                stream_type,
                headers,
                commit_id: None,
            },
            payload,
        });
    }
}
