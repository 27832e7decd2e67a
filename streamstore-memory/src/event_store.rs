use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use streamstore::errors::{EventStoreError, EventStoreResult};
use streamstore::store::{EventStore, ExpectedVersion, StreamMetadata};
use streamstore::{FullEvent, Headers, StreamVersion};

/// Thread-safe in-memory event store for testing.
///
/// Cloning shares the underlying streams.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    // Maps stream names to their events, oldest first
    streams: Arc<RwLock<HashMap<String, Vec<FullEvent>>>>,
    metadata: Arc<RwLock<HashMap<String, StreamMetadata>>>,
    // Every stream name written to, in order
    write_log: Arc<RwLock<Vec<String>>>,
}

impl InMemoryEventStore {
    /// Create a new empty in-memory event store
    pub fn new() -> Self {
        Self::default()
    }

    /// The events of `stream`, oldest first.
    pub fn events(&self, stream: &str) -> Vec<FullEvent> {
        self.streams.read().get(stream).cloned().unwrap_or_default()
    }

    /// Names of every stream holding events, sorted.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.streams.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// The metadata of `stream`.
    pub fn metadata(&self, stream: &str) -> Option<StreamMetadata> {
        self.metadata.read().get(stream).cloned()
    }

    /// Streams written to by `write_events` and `write_metadata`, in call
    /// order.
    pub fn write_log(&self) -> Vec<String> {
        self.write_log.read().clone()
    }
}

fn current_version(events: Option<&Vec<FullEvent>>) -> StreamVersion {
    StreamVersion::new_stream().advance(events.map_or(0, Vec::len))
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get_events(
        &self,
        stream: &str,
        start: Option<StreamVersion>,
        count: Option<usize>,
    ) -> EventStoreResult<Vec<FullEvent>> {
        let streams = self.streams.read();
        let Some(events) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(events
            .iter()
            .filter(|event| start.map_or(true, |start| event.descriptor.version >= start))
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn get_events_backwards(
        &self,
        stream: &str,
        start: Option<StreamVersion>,
        count: Option<usize>,
    ) -> EventStoreResult<Vec<FullEvent>> {
        let streams = self.streams.read();
        let Some(events) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(events
            .iter()
            .rev()
            .filter(|event| start.map_or(true, |start| event.descriptor.version <= start))
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn write_events(
        &self,
        stream: &str,
        events: &[FullEvent],
        _commit_headers: &Headers,
        expected: ExpectedVersion,
    ) -> EventStoreResult<StreamVersion> {
        let mut streams = self.streams.write();
        let current = current_version(streams.get(stream));

        let matches = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::New => current.is_new_stream(),
            ExpectedVersion::Exact(version) => version == current,
        };
        if !matches {
            return Err(EventStoreError::WrongExpectedVersion {
                stream: stream.to_owned(),
                expected: match expected {
                    ExpectedVersion::Exact(version) => Some(version),
                    _ => None,
                },
                current,
            });
        }

        self.write_log.write().push(stream.to_owned());
        let stored = streams.entry(stream.to_owned()).or_default();
        let mut version = current;
        for event in events {
            version = version.next();
            let mut event = event.clone();
            event.descriptor.version = version;
            stored.push(event);
        }
        tracing::trace!(stream, %version, "Wrote events");
        Ok(version)
    }

    async fn write_metadata(&self, stream: &str, metadata: StreamMetadata) -> EventStoreResult<()> {
        self.write_log.write().push(stream.to_owned());
        let mut all = self.metadata.write();
        let existing = all.entry(stream.to_owned()).or_default();
        if let Some(custom) = metadata.custom {
            existing.custom.get_or_insert_with(Default::default).extend(custom);
        }
        if metadata.max_age.is_some() {
            existing.max_age = metadata.max_age;
        }
        Ok(())
    }

    async fn get_metadata(&self, stream: &str, key: &str) -> EventStoreResult<Option<String>> {
        Ok(self
            .metadata
            .read()
            .get(stream)
            .and_then(|metadata| metadata.custom.as_ref())
            .and_then(|custom| custom.get(key).cloned()))
    }

    async fn size(&self, stream: &str) -> EventStoreResult<u64> {
        Ok(self
            .streams
            .read()
            .get(stream)
            .map_or(0, |events| events.len() as u64))
    }
}
