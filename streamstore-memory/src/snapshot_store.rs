use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use streamstore::errors::EventStoreResult;
use streamstore::store::SnapshotStore;
use streamstore::{default_stream_name, Headers, Id, Snapshot, StreamKey, StreamType};

/// In-memory snapshot store keeping the latest snapshot per stream.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams with a snapshot.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Returns whether no snapshot was written.
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

fn key(kind: &str, bucket: &str, id: &Id, parents: &[Id]) -> String {
    default_stream_name(&StreamKey {
        kind,
        stream_type: StreamType::Domain,
        bucket,
        id,
        parents,
    })
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get_snapshot(
        &self,
        kind: &str,
        bucket: &str,
        stream_id: &Id,
        parents: &[Id],
    ) -> EventStoreResult<Option<Snapshot>> {
        Ok(self
            .snapshots
            .read()
            .get(&key(kind, bucket, stream_id, parents))
            .cloned())
    }

    async fn write_snapshot(
        &self,
        kind: &str,
        bucket: &str,
        stream_id: &Id,
        parents: &[Id],
        snapshot: &Snapshot,
        _commit_headers: &Headers,
    ) -> EventStoreResult<()> {
        self.snapshots
            .write()
            .insert(key(kind, bucket, stream_id, parents), snapshot.clone());
        Ok(())
    }
}
