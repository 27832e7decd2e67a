//! Read-through stream cache.
//!
//! The persistence engine stores an immutable copy of every stream it reads
//! and evicts it whenever the Domain partition is written or a version
//! conflict is detected. Implementations must be safe under concurrent
//! access without any locking by callers.

use crate::stream::EventStream;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Contract for the stream cache collaborator.
pub trait StreamCache: Send + Sync {
    /// Returns the cached stream for `key`, if any.
    fn retrieve(&self, key: &str) -> Option<Arc<EventStream>>;

    /// Stores `stream` under `key`, replacing any previous entry.
    fn cache(&self, key: &str, stream: Arc<EventStream>);

    /// Removes the entry for `key`. Evicting a missing key is not an error.
    fn evict(&self, key: &str);
}

/// Unbounded, internally synchronized [`StreamCache`].
///
/// Concurrent insert and evict for the same key resolve as last write wins;
/// a reader that loses the race simply misses on its next lookup.
#[derive(Debug, Default)]
pub struct SharedStreamCache {
    entries: RwLock<HashMap<String, Arc<EventStream>>>,
}

impl SharedStreamCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached streams.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StreamCache for SharedStreamCache {
    fn retrieve(&self, key: &str) -> Option<Arc<EventStream>> {
        self.entries.read().get(key).cloned()
    }

    fn cache(&self, key: &str, stream: Arc<EventStream>) {
        self.entries.write().insert(key.to_owned(), stream);
    }

    fn evict(&self, key: &str) {
        self.entries.write().remove(key);
    }
}

/// A cache that never holds anything, for deployments that opt out of caching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStreamCache;

impl StreamCache for NoStreamCache {
    fn retrieve(&self, _key: &str) -> Option<Arc<EventStream>> {
        None
    }

    fn cache(&self, _key: &str, _stream: Arc<EventStream>) {}

    fn evict(&self, _key: &str) {}
}
