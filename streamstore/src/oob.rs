//! Out-of-band channel definitions and their metadata cache.
//!
//! An OOB channel must be defined on a stream before events can be raised
//! on it. Definitions are persisted as stream metadata and memoized per
//! stream name by [`OobDefinitionCache`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

/// Custom metadata key holding a stream's OOB definitions as JSON.
pub const OOB_METADATA_KEY: &str = "streamstore.oob";

/// Declaration of an OOB channel on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OobDefinition {
    /// The channel name.
    pub id: String,
    /// Publish events through the message bus instead of storing them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
    /// Store events, expiring them after this many days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_to_live: Option<u32>,
}

/// How events of an OOB channel are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobWritePolicy {
    /// Published through the message bus, never stored.
    Transient,
    /// Stored with a maximum age on the physical partition.
    Expiring(Duration),
    /// Stored permanently.
    Durable,
}

impl OobDefinition {
    /// A permanently stored channel.
    pub fn durable(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            transient: None,
            days_to_live: None,
        }
    }

    /// A channel published through the message bus.
    pub fn transient(id: impl Into<String>) -> Self {
        Self {
            transient: Some(true),
            ..Self::durable(id)
        }
    }

    /// A stored channel whose partitions expire after `days`.
    pub fn expiring(id: impl Into<String>, days: u32) -> Self {
        Self {
            days_to_live: Some(days),
            ..Self::durable(id)
        }
    }

    /// The write policy, by priority Transient > DaysToLive > Durable.
    pub fn policy(&self) -> OobWritePolicy {
        if self.transient.unwrap_or(false) {
            OobWritePolicy::Transient
        } else if let Some(days) = self.days_to_live {
            OobWritePolicy::Expiring(Duration::from_secs(u64::from(days) * 24 * 60 * 60))
        } else {
            OobWritePolicy::Durable
        }
    }
}

#[derive(Debug, Clone)]
struct CachedDefinitions {
    loaded_at: Instant,
    definitions: Arc<Vec<OobDefinition>>,
}

/// Process-wide memo of OOB definitions per stream name.
///
/// Entries are served while younger than the freshness window and removed
/// by [`sweep_expired`](Self::sweep_expired) once older than the max age.
/// All operations are internally synchronized.
#[derive(Debug)]
pub struct OobDefinitionCache {
    entries: RwLock<HashMap<String, CachedDefinitions>>,
    freshness: Duration,
    max_age: Duration,
}

impl OobDefinitionCache {
    /// Creates a cache with the given freshness window and hard expiry.
    pub fn new(freshness: Duration, max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            freshness,
            max_age,
        }
    }

    /// Returns the cached definitions for `stream` if they are still fresh.
    pub fn get_fresh(&self, stream: &str) -> Option<Arc<Vec<OobDefinition>>> {
        let entries = self.entries.read();
        entries
            .get(stream)
            .filter(|cached| cached.loaded_at.elapsed() <= self.freshness)
            .map(|cached| Arc::clone(&cached.definitions))
    }

    /// Records freshly read definitions for `stream`.
    pub fn insert(&self, stream: impl Into<String>, definitions: Vec<OobDefinition>) -> Arc<Vec<OobDefinition>> {
        let definitions = Arc::new(definitions);
        self.entries.write().insert(
            stream.into(),
            CachedDefinitions {
                loaded_at: Instant::now(),
                definitions: Arc::clone(&definitions),
            },
        );
        definitions
    }

    /// Forgets whatever is cached for `stream`.
    pub fn purge(&self, stream: &str) {
        self.entries.write().remove(stream);
    }

    /// Removes entries older than the max age, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, cached| cached.loaded_at.elapsed() <= self.max_age);
        before - entries.len()
    }

    /// Number of cached streams, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawns a background task sweeping expired entries every `every`.
    ///
    /// The task holds only a weak reference and ends once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    debug!("OOB definition cache dropped - stopping sweeper");
                    return;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    debug!(removed, "Expired cached OOB definitions");
                }
            }
        })
    }
}

impl Default for OobDefinitionCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(5 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_priority_is_transient_then_ttl_then_durable() {
        let both = OobDefinition {
            id: "audit".into(),
            transient: Some(true),
            days_to_live: Some(3),
        };
        assert_eq!(both.policy(), OobWritePolicy::Transient);

        assert_eq!(
            OobDefinition::expiring("audit", 2).policy(),
            OobWritePolicy::Expiring(Duration::from_secs(2 * 24 * 60 * 60))
        );
        assert_eq!(OobDefinition::durable("audit").policy(), OobWritePolicy::Durable);

        let explicit_false = OobDefinition {
            transient: Some(false),
            ..OobDefinition::expiring("audit", 1)
        };
        assert!(matches!(explicit_false.policy(), OobWritePolicy::Expiring(_)));
    }

    #[test]
    fn definitions_use_camel_case_json() {
        let json = serde_json::to_string(&vec![
            OobDefinition::expiring("views", 7),
            OobDefinition::transient("pings"),
        ])
        .unwrap();
        assert_eq!(
            json,
            r#"[{"id":"views","daysToLive":7},{"id":"pings","transient":true}]"#
        );

        let parsed: Vec<OobDefinition> =
            serde_json::from_str(r#"[{"id":"plain","transient":null}]"#).unwrap();
        assert_eq!(parsed, vec![OobDefinition::durable("plain")]);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_go_stale_after_the_freshness_window() {
        let cache = OobDefinitionCache::default();
        cache.insert("s", vec![OobDefinition::durable("audit")]);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get_fresh("s").unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get_fresh("s").is_none());
        // Stale but not yet expired
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let cache = OobDefinitionCache::default();
        cache.insert("old", vec![]);
        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        cache.insert("young", vec![]);
        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.get_fresh("young").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_task_expires_entries_in_the_background() {
        let cache = Arc::new(OobDefinitionCache::default());
        let handle = cache.spawn_sweeper(Duration::from_secs(5 * 60));
        cache.insert("s", vec![OobDefinition::durable("audit")]);

        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert!(handle.await.is_ok());
    }

    #[test]
    fn purge_forgets_a_stream() {
        let cache = OobDefinitionCache::default();
        cache.insert("s", vec![OobDefinition::durable("audit")]);
        cache.purge("s");
        assert!(cache.get_fresh("s").is_none());
        assert!(cache.is_empty());
    }
}
