//! Declared delay thresholds and their memoized classification.

use super::ChannelKey;
use crate::errors::KeyExtractionError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Derives a channel sub-key from a message body.
pub type KeyExtractor =
    Arc<dyn Fn(&serde_json::Value) -> Result<String, KeyExtractionError> + Send + Sync>;

/// Thresholds of a delayed channel.
///
/// A channel is drained once it holds `count` messages or its oldest message
/// is `delay` old, whichever comes first.
#[derive(Clone, Default)]
pub struct DelayedConfig {
    /// Drain once this many messages are queued. Also caps each drain.
    pub count: Option<usize>,
    /// Drain once the oldest message is this old.
    pub delay: Option<Duration>,
    /// Splits the channel into independent queues per message.
    pub key_extractor: Option<KeyExtractor>,
}

impl DelayedConfig {
    /// Thresholds draining every `count` messages.
    pub fn count(count: usize) -> Self {
        Self {
            count: Some(count),
            ..Self::default()
        }
    }

    /// Thresholds draining once the oldest message is `delay` old.
    pub fn delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Adds a count threshold.
    #[must_use]
    pub const fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Adds an age threshold.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Partitions the channel by a key read from each message.
    #[must_use]
    pub fn with_key_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<String, KeyExtractionError> + Send + Sync + 'static,
    {
        self.key_extractor = Some(Arc::new(extractor));
        self
    }

    /// Whether a queue of `size` messages whose oldest is `age` old should
    /// be drained. Unmeasured values never trip their threshold.
    pub fn should_execute(&self, size: Option<usize>, age: Option<Duration>) -> bool {
        let by_count = matches!((self.count, size), (Some(count), Some(size)) if size >= count);
        let by_age = matches!((self.delay, age), (Some(delay), Some(age)) if age >= delay);
        by_count || by_age
    }
}

impl fmt::Debug for DelayedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayedConfig")
            .field("count", &self.count)
            .field("delay", &self.delay)
            .field("key_extractor", &self.key_extractor.is_some())
            .finish()
    }
}

/// Handler and message type pairs whose messages are delayed.
///
/// Built once at startup. Pairs that were never registered are not delayed.
#[derive(Debug, Default)]
pub struct DelayedRegistry {
    channels: HashMap<ChannelKey, Arc<DelayedConfig>>,
    inspections: AtomicUsize,
}

impl DelayedRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays messages of `message_type` handled by `handler`.
    #[must_use]
    pub fn with(mut self, handler: &str, message_type: &str, config: DelayedConfig) -> Self {
        self.channels
            .insert(ChannelKey::new(handler, message_type), Arc::new(config));
        self
    }

    /// Looks up the thresholds declared for `key`.
    pub fn inspect(&self, key: &ChannelKey) -> Option<Arc<DelayedConfig>> {
        self.inspections.fetch_add(1, Ordering::Relaxed);
        self.channels.get(key).cloned()
    }

    /// Number of lookups made so far.
    pub fn inspections(&self) -> usize {
        self.inspections.load(Ordering::Relaxed)
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Returns whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// How messages on a channel are dispatched.
#[derive(Debug, Clone)]
pub enum Classification {
    /// Handled as they arrive.
    NotDelayed,
    /// Queued and drained in bulk.
    Delayed(Arc<DelayedConfig>),
}

/// Memo of classifications, negative results included.
#[derive(Debug, Default)]
pub struct ClassificationCache {
    entries: RwLock<HashMap<ChannelKey, Classification>>,
}

impl ClassificationCache {
    /// Creates an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies `key`, consulting `registry` only the first time.
    pub fn classify(&self, key: &ChannelKey, registry: &DelayedRegistry) -> Classification {
        if let Some(classification) = self.entries.read().get(key) {
            return classification.clone();
        }

        let mut entries = self.entries.write();
        entries
            .entry(key.clone())
            .or_insert_with(|| match registry.inspect(key) {
                Some(config) => {
                    tracing::debug!(channel = %key, "Found delayed channel");
                    Classification::Delayed(config)
                }
                None => Classification::NotDelayed,
            })
            .clone()
    }

    /// Number of classified channels.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns whether nothing has been classified.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_trip_on_count_or_age() {
        let config = DelayedConfig::count(3).with_delay(Duration::from_millis(500));

        assert!(!config.should_execute(Some(2), Some(Duration::from_millis(100))));
        assert!(config.should_execute(Some(3), Some(Duration::ZERO)));
        assert!(config.should_execute(Some(1), Some(Duration::from_millis(500))));
        assert!(!config.should_execute(None, None));
    }

    #[test]
    fn unset_thresholds_never_trip() {
        let config = DelayedConfig::delay(Duration::from_secs(1));
        assert!(!config.should_execute(Some(1_000), Some(Duration::ZERO)));
        assert!(!DelayedConfig::default().should_execute(Some(10), Some(Duration::MAX)));
    }

    #[test]
    fn classification_is_memoized_including_negatives() {
        let registry = DelayedRegistry::new().with("Greeter", "SayHello", DelayedConfig::count(3));
        let cache = ClassificationCache::new();
        let delayed = ChannelKey::new("Greeter", "SayHello");
        let plain = ChannelKey::new("Greeter", "SayBye");

        for _ in 0..5 {
            assert!(matches!(cache.classify(&delayed, &registry), Classification::Delayed(ref c) if c.count == Some(3)));
            assert!(matches!(cache.classify(&plain, &registry), Classification::NotDelayed));
        }

        assert_eq!(registry.inspections(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_classification_inspects_once() {
        let registry = Arc::new(DelayedRegistry::new().with("H", "M", DelayedConfig::count(1)));
        let cache = Arc::new(ClassificationCache::new());
        let key = ChannelKey::new("H", "M");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (registry, cache, key) = (Arc::clone(&registry), Arc::clone(&cache), key.clone());
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        cache.classify(&key, &registry);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.inspections(), 1);
    }
}
