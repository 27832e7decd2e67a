//! Engine configuration with type-safe validation.
//!
//! Numeric limits use `nutype` so that invalid configurations cannot be
//! constructed. Both configuration structs deserialize from JSON (or any
//! serde format) with every field optional.

use crate::oob::OobDefinitionCache;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Number of physical partitions each OOB channel is sharded across.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 64),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct OobShardCount(usize);

/// Maximum partition operations in flight during an OOB fan-out.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 64),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct FanOutConcurrency(usize);

/// A non-zero span of time in milliseconds.
#[nutype(
    validate(greater_or_equal = 1),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct IntervalMs(u64);

impl IntervalMs {
    /// Converts `duration`, rounding anything below a millisecond up to one.
    pub fn from_duration(duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1);
        Self::try_new(millis).expect("clamped value is always valid")
    }

    /// The span as a [`Duration`].
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into_inner())
    }
}

/// Configuration of the persistence engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Physical partitions per OOB channel.
    pub oob_shards: OobShardCount,
    /// Partition reads in flight at once.
    pub fan_out_concurrency: FanOutConcurrency,
    /// How long cached OOB definitions are served without re-reading.
    pub oob_definition_freshness_ms: IntervalMs,
    /// Age after which the sweep removes cached OOB definitions.
    pub oob_definition_max_age_ms: IntervalMs,
    /// How often the sweep runs.
    pub oob_sweep_interval_ms: IntervalMs,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            oob_shards: OobShardCount::try_new(10).expect("10 is a valid shard count"),
            fan_out_concurrency: FanOutConcurrency::try_new(5).expect("5 is a valid concurrency"),
            oob_definition_freshness_ms: IntervalMs::from_duration(Duration::from_secs(30)),
            oob_definition_max_age_ms: IntervalMs::from_duration(Duration::from_secs(5 * 60)),
            oob_sweep_interval_ms: IntervalMs::from_duration(Duration::from_secs(5 * 60)),
        }
    }
}

impl StoreConfig {
    /// Sets the number of OOB partitions.
    #[must_use]
    pub const fn with_oob_shards(mut self, shards: OobShardCount) -> Self {
        self.oob_shards = shards;
        self
    }

    /// Sets the fan-out concurrency.
    #[must_use]
    pub const fn with_fan_out_concurrency(mut self, concurrency: FanOutConcurrency) -> Self {
        self.fan_out_concurrency = concurrency;
        self
    }

    /// Sets the OOB definition freshness window.
    #[must_use]
    pub fn with_oob_definition_freshness(mut self, freshness: Duration) -> Self {
        self.oob_definition_freshness_ms = IntervalMs::from_duration(freshness);
        self
    }

    /// Number of OOB partitions.
    pub fn shards(&self) -> usize {
        self.oob_shards.into_inner()
    }

    /// Fan-out concurrency, never more than the number of partitions.
    pub fn fan_out(&self) -> usize {
        self.fan_out_concurrency.into_inner().min(self.shards())
    }

    /// The OOB definition freshness window.
    pub fn oob_definition_freshness(&self) -> Duration {
        self.oob_definition_freshness_ms.as_duration()
    }

    /// The OOB definition hard expiry.
    pub fn oob_definition_max_age(&self) -> Duration {
        self.oob_definition_max_age_ms.as_duration()
    }

    /// The sweep interval. Never zero.
    pub fn oob_sweep_interval(&self) -> Duration {
        self.oob_sweep_interval_ms.as_duration()
    }

    /// A definition cache using this configuration's windows.
    pub fn oob_definition_cache(&self) -> OobDefinitionCache {
        OobDefinitionCache::new(self.oob_definition_freshness(), self.oob_definition_max_age())
    }
}

/// Configuration of the bulk dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// A bulk drain taking longer than this raises a slow alarm.
    pub slow_bulk_threshold_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            slow_bulk_threshold_ms: 5_000,
        }
    }
}

impl DispatchConfig {
    /// Sets the slow alarm threshold.
    #[must_use]
    pub fn with_slow_bulk_threshold(mut self, threshold: Duration) -> Self {
        self.slow_bulk_threshold_ms = duration_ms(threshold);
        self
    }

    /// The slow alarm threshold.
    pub const fn slow_bulk_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_bulk_threshold_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
