//! In-process metrics owned by the engines.
//!
//! The engines hold their metrics behind an `Arc` and callers read them
//! directly. Exporting to an external sink is left to the embedding
//! application.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const SAMPLE_WINDOW: usize = 1000;

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter at zero.
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Adds one.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Keeps the most recent samples of a distribution.
#[derive(Debug, Default)]
pub struct Histogram {
    samples: RwLock<Vec<u64>>,
}

impl Histogram {
    /// Creates an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one sample, dropping the oldest once the window is full.
    pub fn record(&self, value: u64) {
        let mut samples = self.samples.write();
        samples.push(value);
        if samples.len() > SAMPLE_WINDOW {
            let drain_count = samples.len() - SAMPLE_WINDOW;
            samples.drain(0..drain_count);
        }
    }

    /// The retained samples, oldest first.
    pub fn samples(&self) -> Vec<u64> {
        self.samples.read().clone()
    }

    /// Number of retained samples.
    pub fn count(&self) -> usize {
        self.samples.read().len()
    }

    /// Largest retained sample.
    pub fn max(&self) -> Option<u64> {
        self.samples.read().iter().copied().max()
    }

    /// Mean of the retained samples.
    #[allow(clippy::cast_precision_loss)]
    pub fn mean(&self) -> Option<f64> {
        let samples = self.samples.read();
        if samples.is_empty() {
            return None;
        }
        let total: u64 = samples.iter().sum();
        Some(total as f64 / samples.len() as f64)
    }
}

/// Records durations.
#[derive(Debug, Default)]
pub struct Timer {
    samples: RwLock<Vec<Duration>>,
}

impl Timer {
    /// Creates a timer with no samples.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one duration.
    pub fn record(&self, duration: Duration) {
        let mut samples = self.samples.write();
        samples.push(duration);
        if samples.len() > SAMPLE_WINDOW {
            let drain_count = samples.len() - SAMPLE_WINDOW;
            samples.drain(0..drain_count);
        }
    }

    /// Times an async operation.
    pub async fn time_async<F, Fut, R>(&self, f: F) -> R
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = R>,
    {
        let start = Instant::now();
        let result = f().await;
        self.record(start.elapsed());
        result
    }

    /// The retained samples.
    pub fn samples(&self) -> Vec<Duration> {
        self.samples.read().clone()
    }

    /// Mean of the retained samples.
    pub fn mean(&self) -> Option<Duration> {
        let samples = self.samples.read();
        if samples.is_empty() {
            return None;
        }
        let total: Duration = samples.iter().sum();
        Some(total / u32::try_from(samples.len()).unwrap_or(u32::MAX))
    }

    /// The `p`th percentile (0-100) of the retained samples.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        let mut samples = self.samples();
        if samples.is_empty() {
            return None;
        }

        samples.sort();
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let index = ((samples.len() as f64 - 1.0) * p / 100.0).round() as usize;
        samples.get(index).copied()
    }
}

/// Persistence engine metrics.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    /// Stream writes.
    pub saved: Counter,
    /// `get_stream` calls answered from the cache.
    pub cache_hits: Counter,
    /// `get_stream` calls that went to the store.
    pub cache_misses: Counter,
}

impl StreamMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Dispatch engine metrics.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Handler invocations made while draining a channel.
    pub bulk_invokes: Counter,
    /// Messages enqueued into delayed channels.
    pub delayed_messages: Counter,
    /// Messages pulled per drain.
    pub bulk_size: Histogram,
    /// Time spent per drain.
    pub bulk_time: Timer,
}

impl DispatchMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }
}
