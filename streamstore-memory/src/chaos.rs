//! Fault injection for event stores.
//!
//! [`ChaosEventStore`] wraps another [`EventStore`] and fails calls at
//! configured rates, or every write to streams whose name contains a given
//! fragment. Seeded configurations fail the same calls on every run.

use async_trait::async_trait;
use nutype::nutype;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{random, Rng, SeedableRng};
use streamstore::errors::{EventStoreError, EventStoreResult};
use streamstore::store::{EventStore, ExpectedVersion, StreamMetadata};
use streamstore::{FullEvent, Headers, StreamVersion};

/// Probability value for chaos injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// What to inject and how often.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    version_conflict_probability: Probability,
    failing_streams: Vec<String>,
}

impl ChaosConfig {
    /// A configuration with a fixed seed.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Fails reads and writes at `probability`, clamped to [0, 1].
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Rejects event writes with a version conflict at `probability`.
    #[must_use]
    pub fn with_version_conflict_probability(mut self, probability: f32) -> Self {
        self.version_conflict_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }

    /// Fails every write to a stream whose name contains `fragment`.
    #[must_use]
    pub fn with_failing_streams(mut self, fragment: impl Into<String>) -> Self {
        self.failing_streams.push(fragment.into());
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            failure_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
            version_conflict_probability: Probability::try_new(0.0)
                .expect("0.0 is valid probability"),
            failing_streams: Vec::new(),
        }
    }
}

/// Adds [`with_chaos`](ChaosEventStoreExt::with_chaos) to every event store.
pub trait ChaosEventStoreExt: Sized {
    /// Wraps `self` in a [`ChaosEventStore`].
    fn with_chaos(self, config: ChaosConfig) -> ChaosEventStore<Self>;
}

/// An event store that injects failures.
#[derive(Debug)]
pub struct ChaosEventStore<S> {
    store: S,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl<S> ChaosEventStore<S> {
    /// Wraps `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let prob_f32: f32 = probability.into();

        if prob_f32 <= 0.0 {
            return false;
        }

        if prob_f32 >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(prob_f32))
    }

    fn check_write(&self, stream: &str) -> EventStoreResult<()> {
        if self
            .config
            .failing_streams
            .iter()
            .any(|fragment| stream.contains(fragment.as_str()))
        {
            return Err(EventStoreError::Unavailable(format!(
                "injected write failure on {stream}"
            )));
        }
        self.check_failure(stream)
    }

    fn check_failure(&self, stream: &str) -> EventStoreResult<()> {
        if self.should_inject(self.config.failure_probability) {
            return Err(EventStoreError::Unavailable(format!(
                "injected failure on {stream}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<S> EventStore for ChaosEventStore<S>
where
    S: EventStore,
{
    async fn get_events(
        &self,
        stream: &str,
        start: Option<StreamVersion>,
        count: Option<usize>,
    ) -> EventStoreResult<Vec<FullEvent>> {
        self.check_failure(stream)?;
        self.store.get_events(stream, start, count).await
    }

    async fn get_events_backwards(
        &self,
        stream: &str,
        start: Option<StreamVersion>,
        count: Option<usize>,
    ) -> EventStoreResult<Vec<FullEvent>> {
        self.check_failure(stream)?;
        self.store.get_events_backwards(stream, start, count).await
    }

    async fn write_events(
        &self,
        stream: &str,
        events: &[FullEvent],
        commit_headers: &Headers,
        expected: ExpectedVersion,
    ) -> EventStoreResult<StreamVersion> {
        if self.should_inject(self.config.version_conflict_probability) {
            return Err(EventStoreError::WrongExpectedVersion {
                stream: stream.to_owned(),
                expected: None,
                current: StreamVersion::new_stream(),
            });
        }
        self.check_write(stream)?;
        self.store
            .write_events(stream, events, commit_headers, expected)
            .await
    }

    async fn write_metadata(&self, stream: &str, metadata: StreamMetadata) -> EventStoreResult<()> {
        self.check_write(stream)?;
        self.store.write_metadata(stream, metadata).await
    }

    async fn get_metadata(&self, stream: &str, key: &str) -> EventStoreResult<Option<String>> {
        self.check_failure(stream)?;
        self.store.get_metadata(stream, key).await
    }

    async fn size(&self, stream: &str) -> EventStoreResult<u64> {
        self.check_failure(stream)?;
        self.store.size(stream).await
    }
}

impl<S> ChaosEventStoreExt for S
where
    S: EventStore,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosEventStore<Self> {
        ChaosEventStore::new(self, config)
    }
}
