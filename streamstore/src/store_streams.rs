//! The event stream persistence engine.
//!
//! [`StoreStreams`] reads aggregate streams through a read-through cache,
//! loads snapshots for snapshotting kinds, shards OOB channels across a fixed
//! number of physical partitions and writes uncommitted events with
//! optimistic concurrency on the Domain partition.
//!
//! A write runs its stages in order: Domain events, OOB definitions,
//! snapshot, then OOB events. The stages are not atomic as a whole. A
//! failure after the Domain write leaves those events committed while the
//! later stages are not, so retries must tolerate duplicated OOB events and
//! snapshots.

use crate::cache::{SharedStreamCache, StreamCache};
use crate::config::StoreConfig;
use crate::errors::{EventStoreError, EventStoreResult, StreamError, StreamResult};
use crate::event::{event_id_for, FullEvent, Headers, StreamType};
use crate::id::Id;
use crate::metrics::StreamMetrics;
use crate::mutator::{Mutating, MutatorPipeline};
use crate::naming::{default_namer, oob_partition_name, StreamKey, StreamNamer};
use crate::oob::{OobDefinition, OobDefinitionCache, OobWritePolicy, OOB_METADATA_KEY};
use crate::store::{EventStore, ExpectedVersion, MessagePublisher, SnapshotStore, StreamMetadata};
use crate::stream::{EventSource, EventStream};
use crate::types::StreamVersion;
use futures::{StreamExt, TryStreamExt};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Reads and writes aggregate event streams.
#[derive(Clone)]
pub struct StoreStreams {
    store: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    publisher: Arc<dyn MessagePublisher>,
    cache: Arc<dyn StreamCache>,
    oob_definitions: Arc<OobDefinitionCache>,
    namer: StreamNamer,
    mutators: MutatorPipeline,
    config: StoreConfig,
    metrics: Arc<StreamMetrics>,
}

impl std::fmt::Debug for StoreStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreStreams")
            .field("mutators", &self.mutators)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl StoreStreams {
    /// Creates an engine over the given collaborators with default
    /// configuration, a [`SharedStreamCache`] and the default naming scheme.
    pub fn new(
        store: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        let config = StoreConfig::default();
        Self {
            store,
            snapshots,
            publisher,
            cache: Arc::new(SharedStreamCache::new()),
            oob_definitions: Arc::new(config.oob_definition_cache()),
            namer: default_namer(),
            mutators: MutatorPipeline::new(),
            config,
            metrics: Arc::new(StreamMetrics::new()),
        }
    }

    /// Replaces the stream cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn StreamCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the mutator pipeline.
    #[must_use]
    pub fn with_mutators(mut self, mutators: MutatorPipeline) -> Self {
        self.mutators = mutators;
        self
    }

    /// Replaces the configuration.
    ///
    /// This also replaces the OOB definition cache with an empty one using
    /// the new windows; call [`with_oob_cache`](Self::with_oob_cache)
    /// afterwards to share a cache.
    #[must_use]
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.oob_definitions = Arc::new(config.oob_definition_cache());
        self.config = config;
        self
    }

    /// Replaces the stream naming scheme.
    #[must_use]
    pub fn with_namer(mut self, namer: StreamNamer) -> Self {
        self.namer = namer;
        self
    }

    /// Shares an OOB definition cache with other engines.
    #[must_use]
    pub fn with_oob_cache(mut self, oob_definitions: Arc<OobDefinitionCache>) -> Self {
        self.oob_definitions = oob_definitions;
        self
    }

    /// Starts the periodic sweep of expired OOB definitions.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_oob_sweeper(&self) -> JoinHandle<()> {
        self.oob_definitions
            .spawn_sweeper(self.config.oob_sweep_interval())
    }

    /// The engine's metrics.
    pub const fn metrics(&self) -> &Arc<StreamMetrics> {
        &self.metrics
    }

    /// The OOB definition cache.
    pub const fn oob_definitions(&self) -> &Arc<OobDefinitionCache> {
        &self.oob_definitions
    }

    /// The engine's configuration.
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Reads the stream of aggregate `A`.
    ///
    /// Cached streams are returned without touching the store. Otherwise the
    /// snapshot (for snapshotting kinds), the events after it and the OOB
    /// definitions are loaded and a committed copy is cached.
    #[instrument(skip(self, parents), fields(kind = A::NAME))]
    pub async fn get_stream<A: EventSource>(
        &self,
        bucket: &str,
        stream_id: Id,
        parents: Vec<Id>,
    ) -> StreamResult<EventStream> {
        let stream_name = self.name(A::NAME, StreamType::Domain, bucket, &stream_id, &parents);

        if let Some(cached) = self.cache.retrieve(&stream_name) {
            self.metrics.cache_hits.increment();
            debug!(stream = %stream_name, "Found stream in cache");
            return Ok(cached.as_ref().clone());
        }
        self.metrics.cache_misses.increment();
        debug!(stream = %stream_name, "Stream not in cache - reading from store");

        let snapshot = if A::SNAPSHOTTING {
            let snapshot = self
                .snapshots
                .get_snapshot(A::NAME, bucket, &stream_id, &parents)
                .await?;
            match &snapshot {
                Some(snapshot) => debug!(version = %snapshot.version, "Retrieved snapshot"),
                None => debug!("No snapshot found"),
            }
            snapshot
        } else {
            None
        };

        let start = snapshot.as_ref().map(|snapshot| snapshot.version.next());
        let (events, oobs) = tokio::try_join!(
            async {
                self.store
                    .get_events(&stream_name, start, None)
                    .await
                    .map_err(StreamError::from)
            },
            self.resolve_oob_definitions(&stream_name),
        )?;

        let stream = EventStream::from_history(
            A::NAME,
            bucket,
            stream_id,
            parents,
            oobs.as_ref().clone(),
            events,
            snapshot,
        );
        self.cache
            .cache(&stream_name, Arc::new(stream.clone_committed()));

        debug!(stream = %stream_name, version = %stream.commit_version(), "Stream read");
        Ok(stream)
    }

    /// Creates a stream for aggregate `A` that has never been written.
    pub fn new_stream<A: EventSource>(
        &self,
        bucket: &str,
        stream_id: Id,
        parents: Vec<Id>,
    ) -> EventStream {
        debug!(kind = A::NAME, bucket, stream_id = %stream_id, "Creating new stream");
        EventStream::new(A::NAME, bucket, stream_id, parents)
    }

    /// Reads events oldest first from the Domain partition or an OOB channel.
    ///
    /// OOB reads take `count / shards` events from each partition and
    /// concatenate them in partition order.
    #[instrument(skip(self, stream), fields(stream_id = %stream.stream_id()))]
    pub async fn get_events(
        &self,
        stream: &EventStream,
        start: Option<StreamVersion>,
        count: Option<usize>,
        oob: Option<&str>,
    ) -> StreamResult<Vec<FullEvent>> {
        let Some(channel) = oob else {
            let name = self.stream_name(stream, StreamType::Domain);
            return Ok(self.store.get_events(&name, start, count).await?);
        };

        let per_shard = count.map(|count| count / self.config.shards());
        let store = &self.store;
        let parts = self
            .fan_out(stream, channel, move |partition| async move {
                store.get_events(&partition, start, per_shard).await
            })
            .await?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Reads events newest first from the Domain partition or an OOB channel.
    #[instrument(skip(self, stream), fields(stream_id = %stream.stream_id()))]
    pub async fn get_events_backwards(
        &self,
        stream: &EventStream,
        start: Option<StreamVersion>,
        count: Option<usize>,
        oob: Option<&str>,
    ) -> StreamResult<Vec<FullEvent>> {
        let Some(channel) = oob else {
            let name = self.stream_name(stream, StreamType::Domain);
            return Ok(self.store.get_events_backwards(&name, start, count).await?);
        };

        let per_shard = count.map(|count| count / self.config.shards());
        let store = &self.store;
        let parts = self
            .fan_out(stream, channel, move |partition| async move {
                store.get_events_backwards(&partition, start, per_shard).await
            })
            .await?;
        Ok(parts.into_iter().flatten().collect())
    }

    /// Number of events in the Domain partition or, summed over every
    /// partition, in an OOB channel.
    pub async fn get_size(&self, stream: &EventStream, oob: Option<&str>) -> StreamResult<u64> {
        let Some(channel) = oob else {
            let name = self.stream_name(stream, StreamType::Domain);
            return Ok(self.store.size(&name).await?);
        };

        let store = &self.store;
        let sizes = self
            .fan_out(stream, channel, move |partition| async move {
                store.size(&partition).await
            })
            .await?;
        Ok(sizes.into_iter().sum())
    }

    /// Writes everything `stream` has pending.
    ///
    /// Undefined OOB channels are rejected before anything is written. The
    /// cached copy of the stream is evicted on such a rejection and before
    /// Domain events or OOB definitions are written. A concurrent
    /// modification surfaces as [`StreamError::VersionConflict`].
    #[instrument(skip(self, stream, commit_headers), fields(stream_id = %stream.stream_id(), bucket = stream.bucket()))]
    pub async fn write_stream(
        &self,
        commit_id: Uuid,
        stream: &EventStream,
        commit_headers: &Headers,
    ) -> StreamResult<()> {
        let stream_name = self.stream_name(stream, StreamType::Domain);
        debug!(
            events = stream.uncommitted().len(),
            %commit_id,
            "Writing stream"
        );
        self.metrics.saved.increment();

        let events = self.mutate(commit_id, stream);

        let mut definitions = stream.oobs().to_vec();
        for pending in stream.pending_oobs() {
            match definitions.iter_mut().find(|existing| existing.id == pending.id) {
                Some(existing) => *existing = pending.clone(),
                None => definitions.push(pending.clone()),
            }
        }

        let (domain, oob): (Vec<_>, Vec<_>) = events
            .into_iter()
            .partition(|event| event.descriptor.stream_type == StreamType::Domain);
        let groups = self.group_oob_events(&stream_name, oob, &definitions)?;

        if !domain.is_empty() {
            self.cache.evict(&stream_name);
            debug!(events = domain.len(), "Committing domain events");
            self.store
                .write_events(
                    &stream_name,
                    &domain,
                    commit_headers,
                    ExpectedVersion::after(stream.commit_version()),
                )
                .await
                .map_err(|err| match err {
                    EventStoreError::WrongExpectedVersion { current, .. } => {
                        StreamError::VersionConflict {
                            stream: stream_name.clone(),
                            expected: stream.commit_version(),
                            actual: Some(current),
                        }
                    }
                    other => StreamError::Store(other),
                })?;
        }

        if !stream.pending_oobs().is_empty() {
            self.forget(&stream_name);
            let serialized = serde_json::to_string(&definitions)?;
            debug!(definitions = %serialized, "Defining oob channels");
            self.store
                .write_metadata(
                    &stream_name,
                    StreamMetadata::custom(OOB_METADATA_KEY, serialized),
                )
                .await?;
        }

        if let Some(snapshot) = stream.pending_snapshot() {
            debug!(version = %snapshot.version, "Committing snapshot");
            self.snapshots
                .write_snapshot(
                    stream.kind(),
                    stream.bucket(),
                    stream.stream_id(),
                    stream.parents(),
                    snapshot,
                    commit_headers,
                )
                .await?;
        }

        if !groups.is_empty() {
            let oob_stream = self.stream_name(stream, StreamType::Oob);
            for (definition, group) in groups {
                let shard = rand::rng().random_range(1..=self.config.shards());
                let partition = oob_partition_name(&oob_stream, &definition.id, shard);
                self.write_oob_group(&partition, &definition, &group, commit_headers)
                    .await?;
            }
        }

        Ok(())
    }

    /// Checks that the store has not moved past the stream's commit version.
    ///
    /// On a mismatch the cached copy is evicted and
    /// [`StreamError::VersionConflict`] is returned.
    #[instrument(skip(self, stream), fields(stream_id = %stream.stream_id(), bucket = stream.bucket()))]
    pub async fn verify_version(&self, stream: &EventStream) -> StreamResult<()> {
        let expected = stream.commit_version();
        if expected.is_new_stream() {
            return Ok(());
        }
        debug!(version = %expected, "Verifying stream version");

        let stream_name = self.stream_name(stream, StreamType::Domain);
        let last = self
            .store
            .get_events_backwards(&stream_name, None, Some(1))
            .await?;
        let actual = last.first().map(|event| event.descriptor.version);

        if actual == Some(expected) {
            debug!("Verified stream version");
            return Ok(());
        }

        if let Some(actual) = actual.filter(|actual| *actual < expected) {
            warn!(stream = %stream_name, store_version = %actual, our_version = %expected, "Store is behind the stream");
            warn!(
                stream = %stream_name,
                snapshot_version = ?stream.snapshot().map(|snapshot| snapshot.version),
                committed = stream.committed().len(),
                uncommitted = stream.uncommitted().len(),
                "Stream state at version anomaly"
            );
        }

        self.cache.evict(&stream_name);
        Err(StreamError::VersionConflict {
            stream: stream_name,
            expected,
            actual,
        })
    }

    fn name(
        &self,
        kind: &str,
        stream_type: StreamType,
        bucket: &str,
        id: &Id,
        parents: &[Id],
    ) -> String {
        (self.namer)(&StreamKey {
            kind,
            stream_type,
            bucket,
            id,
            parents,
        })
    }

    fn stream_name(&self, stream: &EventStream, stream_type: StreamType) -> String {
        self.name(
            stream.kind(),
            stream_type,
            stream.bucket(),
            stream.stream_id(),
            stream.parents(),
        )
    }

    async fn resolve_oob_definitions(
        &self,
        stream_name: &str,
    ) -> StreamResult<Arc<Vec<OobDefinition>>> {
        if let Some(definitions) = self.oob_definitions.get_fresh(stream_name) {
            return Ok(definitions);
        }

        let metadata = self.store.get_metadata(stream_name, OOB_METADATA_KEY).await?;
        let definitions = match metadata.as_deref() {
            None | Some("") => Vec::new(),
            Some(json) => serde_json::from_str(json)?,
        };
        Ok(self.oob_definitions.insert(stream_name, definitions))
    }

    fn mutate(&self, commit_id: Uuid, stream: &EventStream) -> Vec<FullEvent> {
        let mut sequence = 0_u32;
        stream
            .uncommitted()
            .iter()
            .map(|event| {
                let mut descriptor = event.descriptor.clone();
                let mut payload = event.payload.clone();
                if !self.mutators.is_empty() {
                    let mutated = self.mutators.apply(Mutating {
                        payload,
                        headers: descriptor.headers.clone(),
                    });
                    descriptor.headers.extend(mutated.headers);
                    payload = mutated.payload;
                }
                descriptor.commit_id = Some(commit_id);
                let event_id = event_id_for(commit_id, sequence);
                sequence = sequence.wrapping_add(1);
                FullEvent {
                    event_id: Some(event_id),
                    descriptor,
                    payload,
                }
            })
            .collect()
    }

    /// Groups OOB events per channel in first-seen order, failing on any
    /// channel without a definition.
    fn group_oob_events(
        &self,
        stream_name: &str,
        events: Vec<FullEvent>,
        definitions: &[OobDefinition],
    ) -> StreamResult<Vec<(OobDefinition, Vec<FullEvent>)>> {
        let mut groups: Vec<(OobDefinition, Vec<FullEvent>)> = Vec::new();
        for event in events {
            let Some(channel) = event.descriptor.oob_channel() else {
                self.forget(stream_name);
                return Err(StreamError::MissingOobHeader {
                    stream: stream_name.to_owned(),
                });
            };
            if let Some((_, group)) = groups.iter_mut().find(|(def, _)| def.id == channel) {
                group.push(event);
                continue;
            }
            let Some(definition) = definitions.iter().find(|def| def.id == channel) else {
                self.forget(stream_name);
                return Err(StreamError::UndefinedOobChannel {
                    stream: stream_name.to_owned(),
                    channel: channel.to_owned(),
                });
            };
            groups.push((definition.clone(), vec![event]));
        }
        Ok(groups)
    }

    /// Drops the cached stream and its cached OOB definitions.
    fn forget(&self, stream_name: &str) {
        self.cache.evict(stream_name);
        self.oob_definitions.purge(stream_name);
    }

    async fn write_oob_group(
        &self,
        partition: &str,
        definition: &OobDefinition,
        group: &[FullEvent],
        commit_headers: &Headers,
    ) -> StreamResult<()> {
        match definition.policy() {
            OobWritePolicy::Transient => {
                debug!(partition, events = group.len(), "Publishing transient oob events");
                self.publisher
                    .publish(partition, group, commit_headers)
                    .await?;
            }
            OobWritePolicy::Expiring(max_age) => {
                debug!(partition, events = group.len(), "Writing expiring oob events");
                let version = self
                    .store
                    .write_events(partition, group, commit_headers, ExpectedVersion::Any)
                    .await?;
                // The partition was created by this write
                if version == StreamVersion::new_stream().advance(group.len()) {
                    self.store
                        .write_metadata(partition, StreamMetadata::max_age(max_age))
                        .await?;
                }
            }
            OobWritePolicy::Durable => {
                debug!(partition, events = group.len(), "Writing oob events");
                self.store
                    .write_events(partition, group, commit_headers, ExpectedVersion::Any)
                    .await?;
            }
        }
        Ok(())
    }

    async fn fan_out<T, F, Fut>(
        &self,
        stream: &EventStream,
        channel: &str,
        op: F,
    ) -> EventStoreResult<Vec<T>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = EventStoreResult<T>>,
    {
        let oob_stream = self.stream_name(stream, StreamType::Oob);
        futures::stream::iter(1..=self.config.shards())
            .map(|shard| op(oob_partition_name(&oob_stream, channel, shard)))
            .buffered(self.config.fan_out())
            .try_collect()
            .await
    }
}
