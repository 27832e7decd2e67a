//! `streamstore` - event stream persistence and delayed bulk dispatch
//!
//! This library is the persistence and delivery core of an event-sourcing
//! runtime. It provides two engines:
//!
//! - [`StoreStreams`] reads and writes the append-only event streams of
//!   aggregates, coordinating a read-through stream cache, snapshots,
//!   sharded out-of-band (OOB) side channels and optimistic concurrency.
//! - [`BulkInvoker`] batches inbound messages per (handler, message type)
//!   channel and invokes the real handler in bulk once a count or age
//!   threshold is crossed.
//!
//! Storage, snapshots, publishing and channel queues are collaborators
//! described by the traits in [`store`] and [`dispatch::channel`]; the
//! `streamstore-memory` crate provides in-memory implementations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod id;
pub mod metrics;
pub mod mutator;
pub mod naming;
pub mod oob;
pub mod store;
pub mod store_streams;
pub mod stream;
pub mod types;

pub use cache::{SharedStreamCache, StreamCache};
pub use config::{DispatchConfig, FanOutConcurrency, IntervalMs, OobShardCount, StoreConfig};
pub use dispatch::{
    BulkInvoker, ChannelKey, Classification, DelayedChannel, DelayedConfig, DelayedMessage,
    DelayedRegistry, DispatchContext, Invocation, MessageHandler,
};
pub use errors::{
    ChannelError, DispatchError, EventStoreError, IdError, KeyExtractionError, StreamError,
};
pub use event::{EventDescriptor, FullEvent, Headers, StreamType};
pub use id::Id;
pub use mutator::{EventMutator, MutatorPipeline, Mutating};
pub use naming::{default_stream_name, StreamKey, StreamNamer};
pub use oob::{OobDefinition, OobDefinitionCache, OobWritePolicy};
pub use store::{EventStore, ExpectedVersion, MessagePublisher, SnapshotStore, StreamMetadata};
pub use store_streams::StoreStreams;
pub use stream::{EventSource, EventStream, PendingSnapshot, Snapshot};
pub use types::{StreamVersion, Timestamp};
