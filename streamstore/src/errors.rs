//! Error types for streamstore.
//!
//! The error design separates the failures reported by collaborators from
//! the failures of the engines that orchestrate them:
//!
//! - **EventStoreError**: returned by [`EventStore`](crate::store::EventStore)
//!   implementations
//! - **StreamError**: returned by the persistence engine
//!   ([`StoreStreams`](crate::StoreStreams))
//! - **ChannelError** and **DispatchError**: returned by delayed channels and
//!   the bulk dispatch engine
//! - **IdError**: mismatched identifier conversions
//!
//! Backing-store failures are never retried here. They reach the caller
//! through [`StreamError::Store`] unchanged, except for an optimistic
//! concurrency failure on the Domain write, which is reported as
//! [`StreamError::VersionConflict`] like a failed version check.

use crate::id::IdKind;
use crate::types::StreamVersion;
use thiserror::Error;

/// Errors converting an [`Id`](crate::Id) to a concrete kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The identifier holds a different kind than the one requested.
    #[error("identifier holds a {actual} value, not a {expected} value")]
    KindMismatch {
        /// The kind that was requested
        expected: IdKind,
        /// The kind actually held
        actual: IdKind,
    },
}

/// Errors reported by event store, snapshot store and publisher collaborators.
///
/// # Common Scenarios
///
/// - **WrongExpectedVersion**: another writer advanced the stream
/// - **ConnectionFailed** / **Unavailable** / **Timeout**: transient infrastructure trouble
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream's current version did not match the expected version.
    #[error("wrong expected version on stream '{stream}': expected {expected:?}, current is {current}")]
    WrongExpectedVersion {
        /// The physical stream name
        stream: String,
        /// The version the writer expected, `None` meaning "no stream"
        expected: Option<StreamVersion>,
        /// The version found in the store
        current: StreamVersion,
    },

    /// The connection to the backing store failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The backing store is temporarily unavailable.
    #[error("event store unavailable: {0}")]
    Unavailable(String),

    /// A timeout occurred while waiting for the operation.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unexpected internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors returned by the persistence engine.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The stream changed underneath the caller. Retrying re-reads fresh state.
    #[error("expected version {expected} on stream [{stream}] but found {actual:?}")]
    VersionConflict {
        /// The physical stream name
        stream: String,
        /// The commit version the caller held
        expected: StreamVersion,
        /// The version found in the store, `None` when the stream is missing
        actual: Option<StreamVersion>,
    },

    /// An event was raised on an OOB channel the stream never defined.
    #[error("stream [{stream}] raised an event on undefined oob channel '{channel}'")]
    UndefinedOobChannel {
        /// The physical stream name
        stream: String,
        /// The channel referenced by the event headers
        channel: String,
    },

    /// An OOB event carried no channel header.
    #[error("stream [{stream}] raised an oob event without a channel header")]
    MissingOobHeader {
        /// The physical stream name
        stream: String,
    },

    /// The stored OOB definition metadata could not be read or written.
    #[error("oob definition metadata is invalid: {0}")]
    Metadata(#[from] serde_json::Error),

    /// A collaborator failed; the error is propagated unchanged.
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for StreamError {
    fn from(err: EventStoreError) -> Self {
        Self::Store(err)
    }
}

/// Errors reported by a delayed channel collaborator.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The channel backend is unavailable.
    #[error("delayed channel unavailable: {0}")]
    Unavailable(String),

    /// An unexpected internal error occurred.
    #[error("delayed channel internal error: {0}")]
    Internal(String),
}

/// Error type returned by message handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by the bulk dispatch engine.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The delayed channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The real handler failed while handling a message.
    #[error("handler {handler} failed: {source}")]
    Handler {
        /// The handler type that failed
        handler: String,
        /// The handler's error
        source: HandlerError,
    },
}

/// Error returned by a sub-key extractor. Never fatal to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to extract channel sub-key: {0}")]
pub struct KeyExtractionError(pub String);

/// Type alias for event store results.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Type alias for persistence engine results.
pub type StreamResult<T> = Result<T, StreamError>;

/// Type alias for delayed channel results.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Type alias for dispatch results.
pub type DispatchResult<T> = Result<T, DispatchError>;
