//! Delayed bulk dispatch.
//!
//! Messages for a (handler, message type) pair registered in a
//! [`DelayedRegistry`] are parked in a [`DelayedChannel`] instead of being
//! handled on arrival. Once a queue crosses its count or age threshold the
//! [`BulkInvoker`] drains it and invokes the handler once per message.
//!
//! Re-entrancy is tracked with an explicit [`DispatchContext`]: drained
//! messages carry their channel key in [`CHANNEL_KEY_HEADER`], and a context
//! that already triggered a drain does not trigger another.

pub mod channel;
mod invoker;
pub mod registry;

pub use channel::{DelayedChannel, DelayedMessage};
pub use invoker::{BulkInvoker, MessageHandler};
pub use registry::{Classification, ClassificationCache, DelayedConfig, DelayedRegistry, KeyExtractor};

use crate::event::{Headers, CHANNEL_KEY_HEADER};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a delayed channel: `{handler}:{message type}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelKey(String);

impl ChannelKey {
    /// The channel of `message_type` messages handled by `handler`.
    pub fn new(handler: &str, message_type: &str) -> Self {
        Self(format!("{handler}:{message_type}"))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message being handed to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Id of the inbound message.
    pub message_id: String,
    /// The message type name.
    pub message_type: String,
    /// Message headers.
    pub headers: Headers,
    /// The message body.
    pub message: serde_json::Value,
}

impl Invocation {
    /// A message with no headers.
    pub fn new(
        message_id: impl Into<String>,
        message_type: impl Into<String>,
        message: serde_json::Value,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: message_type.into(),
            headers: Headers::new(),
            message,
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Per inbound message dispatch state, threaded through every handler of
/// that message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchContext {
    channel_key: Option<String>,
    bulk_invoked: bool,
}

impl DispatchContext {
    /// The context of a freshly received message.
    pub fn for_invocation(invocation: &Invocation) -> Self {
        Self {
            channel_key: invocation
                .headers
                .get(CHANNEL_KEY_HEADER)
                .filter(|key| !key.is_empty())
                .cloned(),
            bulk_invoked: false,
        }
    }

    /// The channel being drained when the message is a bulk item.
    pub fn channel_key(&self) -> Option<&str> {
        self.channel_key.as_deref()
    }

    /// Whether handling this message already triggered a drain.
    pub const fn bulk_invoked(&self) -> bool {
        self.bulk_invoked
    }

    /// The same context, marked as having triggered a drain.
    #[must_use]
    pub fn with_bulk_invoked(self) -> Self {
        Self {
            bulk_invoked: true,
            ..self
        }
    }
}
