//! The delayed channel collaborator.

use super::ChannelKey;
use crate::errors::ChannelResult;
use crate::event::Headers;
use crate::types::Timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A message parked in a delayed channel until its channel is drained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayedMessage {
    /// Id of the inbound message.
    pub message_id: String,
    /// Headers of the inbound message.
    pub headers: Headers,
    /// The message body.
    pub message: serde_json::Value,
    /// When the message was enqueued.
    pub received: Timestamp,
    /// The channel the message was enqueued on.
    pub channel_key: ChannelKey,
}

/// A named FIFO queue, optionally partitioned by sub-key.
///
/// `None` and an empty sub-key address the same queue.
#[async_trait]
pub trait DelayedChannel: Send + Sync {
    /// Appends `message` to the queue.
    async fn add_to_queue(
        &self,
        channel: &ChannelKey,
        message: DelayedMessage,
        sub_key: Option<&str>,
    ) -> ChannelResult<()>;

    /// Number of queued messages.
    async fn size(&self, channel: &ChannelKey, sub_key: Option<&str>) -> ChannelResult<usize>;

    /// Time since the oldest queued message arrived, zero when empty.
    async fn age(&self, channel: &ChannelKey, sub_key: Option<&str>) -> ChannelResult<Duration>;

    /// Removes and returns up to `max` messages (all when `None`) in
    /// enqueue order.
    async fn pull(
        &self,
        channel: &ChannelKey,
        sub_key: Option<&str>,
        max: Option<usize>,
    ) -> ChannelResult<Vec<DelayedMessage>>;
}
