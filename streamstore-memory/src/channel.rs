use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use streamstore::errors::ChannelResult;
use streamstore::{ChannelKey, DelayedChannel, DelayedMessage};
use tokio::time::Instant;

type QueueKey = (ChannelKey, String);

/// In-memory delayed channel.
///
/// Ages are measured with tokio's clock, so paused test time controls them.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDelayedChannel {
    queues: Arc<Mutex<HashMap<QueueKey, VecDeque<(Instant, DelayedMessage)>>>>,
}

impl InMemoryDelayedChannel {
    /// Creates a channel with every queue empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of queued messages across every queue.
    pub fn total(&self) -> usize {
        self.queues.lock().values().map(VecDeque::len).sum()
    }
}

fn queue_key(channel: &ChannelKey, sub_key: Option<&str>) -> QueueKey {
    (channel.clone(), sub_key.unwrap_or_default().to_owned())
}

#[async_trait]
impl DelayedChannel for InMemoryDelayedChannel {
    async fn add_to_queue(
        &self,
        channel: &ChannelKey,
        message: DelayedMessage,
        sub_key: Option<&str>,
    ) -> ChannelResult<()> {
        self.queues
            .lock()
            .entry(queue_key(channel, sub_key))
            .or_default()
            .push_back((Instant::now(), message));
        Ok(())
    }

    async fn size(&self, channel: &ChannelKey, sub_key: Option<&str>) -> ChannelResult<usize> {
        Ok(self
            .queues
            .lock()
            .get(&queue_key(channel, sub_key))
            .map_or(0, VecDeque::len))
    }

    async fn age(&self, channel: &ChannelKey, sub_key: Option<&str>) -> ChannelResult<Duration> {
        Ok(self
            .queues
            .lock()
            .get(&queue_key(channel, sub_key))
            .and_then(VecDeque::front)
            .map_or(Duration::ZERO, |(received, _)| received.elapsed()))
    }

    async fn pull(
        &self,
        channel: &ChannelKey,
        sub_key: Option<&str>,
        max: Option<usize>,
    ) -> ChannelResult<Vec<DelayedMessage>> {
        let mut queues = self.queues.lock();
        let key = queue_key(channel, sub_key);
        let Some(queue) = queues.get_mut(&key) else {
            return Ok(Vec::new());
        };
        let take = max.map_or(queue.len(), |max| max.min(queue.len()));
        let pulled: Vec<_> = queue.drain(..take).map(|(_, message)| message).collect();
        if queue.is_empty() {
            queues.remove(&key);
        }
        Ok(pulled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use streamstore::{Headers, Timestamp};

    fn message(id: &str, channel: &ChannelKey) -> DelayedMessage {
        DelayedMessage {
            message_id: id.to_owned(),
            headers: Headers::new(),
            message: json!({}),
            received: Timestamp::now(),
            channel_key: channel.clone(),
        }
    }

    #[tokio::test]
    async fn pull_is_fifo_and_bounded() {
        let channel = InMemoryDelayedChannel::new();
        let key = ChannelKey::new("H", "M");
        for id in ["a", "b", "c"] {
            channel.add_to_queue(&key, message(id, &key), None).await.unwrap();
        }

        let first = channel.pull(&key, None, Some(2)).await.unwrap();
        assert_eq!(
            first.iter().map(|m| m.message_id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(channel.size(&key, None).await.unwrap(), 1);

        let rest = channel.pull(&key, None, None).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(channel.pull(&key, None, None).await.unwrap().is_empty());
        assert_eq!(channel.total(), 0);
    }

    #[tokio::test]
    async fn empty_sub_key_is_the_shared_queue() {
        let channel = InMemoryDelayedChannel::new();
        let key = ChannelKey::new("H", "M");
        channel.add_to_queue(&key, message("a", &key), Some("")).await.unwrap();
        channel.add_to_queue(&key, message("b", &key), Some("x")).await.unwrap();

        assert_eq!(channel.size(&key, None).await.unwrap(), 1);
        assert_eq!(channel.size(&key, Some("x")).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_the_oldest_message() {
        let channel = InMemoryDelayedChannel::new();
        let key = ChannelKey::new("H", "M");
        assert_eq!(channel.age(&key, None).await.unwrap(), Duration::ZERO);

        channel.add_to_queue(&key, message("a", &key), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        channel.add_to_queue(&key, message("b", &key), None).await.unwrap();

        assert_eq!(channel.age(&key, None).await.unwrap(), Duration::from_secs(3));
    }
}
