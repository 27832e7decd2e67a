use super::registry::{Classification, ClassificationCache, DelayedConfig, DelayedRegistry};
use super::{ChannelKey, DelayedChannel, DelayedMessage, DispatchContext, Invocation};
use crate::config::DispatchConfig;
use crate::errors::{DispatchError, DispatchResult, HandlerError};
use crate::event::CHANNEL_KEY_HEADER;
use crate::metrics::DispatchMetrics;
use crate::types::Timestamp;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// The real handler behind the bulk invoker.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The handler's name, the first half of its channel keys.
    fn name(&self) -> &str;

    /// Handles one message.
    async fn handle(&self, invocation: &Invocation) -> Result<(), HandlerError>;
}

/// Decides per message whether to handle it now or park it, and drains
/// parked messages in bulk.
pub struct BulkInvoker {
    channel: Option<Arc<dyn DelayedChannel>>,
    registry: Arc<DelayedRegistry>,
    classifications: ClassificationCache,
    config: DispatchConfig,
    metrics: Arc<DispatchMetrics>,
}

impl std::fmt::Debug for BulkInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkInvoker")
            .field("has_channel", &self.channel.is_some())
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BulkInvoker {
    /// Creates an invoker with no delayed channel: every message is handled
    /// immediately until [`with_channel`](Self::with_channel) is used.
    pub fn new(registry: Arc<DelayedRegistry>) -> Self {
        Self {
            channel: None,
            registry,
            classifications: ClassificationCache::new(),
            config: DispatchConfig::default(),
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Parks delayed messages in `channel`.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn DelayedChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Replaces the configuration.
    #[must_use]
    pub const fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// The invoker's metrics.
    pub const fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// The registry classifications are derived from.
    pub const fn registry(&self) -> &Arc<DelayedRegistry> {
        &self.registry
    }

    /// How `message_type` messages for `handler` are dispatched.
    pub fn classification(&self, handler: &str, message_type: &str) -> Classification {
        self.classifications
            .classify(&ChannelKey::new(handler, message_type), &self.registry)
    }

    /// Dispatches one message to `handler`.
    ///
    /// Returns the context to pass to the next handler of the same inbound
    /// message; it records whether this call drained a channel, so one
    /// inbound message drains at most once.
    #[instrument(skip_all, fields(handler = handler.name(), message_type = %invocation.message_type))]
    pub async fn invoke(
        &self,
        handler: &dyn MessageHandler,
        invocation: &Invocation,
        context: DispatchContext,
    ) -> DispatchResult<DispatchContext> {
        let channel_key = ChannelKey::new(handler.name(), &invocation.message_type);

        let Some(channel) = self.channel.as_ref() else {
            handle_now(handler, invocation).await?;
            return Ok(context);
        };

        let classification = self.classifications.classify(&channel_key, &self.registry);
        let config = match (classification, context.channel_key()) {
            (_, Some(draining)) if draining == channel_key.as_str() => {
                handle_now(handler, invocation).await?;
                return Ok(context);
            }
            (Classification::NotDelayed, _) => {
                handle_now(handler, invocation).await?;
                return Ok(context);
            }
            (Classification::Delayed(_), Some(draining)) => {
                debug!(draining, channel = %channel_key, "Skipping handler during another channel's drain");
                return Ok(context);
            }
            (Classification::Delayed(config), None) => config,
        };

        let sub_key = sub_key_for(&config, invocation);
        let parked = DelayedMessage {
            message_id: invocation.message_id.clone(),
            headers: invocation.headers.clone(),
            message: invocation.message.clone(),
            received: Timestamp::now(),
            channel_key: channel_key.clone(),
        };
        self.metrics.delayed_messages.increment();
        channel
            .add_to_queue(&channel_key, parked, sub_key.as_deref())
            .await?;

        if context.bulk_invoked() {
            debug!("Limiting bulk processing for a single message to a single drain");
            return Ok(context);
        }

        let age = match config.delay {
            Some(_) => Some(channel.age(&channel_key, sub_key.as_deref()).await?),
            None => None,
        };
        let size = match config.count {
            Some(_) => Some(channel.size(&channel_key, sub_key.as_deref()).await?),
            None => None,
        };

        if !config.should_execute(size, age) {
            debug!(
                count = ?config.count,
                delay = ?config.delay,
                ?size,
                ?age,
                channel = %channel_key,
                sub_key = ?sub_key,
                "Threshold not reached - delaying"
            );
            return Ok(context);
        }

        info!(
            count = ?config.count,
            delay = ?config.delay,
            ?size,
            ?age,
            channel = %channel_key,
            sub_key = ?sub_key,
            "Threshold reached - bulk processing"
        );
        let context = context.with_bulk_invoked();
        self.drain_channel(
            channel.as_ref(),
            handler,
            &invocation.message_type,
            &channel_key,
            sub_key.as_deref(),
            &config,
        )
        .await?;
        Ok(context)
    }

    /// Drains one queue of `handler`'s `message_type` channel regardless of
    /// thresholds, returning how many messages were handled.
    ///
    /// Channels that are not delayed, or an invoker without a channel,
    /// drain nothing.
    #[instrument(skip(self, handler), fields(handler = handler.name()))]
    pub async fn drain(
        &self,
        handler: &dyn MessageHandler,
        message_type: &str,
        sub_key: Option<&str>,
    ) -> DispatchResult<usize> {
        let Some(channel) = self.channel.as_ref() else {
            return Ok(0);
        };
        let channel_key = ChannelKey::new(handler.name(), message_type);
        match self.classifications.classify(&channel_key, &self.registry) {
            Classification::NotDelayed => Ok(0),
            Classification::Delayed(config) => {
                self.drain_channel(
                    channel.as_ref(),
                    handler,
                    message_type,
                    &channel_key,
                    sub_key,
                    &config,
                )
                .await
            }
        }
    }

    /// Pulls up to the count threshold and handles each message in order.
    ///
    /// Messages are removed from the channel before they are handled; a
    /// handler failure loses the rest of the pulled batch.
    async fn drain_channel(
        &self,
        channel: &dyn DelayedChannel,
        handler: &dyn MessageHandler,
        message_type: &str,
        channel_key: &ChannelKey,
        sub_key: Option<&str>,
        config: &DelayedConfig,
    ) -> DispatchResult<usize> {
        let messages = channel.pull(channel_key, sub_key, config.count).await?;
        if messages.is_empty() {
            debug!(channel = %channel_key, ?sub_key, "No delayed messages found");
            return Ok(0);
        }

        let count = messages.len();
        self.metrics.bulk_invokes.increment();
        self.metrics
            .bulk_size
            .record(u64::try_from(count).unwrap_or(u64::MAX));
        debug!(count, channel = %channel_key, ?sub_key, "Starting bulk invoke");

        let started = Instant::now();
        for (index, message) in messages.into_iter().enumerate() {
            debug!(index, count, "Invoking handler");
            let mut headers = message.headers;
            headers.insert(CHANNEL_KEY_HEADER.to_owned(), channel_key.to_string());
            let invocation = Invocation {
                message_id: message.message_id,
                message_type: message_type.to_owned(),
                headers,
                message: message.message,
            };
            handle_now(handler, &invocation).await?;
        }
        let elapsed = started.elapsed();
        self.metrics.bulk_time.record(elapsed);

        if elapsed > self.config.slow_bulk_threshold() {
            warn!(
                target: "slow_alarm",
                count,
                channel = %channel_key,
                ?sub_key,
                elapsed_secs = elapsed.as_secs_f64(),
                "Bulk invoke was slow"
            );
        }
        info!(
            count,
            channel = %channel_key,
            ?sub_key,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "Bulk invoke finished"
        );
        Ok(count)
    }
}

async fn handle_now(handler: &dyn MessageHandler, invocation: &Invocation) -> DispatchResult<()> {
    debug!(message_id = %invocation.message_id, "Invoking handler");
    handler
        .handle(invocation)
        .await
        .map_err(|source| DispatchError::Handler {
            handler: handler.name().to_owned(),
            source,
        })
}

fn sub_key_for(config: &DelayedConfig, invocation: &Invocation) -> Option<String> {
    let extractor = config.key_extractor.as_ref()?;
    match extractor(&invocation.message) {
        Ok(key) if key.is_empty() => None,
        Ok(key) => Some(key),
        Err(err) => {
            warn!(message_type = %invocation.message_type, error = %err, "Failed to get sub-key from message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ChannelResult, KeyExtractionError};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    #[derive(Default)]
    struct QueueChannel {
        queues: Mutex<HashMap<(String, String), VecDeque<(Instant, DelayedMessage)>>>,
    }

    fn queue_key(channel: &ChannelKey, sub_key: Option<&str>) -> (String, String) {
        (channel.to_string(), sub_key.unwrap_or_default().to_owned())
    }

    #[async_trait]
    impl DelayedChannel for QueueChannel {
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
                .map_or(Duration::ZERO, |(at, _)| at.elapsed()))
        }

        async fn pull(
            &self,
            channel: &ChannelKey,
            sub_key: Option<&str>,
            max: Option<usize>,
        ) -> ChannelResult<Vec<DelayedMessage>> {
            let mut queues = self.queues.lock();
            let Some(queue) = queues.get_mut(&queue_key(channel, sub_key)) else {
                return Ok(Vec::new());
            };
            let take = max.unwrap_or(queue.len()).min(queue.len());
            Ok(queue.drain(..take).map(|(_, message)| message).collect())
        }
    }

    struct Recorder {
        name: &'static str,
        seen: Mutex<Vec<Invocation>>,
        pause: Option<Duration>,
    }

    impl Recorder {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                seen: Mutex::new(Vec::new()),
                pause: None,
            }
        }

        fn ids(&self) -> Vec<String> {
            self.seen.lock().iter().map(|i| i.message_id.clone()).collect()
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, invocation: &Invocation) -> Result<(), HandlerError> {
            if let Some(pause) = self.pause {
                tokio::time::sleep(pause).await;
            }
            self.seen.lock().push(invocation.clone());
            Ok(())
        }
    }

    fn hello(id: u32) -> Invocation {
        Invocation::new(id.to_string(), "SayHello", json!({ "name": format!("n{id}") }))
    }

    fn invoker(config: DelayedConfig) -> (Arc<QueueChannel>, BulkInvoker) {
        let channel = Arc::new(QueueChannel::default());
        let registry = Arc::new(DelayedRegistry::new().with("Greeter", "SayHello", config));
        let invoker = BulkInvoker::new(registry).with_channel(channel.clone());
        (channel, invoker)
    }

    async fn deliver(invoker: &BulkInvoker, handler: &Recorder, invocation: &Invocation) -> DispatchContext {
        invoker
            .invoke(handler, invocation, DispatchContext::for_invocation(invocation))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn count_threshold_drains_in_enqueue_order() {
        let (channel, invoker) = invoker(DelayedConfig::count(3));
        let handler = Recorder::new("Greeter");

        let first = deliver(&invoker, &handler, &hello(1)).await;
        deliver(&invoker, &handler, &hello(2)).await;
        assert!(handler.ids().is_empty());
        assert!(!first.bulk_invoked());

        let third = deliver(&invoker, &handler, &hello(3)).await;

        assert_eq!(handler.ids(), vec!["1", "2", "3"]);
        assert!(third.bulk_invoked());
        assert_eq!(channel.size(&ChannelKey::new("Greeter", "SayHello"), None).await.unwrap(), 0);
        assert_eq!(invoker.metrics().bulk_invokes.get(), 1);
        assert_eq!(invoker.metrics().delayed_messages.get(), 3);
        assert_eq!(invoker.metrics().bulk_size.samples(), vec![3]);
    }

    #[tokio::test]
    async fn drained_items_are_marked_with_their_channel() {
        let (_, invoker) = invoker(DelayedConfig::count(1));
        let handler = Recorder::new("Greeter");

        deliver(&invoker, &handler, &hello(1)).await;

        let seen = handler.seen.lock();
        assert_eq!(seen[0].headers[CHANNEL_KEY_HEADER], "Greeter:SayHello");
    }

    #[tokio::test]
    async fn undelayed_channels_are_handled_immediately() {
        let (channel, invoker) = invoker(DelayedConfig::count(3));
        let handler = Recorder::new("Greeter");
        let bye = Invocation::new("9", "SayBye", json!({}));

        deliver(&invoker, &handler, &bye).await;

        assert_eq!(handler.ids(), vec!["9"]);
        assert!(channel.queues.lock().is_empty());
    }

    #[tokio::test]
    async fn no_channel_means_immediate_handling() {
        let registry = Arc::new(DelayedRegistry::new().with("Greeter", "SayHello", DelayedConfig::count(3)));
        let invoker = BulkInvoker::new(Arc::clone(&registry));
        let handler = Recorder::new("Greeter");

        deliver(&invoker, &handler, &hello(1)).await;

        assert_eq!(handler.ids(), vec!["1"]);
        assert_eq!(registry.inspections(), 0);
    }

    #[tokio::test]
    async fn bulk_items_of_this_channel_are_never_requeued() {
        let (channel, invoker) = invoker(DelayedConfig::count(3));
        let handler = Recorder::new("Greeter");
        let redelivered = hello(4).with_header(CHANNEL_KEY_HEADER, "Greeter:SayHello");

        deliver(&invoker, &handler, &redelivered).await;

        assert_eq!(handler.ids(), vec!["4"]);
        assert!(channel.queues.lock().is_empty());
    }

    #[tokio::test]
    async fn bulk_items_of_other_channels_are_skipped() {
        let (channel, invoker) = invoker(DelayedConfig::count(3));
        let handler = Recorder::new("Greeter");
        let foreign = hello(5).with_header(CHANNEL_KEY_HEADER, "Auditor:SayHello");

        deliver(&invoker, &handler, &foreign).await;

        assert!(handler.ids().is_empty());
        assert!(channel.queues.lock().is_empty());
    }

    #[tokio::test]
    async fn one_inbound_message_drains_at_most_once() {
        let (channel, invoker) = invoker(DelayedConfig::count(1));
        let handler = Recorder::new("Greeter");
        let message = hello(1);

        let context = DispatchContext::for_invocation(&message).with_bulk_invoked();
        invoker.invoke(&handler, &message, context).await.unwrap();

        assert!(handler.ids().is_empty());
        assert_eq!(channel.size(&ChannelKey::new("Greeter", "SayHello"), None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sub_keys_partition_the_channel() {
        let config = DelayedConfig::count(2).with_key_extractor(|message| {
            message["room"]
                .as_str()
                .map(str::to_owned)
                .ok_or_else(|| KeyExtractionError("no room".into()))
        });
        let (channel, invoker) = invoker(config);
        let handler = Recorder::new("Greeter");
        let in_room = |id: u32, room: &str| {
            Invocation::new(id.to_string(), "SayHello", json!({ "room": room }))
        };

        deliver(&invoker, &handler, &in_room(1, "a")).await;
        deliver(&invoker, &handler, &in_room(2, "b")).await;
        assert!(handler.ids().is_empty());

        deliver(&invoker, &handler, &in_room(3, "a")).await;
        assert_eq!(handler.ids(), vec!["1", "3"]);

        let key = ChannelKey::new("Greeter", "SayHello");
        assert_eq!(channel.size(&key, Some("b")).await.unwrap(), 1);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn key_extraction_failure_falls_back_to_the_shared_queue() {
        let config = DelayedConfig::count(5)
            .with_key_extractor(|_| Err(KeyExtractionError("unreadable".into())));
        let (channel, invoker) = invoker(config);
        let handler = Recorder::new("Greeter");

        deliver(&invoker, &handler, &hello(1)).await;

        assert_eq!(channel.size(&ChannelKey::new("Greeter", "SayHello"), None).await.unwrap(), 1);
        assert!(logs_contain("Failed to get sub-key from message"));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_threshold_drains_old_queues() {
        let (_, invoker) = invoker(DelayedConfig::delay(Duration::from_secs(10)));
        let handler = Recorder::new("Greeter");

        deliver(&invoker, &handler, &hello(1)).await;
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(handler.ids().is_empty());

        deliver(&invoker, &handler, &hello(2)).await;
        assert_eq!(handler.ids(), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn external_drain_ignores_thresholds() {
        let (_, invoker) = invoker(DelayedConfig::count(10));
        let handler = Recorder::new("Greeter");
        for id in 1..=4 {
            deliver(&invoker, &handler, &hello(id)).await;
        }

        let drained = invoker.drain(&handler, "SayHello", None).await.unwrap();

        assert_eq!(drained, 4);
        assert_eq!(handler.ids(), vec!["1", "2", "3", "4"]);
        assert_eq!(invoker.drain(&handler, "SayHello", None).await.unwrap(), 0);
        assert_eq!(invoker.drain(&handler, "SayBye", None).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[tracing_test::traced_test]
    async fn slow_drains_raise_an_alarm() {
        let (_, invoker) = invoker(DelayedConfig::count(2));
        let invoker = invoker.with_config(DispatchConfig::default().with_slow_bulk_threshold(Duration::from_secs(1)));
        let handler = Recorder {
            pause: Some(Duration::from_millis(600)),
            ..Recorder::new("Greeter")
        };

        deliver(&invoker, &handler, &hello(1)).await;
        deliver(&invoker, &handler, &hello(2)).await;

        assert_eq!(handler.ids().len(), 2);
        assert!(logs_contain("Bulk invoke was slow"));
    }

    #[tokio::test]
    async fn handler_failures_name_the_handler() {
        struct Failing;

        #[async_trait]
        impl MessageHandler for Failing {
            fn name(&self) -> &str {
                "Failing"
            }

            async fn handle(&self, _invocation: &Invocation) -> Result<(), HandlerError> {
                Err("boom".into())
            }
        }

        let invoker = BulkInvoker::new(Arc::new(DelayedRegistry::new()));
        let message = hello(1);
        let err = invoker
            .invoke(&Failing, &message, DispatchContext::for_invocation(&message))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Handler { ref handler, .. } if handler == "Failing"));
    }
}
