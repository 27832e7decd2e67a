//! A guestbook per room.
//!
//! `SayHello` messages are parked per room and handled in bulk. Each greeting
//! becomes a Domain event on the room's guestbook stream plus an entry on the
//! `audit` OOB channel; every tenth greeting snapshots the running count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use streamstore::errors::{HandlerError, KeyExtractionError};
use streamstore::{
    BulkInvoker, DelayedChannel, DelayedConfig, DelayedRegistry, EventSource, Headers, Id,
    Invocation, MessageHandler, OobDefinition, StoreStreams,
};
use tracing::info;
use uuid::Uuid;

/// Message type handled by [`Greeter`].
pub const SAY_HELLO: &str = "SayHello";

/// Bucket holding every guestbook.
pub const BUCKET: &str = "hotel";

/// OOB channel receiving an audit entry per greeting.
pub const AUDIT: &str = "audit";

const SNAPSHOT_EVERY: usize = 10;

/// The guestbook of one room.
pub struct Guestbook;

impl EventSource for Guestbook {
    const NAME: &'static str = "Guestbook";
    const SNAPSHOTTING: bool = true;
}

/// A `SayHello` message from `guest` in `room`.
pub fn say_hello(message_id: impl Into<String>, room: &str, guest: &str) -> Invocation {
    Invocation::new(message_id, SAY_HELLO, json!({ "room": room, "guest": guest }))
}

/// Delays greetings until five are queued for a room or the oldest is two
/// seconds old.
pub fn registry() -> DelayedRegistry {
    DelayedRegistry::new().with(
        Greeter::NAME,
        SAY_HELLO,
        DelayedConfig::count(5)
            .with_delay(Duration::from_secs(2))
            .with_key_extractor(|message| {
                message["room"]
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| KeyExtractionError("greeting has no room".to_owned()))
            }),
    )
}

/// A bulk invoker for [`Greeter`] over `channel`.
pub fn invoker(channel: Arc<dyn DelayedChannel>) -> BulkInvoker {
    BulkInvoker::new(Arc::new(registry())).with_channel(channel)
}

/// Records greetings in their room's guestbook.
#[derive(Debug, Clone)]
pub struct Greeter {
    engine: StoreStreams,
}

impl Greeter {
    /// The handler name used in channel keys.
    pub const NAME: &'static str = "Greeter";

    /// A greeter writing through `engine`.
    pub fn new(engine: StoreStreams) -> Self {
        Self { engine }
    }

    /// Number of greetings recorded for `room`, counting snapshotted ones.
    pub async fn greetings(&self, room: &str) -> anyhow::Result<usize> {
        let stream = self
            .engine
            .get_stream::<Guestbook>(BUCKET, Id::from(room), vec![])
            .await?;
        let version = i64::from(stream.commit_version()) + 1;
        Ok(usize::try_from(version)?)
    }
}

#[async_trait]
impl MessageHandler for Greeter {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, invocation: &Invocation) -> Result<(), HandlerError> {
        let room = invocation.message["room"]
            .as_str()
            .ok_or("greeting has no room")?;
        let guest = invocation.message["guest"].as_str().unwrap_or("stranger");

        let mut stream = self
            .engine
            .get_stream::<Guestbook>(BUCKET, Id::from(room), vec![])
            .await?;
        if !stream.oobs().iter().any(|oob| oob.id == AUDIT) {
            stream.define_oob(OobDefinition::expiring(AUDIT, 30));
        }

        stream.add(json!({ "greeted": guest }), Headers::new());
        stream.add_oob(
            AUDIT,
            json!({ "message_id": invocation.message_id }),
            Headers::new(),
        );
        let greeted = usize::try_from(i64::from(stream.domain_version()) + 1)?;
        if greeted % SNAPSHOT_EVERY == 0 {
            stream.add_snapshot(json!({ "greetings": greeted }));
        }

        self.engine
            .write_stream(Uuid::new_v4(), &stream, &invocation.headers)
            .await?;
        info!(room, guest, "Greeting recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamstore::DispatchContext;
    use streamstore_memory::{
        InMemoryDelayedChannel, InMemoryEventStore, InMemoryPublisher, InMemorySnapshotStore,
    };

    fn engine() -> StoreStreams {
        StoreStreams::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemorySnapshotStore::new()),
            Arc::new(InMemoryPublisher::new()),
        )
    }

    #[tokio::test]
    async fn greetings_are_recorded_per_room_in_batches() {
        let greeter = Greeter::new(engine());
        let invoker = invoker(Arc::new(InMemoryDelayedChannel::new()));

        for n in 0..9 {
            let room = if n % 2 == 0 { "101" } else { "102" };
            let message = say_hello(format!("g{n}"), room, "ann");
            let context = DispatchContext::for_invocation(&message);
            invoker.invoke(&greeter, &message, context).await.unwrap();
        }

        // Room 101 reached five greetings, room 102 has four parked
        assert_eq!(greeter.greetings("101").await.unwrap(), 5);
        assert_eq!(greeter.greetings("102").await.unwrap(), 0);

        invoker.drain(&greeter, SAY_HELLO, Some("102")).await.unwrap();
        assert_eq!(greeter.greetings("102").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn every_tenth_greeting_snapshots() {
        let events = InMemoryEventStore::new();
        let snapshots = InMemorySnapshotStore::new();
        let greeter = Greeter::new(StoreStreams::new(
            Arc::new(events),
            Arc::new(snapshots.clone()),
            Arc::new(InMemoryPublisher::new()),
        ));

        for n in 0..11 {
            greeter
                .handle(&say_hello(format!("g{n}"), "101", "bob"))
                .await
                .unwrap();
        }

        assert_eq!(snapshots.len(), 1);
        assert_eq!(greeter.greetings("101").await.unwrap(), 11);
    }
}
