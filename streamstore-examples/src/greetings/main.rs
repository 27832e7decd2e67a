//! Delayed greetings example
//!
//! Sends greetings for two rooms through a bulk invoker. Greetings are
//! handled five at a time per room; the stragglers are drained at the end.

use std::sync::Arc;

use anyhow::Result;
use streamstore::{DispatchContext, StoreConfig, StoreStreams};
use streamstore_examples::greetings::{invoker, say_hello, Greeter, SAY_HELLO};
use streamstore_memory::{
    InMemoryDelayedChannel, InMemoryEventStore, InMemoryPublisher, InMemorySnapshotStore,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const GUESTS: [&str; 6] = ["alice", "bob", "carol", "dave", "erin", "frank"];

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting delayed greetings example");

    let events = InMemoryEventStore::new();
    let engine = StoreStreams::new(
        Arc::new(events.clone()),
        Arc::new(InMemorySnapshotStore::new()),
        Arc::new(InMemoryPublisher::new()),
    )
    .with_config(StoreConfig::default());
    let _sweeper = engine.spawn_oob_sweeper();

    let greeter = Greeter::new(engine);
    let channel = InMemoryDelayedChannel::new();
    let invoker = invoker(Arc::new(channel.clone()));

    for (n, guest) in GUESTS.iter().cycle().take(14).enumerate() {
        let room = if n % 3 == 0 { "penthouse" } else { "lobby" };
        let message = say_hello(format!("hello-{n}"), room, guest);
        let context = DispatchContext::for_invocation(&message);
        let context = invoker.invoke(&greeter, &message, context).await?;
        if context.bulk_invoked() {
            info!(room, "Batch handled");
        }
    }

    info!(parked = channel.total(), "Draining the remaining greetings");
    for room in ["lobby", "penthouse"] {
        invoker.drain(&greeter, SAY_HELLO, Some(room)).await?;
        info!(room, greetings = greeter.greetings(room).await?, "Guestbook");
    }

    let metrics = invoker.metrics();
    info!(
        bulk_invokes = metrics.bulk_invokes.get(),
        delayed = metrics.delayed_messages.get(),
        streams = events.stream_names().len(),
        "Done"
    );
    Ok(())
}
