use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use streamstore::errors::EventStoreResult;
use streamstore::store::MessagePublisher;
use streamstore::{FullEvent, Headers};

/// One call to [`MessagePublisher::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    /// Where the events were sent.
    pub destination: String,
    /// The events sent.
    pub events: Vec<FullEvent>,
    /// The commit headers.
    pub headers: Headers,
}

/// Message publisher that records what it is asked to publish.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<RwLock<Vec<Published>>>,
}

impl InMemoryPublisher {
    /// Creates a publisher with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<Published> {
        self.published.read().clone()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(
        &self,
        destination: &str,
        events: &[FullEvent],
        commit_headers: &Headers,
    ) -> EventStoreResult<()> {
        self.published.write().push(Published {
            destination: destination.to_owned(),
            events: events.to_vec(),
            headers: commit_headers.clone(),
        });
        Ok(())
    }
}
