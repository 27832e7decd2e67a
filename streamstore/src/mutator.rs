//! Outgoing event mutators.
//!
//! Mutators are pure transforms over an event's payload and headers, applied
//! to every uncommitted event in registration order before it is written.

use crate::event::Headers;
use std::fmt;
use std::sync::Arc;

/// An event payload and its headers as seen by mutators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutating {
    /// The event body.
    pub payload: serde_json::Value,
    /// The event headers.
    pub headers: Headers,
}

/// Transforms outgoing events.
pub trait EventMutator: Send + Sync {
    /// A name for diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns the (possibly different) event to write.
    fn mutate_outgoing(&self, mutating: Mutating) -> Mutating;
}

impl<F> EventMutator for F
where
    F: Fn(Mutating) -> Mutating + Send + Sync,
{
    fn mutate_outgoing(&self, mutating: Mutating) -> Mutating {
        self(mutating)
    }
}

/// An ordered list of mutators composed in registration order.
#[derive(Clone, Default)]
pub struct MutatorPipeline {
    mutators: Vec<Arc<dyn EventMutator>>,
}

impl MutatorPipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a mutator; it runs after every mutator registered before it.
    #[must_use]
    pub fn with(mut self, mutator: impl EventMutator + 'static) -> Self {
        self.mutators.push(Arc::new(mutator));
        self
    }

    /// Returns whether no mutators are registered.
    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }

    /// Number of registered mutators.
    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    /// Runs every mutator over `mutating`.
    pub fn apply(&self, mutating: Mutating) -> Mutating {
        self.mutators.iter().fold(mutating, |current, mutator| {
            tracing::trace!(mutator = mutator.name(), "Mutating outgoing event");
            mutator.mutate_outgoing(current)
        })
    }
}

impl fmt::Debug for MutatorPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.mutators.iter().map(|mutator| mutator.name()))
            .finish()
    }
}
