use serde::Serialize;

use crate::marker::{Decision, SuggestionId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReviewEvent {
    DecisionChanged {
        suggestion_id: SuggestionId,
        previous: Decision,
        decision: Decision,
        reasons: Vec<String>,
    },
    /// A phrase still had descriptors after the whole document was walked.
    MatchesExhausted {
        phrase: String,
        occurrences_seen: usize,
        missing_occurrences: Vec<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(usize);

type Handler = Box<dyn FnMut(&ReviewEvent)>;

/// Synchronous publish/subscribe for review events. Handlers run in
/// subscription order on the publishing call.
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<(SubscriptionId, Handler)>,
    next_id: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&ReviewEvent) + 'static,
    {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns false when the subscription was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(candidate, _)| *candidate != id);
        self.handlers.len() != before
    }

    pub fn publish(&mut self, event: &ReviewEvent) {
        for (_, handler) in &mut self.handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}
