use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use tracing::trace;

use crate::{
    adapter::{EventSink, SubscriptionToken},
    types::LiveUpdate,
};

#[derive(Clone)]
struct Subscription {
    /// `None` subscribes to every room.
    room_id: Option<String>,
    sink: EventSink,
}

/// Fan-out registry for live update sinks, shared by adapter implementations.
///
/// Sinks are invoked outside the registry lock, in subscription order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
    next_token: u64,
    subscriptions: BTreeMap<SubscriptionToken, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink for a single room.
    pub fn subscribe_room(&self, room_id: &str, sink: EventSink) -> SubscriptionToken {
        self.insert(Some(room_id.to_owned()), sink)
    }

    /// Register a sink receiving updates for every room.
    pub fn subscribe_all(&self, sink: EventSink) -> SubscriptionToken {
        self.insert(None, sink)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let removed = self.lock().subscriptions.remove(&token).is_some();
        trace!(token = token.0, removed, "subscription dropped");
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an update to every matching sink; returns the number of sinks invoked.
    pub fn emit(&self, update: LiveUpdate) -> usize {
        let sinks: Vec<EventSink> = self
            .lock()
            .subscriptions
            .values()
            .filter(|subscription| {
                subscription
                    .room_id
                    .as_deref()
                    .is_none_or(|room_id| room_id == update.room_id())
            })
            .map(|subscription| subscription.sink.clone())
            .collect();

        for sink in &sinks {
            sink(update.clone());
        }
        sinks.len()
    }

    fn insert(&self, room_id: Option<String>, sink: EventSink) -> SubscriptionToken {
        let mut state = self.lock();
        state.next_token += 1;
        let token = SubscriptionToken(state.next_token);
        trace!(token = token.0, room_id = ?room_id, "subscription registered");
        state
            .subscriptions
            .insert(token, Subscription { room_id, sink });
        token
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
