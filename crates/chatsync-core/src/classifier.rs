//! Live-event filtering ahead of the conversation store.

use tracing::{debug, trace};

use crate::{
    config::SyncConfig,
    recency::RecentIds,
    types::{EventOrigin, IncomingEvent, Message, MessageStatus, is_temporary_id},
};

/// Which delivery path is asking for a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMode {
    /// Store append path for a room being viewed; the age grace window does not apply.
    Room,
    /// Notification path; events older than the grace window relative to `now_ms` are stale.
    Notification { now_ms: u64 },
}

/// Why an event was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Arrived as part of a backward-pagination batch.
    PaginationEcho,
    /// Our own local echo that the orchestrator already shows optimistically.
    LocalEcho,
    /// Redelivery of an event delivered recently.
    Duplicate,
    /// Older than the notification grace window.
    Stale,
    /// No identity or no displayable payload.
    Unclassifiable,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Deliver(Message),
    Ignore(IgnoreReason),
}

impl Classification {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Deliver(_))
    }
}

/// Ordered rule set deciding whether an incoming event updates visible state.
///
/// Rules, first match wins: pagination echo, own local echo, recent duplicate,
/// stale (notification mode only), then delivery. Never fails.
#[derive(Debug, Clone)]
pub struct EventClassifier {
    delivered: RecentIds,
    stale_grace_ms: u64,
}

impl EventClassifier {
    pub fn new(dedup_capacity: usize, stale_grace_ms: u64) -> Self {
        Self {
            delivered: RecentIds::new(dedup_capacity),
            stale_grace_ms,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.dedup_capacity, config.stale_grace_ms)
    }

    pub fn classify(&mut self, event: IncomingEvent, mode: ClassifyMode) -> Classification {
        if event.origin == EventOrigin::Pagination {
            return self.ignore(&event, IgnoreReason::PaginationEcho);
        }

        if is_local_echo(&event) {
            return self.ignore(&event, IgnoreReason::LocalEcho);
        }

        let Some(event_id) = event
            .event_id
            .clone()
            .or_else(|| event.message.as_ref().map(|message| message.id.clone()))
        else {
            debug!(room_id = %event.room_id, "event without identity ignored");
            return Classification::Ignore(IgnoreReason::Unclassifiable);
        };

        if self.delivered.contains(&event_id) {
            return self.ignore(&event, IgnoreReason::Duplicate);
        }

        if let ClassifyMode::Notification { now_ms } = mode {
            let age_ms = now_ms.saturating_sub(event.timestamp_ms);
            if age_ms > self.stale_grace_ms {
                trace!(room_id = %event.room_id, event_id = %event_id, age_ms, "stale event ignored");
                return Classification::Ignore(IgnoreReason::Stale);
            }
        }

        let Some(mut message) = event.message else {
            debug!(
                room_id = %event.room_id,
                event_id = %event_id,
                "event has no displayable payload"
            );
            return Classification::Ignore(IgnoreReason::Unclassifiable);
        };

        message.id = event_id.clone();
        self.delivered.insert(event_id);
        Classification::Deliver(message)
    }

    fn ignore(&self, event: &IncomingEvent, reason: IgnoreReason) -> Classification {
        trace!(
            room_id = %event.room_id,
            event_id = ?event.event_id,
            reason = ?reason,
            "event ignored"
        );
        Classification::Ignore(reason)
    }
}

fn is_local_echo(event: &IncomingEvent) -> bool {
    if matches!(
        event.local_status,
        Some(MessageStatus::Sending | MessageStatus::Failed)
    ) {
        return true;
    }
    if event.event_id.as_deref().is_some_and(is_temporary_id) {
        return true;
    }
    event
        .message
        .as_ref()
        .is_some_and(|message| message.status == MessageStatus::Sending || message.is_temporary())
}
