//! Per-room in-memory timeline backing virtual pagination.

use std::collections::{HashSet, VecDeque};

use chatsync_core::Message;

/// Bounded window of translated room messages plus the back-pagination cursor.
#[derive(Debug, Clone)]
pub struct RoomTimeline {
    messages: VecDeque<Message>,
    ids: HashSet<String>,
    back_token: Option<String>,
    primed: bool,
    max_items: usize,
}

impl RoomTimeline {
    /// Create a timeline with an item cap (`max_items >= 1`).
    pub fn new(max_items: usize) -> Self {
        Self {
            messages: VecDeque::new(),
            ids: HashSet::new(),
            back_token: None,
            primed: false,
            max_items: max_items.max(1),
        }
    }

    /// Messages in chronological order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.ids.contains(message_id)
    }

    /// Token for the next older page; `None` before the first load and at the start of the room.
    pub fn back_token(&self) -> Option<&str> {
        self.back_token.as_deref()
    }

    /// Whether an initial page has been loaded.
    pub fn is_primed(&self) -> bool {
        self.primed
    }

    /// Replace the window with the most recent page (oldest first).
    pub fn reset(&mut self, page: Vec<Message>, back_token: Option<String>) {
        self.messages.clear();
        self.ids.clear();
        for message in page {
            if self.ids.insert(message.id.clone()) {
                self.messages.push_back(message);
            }
        }
        self.back_token = back_token;
        self.primed = true;
        while self.messages.len() > self.max_items {
            self.pop_front();
        }
    }

    /// Append a live message, evicting the oldest past the cap. Returns `false` for duplicates.
    pub fn push_live(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        self.messages.push_back(message);
        if self.messages.len() > self.max_items {
            self.pop_front();
        }
        true
    }

    /// Prepend an older page (oldest first), evicting the newest past the cap.
    ///
    /// Returns the messages that were not already held.
    pub fn prepend_page(&mut self, older: Vec<Message>, back_token: Option<String>) -> Vec<Message> {
        let fresh: Vec<Message> = older
            .into_iter()
            .filter(|message| !self.ids.contains(&message.id))
            .collect();
        for message in fresh.iter().rev() {
            self.ids.insert(message.id.clone());
            self.messages.push_front(message.clone());
        }
        while self.messages.len() > self.max_items {
            if let Some(evicted) = self.messages.pop_back() {
                self.ids.remove(&evicted.id);
            }
        }
        self.back_token = back_token;
        self.primed = true;
        fresh
    }

    fn pop_front(&mut self) {
        if let Some(evicted) = self.messages.pop_front() {
            self.ids.remove(&evicted.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chatsync_core::MessageStatus;

    use super::*;

    fn msg(id: &str) -> Message {
        Message::text(id, "@bob:example.org", id, MessageStatus::Sent, 1)
    }

    fn ids(timeline: &RoomTimeline) -> Vec<String> {
        timeline.messages().into_iter().map(|message| message.id).collect()
    }

    #[test]
    fn live_append_trims_oldest() {
        let mut timeline = RoomTimeline::new(3);
        timeline.reset(vec![msg("$1"), msg("$2"), msg("$3")], Some("t0".into()));

        assert!(timeline.push_live(msg("$4")));
        assert!(!timeline.push_live(msg("$4")));

        assert_eq!(ids(&timeline), ["$2", "$3", "$4"]);
        assert!(!timeline.contains("$1"));
        assert_eq!(timeline.back_token(), Some("t0"));
    }

    #[test]
    fn prepend_skips_known_and_trims_newest() {
        let mut timeline = RoomTimeline::new(4);
        timeline.reset(vec![msg("$3"), msg("$4")], Some("t3".into()));

        let fresh = timeline.prepend_page(vec![msg("$1"), msg("$2"), msg("$3")], None);

        assert_eq!(
            fresh.into_iter().map(|message| message.id).collect::<Vec<_>>(),
            ["$1", "$2"]
        );
        assert_eq!(ids(&timeline), ["$1", "$2", "$3", "$4"]);
        assert_eq!(timeline.back_token(), None);

        timeline.prepend_page(vec![msg("$0")], None);
        assert_eq!(ids(&timeline), ["$0", "$1", "$2", "$3"]);
    }

    #[test]
    fn starts_unprimed() {
        let timeline = RoomTimeline::new(10);
        assert!(!timeline.is_primed());
        assert!(timeline.is_empty());
        assert_eq!(timeline.back_token(), None);
    }
}
