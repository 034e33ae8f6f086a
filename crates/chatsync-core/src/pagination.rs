//! Backward-history pagination: in-memory first, then bounded network fetches.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{
    adapter::ChatAdapter,
    config::SyncConfig,
    error::AdapterError,
    types::Message,
};

/// Where a page of older messages came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSource {
    /// Served from the adapter's in-memory timeline without network traffic.
    Memory,
    Network,
}

/// Result of one "load older" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// Older messages, oldest first, without duplicates.
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub source: PageSource,
    /// Network pages requested.
    pub attempts: u32,
    /// Set when a network page failed; `messages` holds what was gathered before it.
    pub failure: Option<AdapterError>,
}

impl PageOutcome {
    fn memory(messages: Vec<Message>) -> Self {
        Self {
            messages,
            has_more: true,
            source: PageSource::Memory,
            attempts: 0,
            failure: None,
        }
    }

    /// Nothing was fetched and the failure is all there is to report.
    pub fn is_total_failure(&self) -> bool {
        self.failure.is_some() && self.messages.is_empty()
    }
}

/// Slice of `memory` immediately older than `oldest_displayed_id`.
///
/// Returns `None` when the ID is not in memory or nothing older is held.
pub fn virtual_page(memory: &[Message], oldest_displayed_id: &str, batch_size: usize) -> Option<Vec<Message>> {
    let index = memory
        .iter()
        .position(|message| message.id == oldest_displayed_id)?;
    if index == 0 || batch_size == 0 {
        return None;
    }
    let start = index.saturating_sub(batch_size);
    Some(memory[start..index].to_vec())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationEngine {
    page_size: u16,
    max_attempts: u32,
}

impl PaginationEngine {
    pub fn new(page_size: u16, max_attempts: u32) -> Self {
        Self {
            page_size: page_size.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.effective_page_size(), config.pagination_max_attempts)
    }

    /// Older messages before `oldest_displayed_id`, trying adapter memory before the network.
    ///
    /// With `network_allowed == false` only memory is consulted.
    pub async fn load_more<A>(
        &self,
        adapter: &A,
        room_id: &str,
        oldest_displayed_id: Option<&str>,
        target_count: usize,
        network_allowed: bool,
    ) -> PageOutcome
    where
        A: ChatAdapter + ?Sized,
    {
        if let Some(oldest) = oldest_displayed_id {
            let memory = adapter.timeline_snapshot(room_id);
            if let Some(batch) = virtual_page(&memory, oldest, target_count) {
                debug!(
                    room_id = %room_id,
                    count = batch.len(),
                    "older messages served from memory"
                );
                return PageOutcome::memory(batch);
            }
        }

        if !network_allowed {
            return PageOutcome {
                messages: Vec::new(),
                has_more: false,
                source: PageSource::Memory,
                attempts: 0,
                failure: None,
            };
        }

        self.load_older(adapter, room_id, oldest_displayed_id, target_count, self.max_attempts)
            .await
    }

    /// Fetch network pages until `target_count` messages, exhausted history, or `max_attempts`.
    ///
    /// A failing page ends the loop; whatever was gathered is returned with `has_more = false`.
    pub async fn load_older<A>(
        &self,
        adapter: &A,
        room_id: &str,
        oldest_id: Option<&str>,
        target_count: usize,
        max_attempts: u32,
    ) -> PageOutcome
    where
        A: ChatAdapter + ?Sized,
    {
        let mut collected: Vec<Message> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut cursor = oldest_id.map(ToOwned::to_owned);
        let mut has_more = true;
        let mut attempts = 0;

        while collected.len() < target_count && has_more && attempts < max_attempts {
            attempts += 1;
            let page = match adapter
                .load_history(room_id, cursor.as_deref(), self.page_size)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    warn!(
                        room_id = %room_id,
                        attempt = attempts,
                        total = collected.len(),
                        error = %err,
                        "history page failed"
                    );
                    return PageOutcome {
                        messages: collected,
                        has_more: false,
                        source: PageSource::Network,
                        attempts,
                        failure: Some(err),
                    };
                }
            };

            let mut fresh: Vec<Message> = page
                .messages
                .into_iter()
                .filter(|message| seen.insert(message.id.clone()))
                .collect();
            let fetched = fresh.len();
            if let Some(oldest) = fresh.first() {
                cursor = Some(oldest.id.clone());
            }
            fresh.append(&mut collected);
            collected = fresh;
            has_more = page.has_more;

            debug!(
                room_id = %room_id,
                attempt = attempts,
                fetched,
                total = collected.len(),
                has_more,
                "history page fetched"
            );
        }

        if has_more && collected.len() < target_count {
            debug!(
                room_id = %room_id,
                attempts,
                total = collected.len(),
                "pagination attempt limit reached"
            );
        }

        PageOutcome {
            messages: collected,
            has_more,
            source: PageSource::Network,
            attempts,
            failure: None,
        }
    }
}

impl Default for PaginationEngine {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
