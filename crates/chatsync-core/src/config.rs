//! Environment-backed tuning for the synchronization core.

use std::env;

use thiserror::Error;

const DEFAULT_INITIAL_PAGE_SIZE: u16 = 30;
const DEFAULT_PAGE_SIZE: u16 = 30;
const DEFAULT_PAGINATION_TARGET: usize = 20;
const DEFAULT_PAGINATION_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_PAGINATION_LIMIT_CAP: u16 = 100;
const DEFAULT_MAX_MESSAGES_PER_ROOM: usize = 200;
const DEFAULT_DEDUP_CAPACITY: usize = 1_000;
const DEFAULT_STALE_GRACE_MS: u64 = 120_000;

/// Runtime tuning used by the store, classifier, pagination engine and orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages requested when a room is first loaded.
    pub initial_page_size: u16,
    /// Requested size of each backward-history page.
    pub page_size: u16,
    /// Messages one "load more" tries to accumulate.
    pub pagination_target: usize,
    /// Network pages one "load more" may request before giving up.
    pub pagination_max_attempts: u32,
    /// Hard cap the backend applies to history pages.
    pub pagination_limit_cap: u16,
    /// Per-room retention cap applied when prepending history.
    pub max_messages_per_room: usize,
    /// Capacity of the delivered-event recency cache.
    pub dedup_capacity: usize,
    /// Events older than this are not treated as new for notifications.
    pub stale_grace_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_page_size: DEFAULT_INITIAL_PAGE_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            pagination_target: DEFAULT_PAGINATION_TARGET,
            pagination_max_attempts: DEFAULT_PAGINATION_MAX_ATTEMPTS,
            pagination_limit_cap: DEFAULT_PAGINATION_LIMIT_CAP,
            max_messages_per_room: DEFAULT_MAX_MESSAGES_PER_ROOM,
            dedup_capacity: DEFAULT_DEDUP_CAPACITY,
            stale_grace_ms: DEFAULT_STALE_GRACE_MS,
        }
    }
}

impl SyncConfig {
    /// Parse configuration from `CHATSYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let config = Self {
            initial_page_size: parse_or(
                "CHATSYNC_INITIAL_PAGE_SIZE",
                DEFAULT_INITIAL_PAGE_SIZE,
                &mut lookup,
            )?,
            page_size: parse_or("CHATSYNC_PAGE_SIZE", DEFAULT_PAGE_SIZE, &mut lookup)?,
            pagination_target: parse_or(
                "CHATSYNC_PAGINATION_TARGET",
                DEFAULT_PAGINATION_TARGET,
                &mut lookup,
            )?,
            pagination_max_attempts: parse_or(
                "CHATSYNC_PAGINATION_MAX_ATTEMPTS",
                DEFAULT_PAGINATION_MAX_ATTEMPTS,
                &mut lookup,
            )?,
            pagination_limit_cap: parse_or(
                "CHATSYNC_PAGINATION_LIMIT_CAP",
                DEFAULT_PAGINATION_LIMIT_CAP,
                &mut lookup,
            )?,
            max_messages_per_room: parse_or(
                "CHATSYNC_MAX_MESSAGES_PER_ROOM",
                DEFAULT_MAX_MESSAGES_PER_ROOM,
                &mut lookup,
            )?,
            dedup_capacity: parse_or(
                "CHATSYNC_DEDUP_CAPACITY",
                DEFAULT_DEDUP_CAPACITY,
                &mut lookup,
            )?,
            stale_grace_ms: parse_or(
                "CHATSYNC_STALE_GRACE_MS",
                DEFAULT_STALE_GRACE_MS,
                &mut lookup,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Page size actually requested, clamped to `1..=100` and the server cap.
    pub fn effective_page_size(&self) -> u16 {
        bounded_page_limit(self.page_size, self.pagination_limit_cap)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, bool); 7] = [
            ("CHATSYNC_INITIAL_PAGE_SIZE", self.initial_page_size == 0),
            ("CHATSYNC_PAGE_SIZE", self.page_size == 0),
            ("CHATSYNC_PAGINATION_TARGET", self.pagination_target == 0),
            (
                "CHATSYNC_PAGINATION_MAX_ATTEMPTS",
                self.pagination_max_attempts == 0,
            ),
            ("CHATSYNC_PAGINATION_LIMIT_CAP", self.pagination_limit_cap == 0),
            (
                "CHATSYNC_MAX_MESSAGES_PER_ROOM",
                self.max_messages_per_room == 0,
            ),
            ("CHATSYNC_DEDUP_CAPACITY", self.dedup_capacity == 0),
        ];

        for (key, is_zero) in checks {
            if is_zero {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Clamp a requested page limit against safety and server caps.
///
/// The result is always in `1..=100`.
pub fn bounded_page_limit(requested: u16, server_cap: u16) -> u16 {
    let safe_requested = requested.max(1);
    let safe_cap = server_cap.max(1);
    safe_requested.min(safe_cap).min(100)
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed or is out of range.
    #[error("invalid {key}='{value}': {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn parse_or<T, F>(key: &'static str, default: T, lookup: &mut F) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: FnMut(&str) -> Option<String>,
{
    let Some(raw) = lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
    else {
        return Ok(default);
    };

    raw.parse::<T>().map_err(|err| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: err.to_string(),
    })
}
