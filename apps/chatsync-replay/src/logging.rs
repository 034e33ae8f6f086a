//! Tracing bootstrap. Logs go to stderr so stdout carries only the JSON report.

use std::{env, io};

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,chatsync_replay=info,chatsync_core=info,chatsync_matrix=info";

/// Filter variables consulted after `RUST_LOG`, most specific first.
const FILTER_VARS: [&str; 2] = ["CHATSYNC_REPLAY_LOG", "CHATSYNC_LOG"];

pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(true)
        .with_env_filter(filter_from(|key| env::var(key).ok()))
        .try_init();
}

fn filter_from<F>(lookup: F) -> EnvFilter
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(EnvFilter::DEFAULT_ENV).filter(|v| !v.trim().is_empty())
        && let Ok(filter) = EnvFilter::try_new(value)
    {
        return filter;
    }

    FILTER_VARS
        .iter()
        .filter_map(|key| lookup(key).filter(|v| !v.trim().is_empty()))
        .find_map(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}
