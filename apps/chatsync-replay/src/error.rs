use std::path::PathBuf;

use chatsync_core::{AdapterError, ConfigError};
use thiserror::Error;

/// Failures that abort a replay before or after the scripted actions run.
///
/// Errors raised by individual actions are recorded in the report instead.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("no fixture given: pass a path or set CHATSYNC_REPLAY_FIXTURE")]
    MissingFixture,
    #[error("failed to read fixture {path}: {source}")]
    ReadFixture {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse fixture {path}: {source}")]
    ParseFixture {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("adapter setup failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}
