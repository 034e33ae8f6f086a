//! Command-line and environment configuration for the replay tool.

use std::{env, path::PathBuf};

use chatsync_core::SyncConfig;
use chatsync_matrix::MatrixAdapterConfig;

use crate::error::ReplayError;

const FIXTURE_ENV: &str = "CHATSYNC_REPLAY_FIXTURE";
const HOMESERVER_ENV: &str = "CHATSYNC_MATRIX_HOMESERVER";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    pub fixture_path: PathBuf,
    pub sync: SyncConfig,
    /// Set when the environment names a homeserver; otherwise the fixture's is used.
    pub adapter: Option<MatrixAdapterConfig>,
}

impl ReplayConfig {
    pub fn from_env(mut args: impl Iterator<Item = String>) -> Result<Self, ReplayError> {
        Self::from_lookup(args.next(), |key| env::var(key).ok())
    }

    /// The positional argument takes precedence over `CHATSYNC_REPLAY_FIXTURE`.
    pub fn from_lookup<F>(arg: Option<String>, mut lookup: F) -> Result<Self, ReplayError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let fixture_path = arg
            .or_else(|| lookup(FIXTURE_ENV))
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .ok_or(ReplayError::MissingFixture)?;

        let sync = SyncConfig::from_lookup(&mut lookup)?;
        let adapter = match lookup(HOMESERVER_ENV).filter(|value| !value.trim().is_empty()) {
            Some(_) => Some(MatrixAdapterConfig::from_lookup(&mut lookup)?),
            None => None,
        };

        Ok(Self {
            fixture_path,
            sync,
            adapter,
        })
    }

    /// Adapter settings for a fixture that declares `homeserver`.
    pub fn adapter_for(&self, homeserver: &str) -> MatrixAdapterConfig {
        self.adapter
            .clone()
            .unwrap_or_else(|| MatrixAdapterConfig::new(homeserver))
    }
}
