use std::env;

use chatsync_core::ConfigError;

const DEFAULT_TIMELINE_CAP: usize = 1_200;

/// Matrix adapter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixAdapterConfig {
    /// Homeserver base URL used to resolve `mxc://` avatars.
    pub homeserver: String,
    /// Events kept per room in the adapter's in-memory timeline.
    pub timeline_cap: usize,
}

impl MatrixAdapterConfig {
    pub fn new(homeserver: impl Into<String>) -> Self {
        Self {
            homeserver: homeserver.into(),
            timeline_cap: DEFAULT_TIMELINE_CAP,
        }
    }

    /// Parse configuration from `CHATSYNC_MATRIX_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let homeserver = lookup("CHATSYNC_MATRIX_HOMESERVER")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "CHATSYNC_MATRIX_HOMESERVER",
                value: String::new(),
                reason: "homeserver URL is required".to_owned(),
            })?;
        if !(homeserver.starts_with("https://") || homeserver.starts_with("http://")) {
            return Err(ConfigError::InvalidValue {
                key: "CHATSYNC_MATRIX_HOMESERVER",
                value: homeserver,
                reason: "must be an http(s) URL".to_owned(),
            });
        }

        let timeline_cap = match lookup("CHATSYNC_MATRIX_TIMELINE_CAP")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
        {
            None => DEFAULT_TIMELINE_CAP,
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue {
                        key: "CHATSYNC_MATRIX_TIMELINE_CAP",
                        value: raw,
                        reason: "must be at least 1".to_owned(),
                    });
                }
                Ok(cap) => cap,
                Err(err) => {
                    return Err(ConfigError::InvalidValue {
                        key: "CHATSYNC_MATRIX_TIMELINE_CAP",
                        value: raw,
                        reason: err.to_string(),
                    });
                }
            },
        };

        Ok(Self {
            homeserver,
            timeline_cap,
        })
    }
}
