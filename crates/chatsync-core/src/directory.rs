use async_trait::async_trait;

use crate::{error::AdapterError, types::PublicChannel};

/// Structural catalog of public channels, independent of live membership.
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn public_channels(&self) -> Result<Vec<PublicChannel>, AdapterError>;
}

/// Fixed channel catalog, typically loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticChannelDirectory {
    channels: Vec<PublicChannel>,
}

impl StaticChannelDirectory {
    pub fn new(channels: Vec<PublicChannel>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl ChannelDirectory for StaticChannelDirectory {
    async fn public_channels(&self) -> Result<Vec<PublicChannel>, AdapterError> {
        Ok(self.channels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_directory_returns_its_catalog() {
        let directory = StaticChannelDirectory::new(vec![PublicChannel {
            id: "general".into(),
            matrix_room_id: "!general:example.org".into(),
            name: "General".into(),
            topic: None,
        }]);

        let channels = directory
            .public_channels()
            .await
            .expect("static catalog never fails");
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].matrix_room_id, "!general:example.org");
    }
}
