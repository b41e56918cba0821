//! Chat platform actions used by the bot
//!
//! Rooms and the message filter only talk to Discord through `Platform`,
//! so they can run against a recording fake in tests.

use async_trait::async_trait;
use serenity::all::{ChannelId, CreateMessage, Http, MessageId, UserId};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Discord API error: {0}")]
    Serenity(#[from] serenity::Error),
    #[error("Not connected to Discord yet")]
    NotConnected,
}

#[async_trait]
pub trait Platform: Send + Sync {
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError>;

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError>;

    async fn send_message(&self, channel_id: ChannelId, content: &str)
        -> Result<(), PlatformError>;

    async fn direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError>;
}

/// `Platform` backed by the Discord REST API
///
/// Shares the client's `Http`, handed over with `connect` once the client is built.
#[derive(Default)]
pub struct DiscordPlatform {
    http: OnceLock<Arc<Http>>,
}

impl DiscordPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the client's HTTP handle; later calls are ignored
    pub fn connect(&self, http: Arc<Http>) {
        let _ = self.http.set(http);
    }

    fn http(&self) -> Result<&Arc<Http>, PlatformError> {
        self.http.get().ok_or(PlatformError::NotConnected)
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), PlatformError> {
        channel_id.delete(self.http()?).await?;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), PlatformError> {
        channel_id.delete_message(self.http()?, message_id).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<(), PlatformError> {
        channel_id
            .send_message(self.http()?, CreateMessage::new().content(content))
            .await?;
        Ok(())
    }

    async fn direct_message(&self, user_id: UserId, content: &str) -> Result<(), PlatformError> {
        user_id
            .direct_message(self.http()?, CreateMessage::new().content(content))
            .await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconnected_platform_refuses_calls() {
        let platform = DiscordPlatform::new();

        assert!(matches!(
            platform.delete_channel(ChannelId::new(1)).await,
            Err(PlatformError::NotConnected)
        ));
        assert!(matches!(
            platform.direct_message(UserId::new(2), "hi").await,
            Err(PlatformError::NotConnected)
        ));
    }
}
