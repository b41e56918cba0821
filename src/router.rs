//! Event routing
//!
//! Platform-neutral entry points for gateway events. `bot::Handler` converts
//! serenity events into these shapes and forwards them here.

use crate::config::{Config, Extension};
use crate::database::{DatabaseError, TableStore};
use crate::filter;
use crate::guild::GuildRegistrar;
use crate::platform::Platform;
use crate::room::{RoomManager, Transition, VoicePresenceChange};
use serenity::all::{ChannelId, GuildId, MessageId, UserId};
use std::sync::Arc;

/// A message as seen by the router
#[derive(Debug, Clone)]
pub struct MessageReceived {
    pub author_id: UserId,
    pub author_is_bot: bool,
    /// `None` for direct messages
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub content: String,
}

/// What the router did with a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Bot authors and direct messages
    Ignored,
    /// Removed for containing this banned word
    Filtered(String),
    /// Starts with the guild's prefix; handed on to command processing
    Command { prefix: String, body: String },
    Passed,
}

pub struct EventRouter {
    registrar: GuildRegistrar,
    platform: Arc<dyn Platform>,
    rooms: Option<RoomManager>,
    filter_enabled: bool,
}

impl EventRouter {
    pub fn new(
        registrar: GuildRegistrar,
        platform: Arc<dyn Platform>,
        rooms: Option<RoomManager>,
        filter_enabled: bool,
    ) -> Self {
        Self {
            registrar,
            platform,
            rooms,
            filter_enabled,
        }
    }

    /// Build a router with the extensions enabled in `config`
    pub fn from_config(config: &Config, store: Arc<TableStore>, platform: Arc<dyn Platform>) -> Self {
        let registrar = GuildRegistrar::new(store, config.default_prefix.clone());
        let rooms = config
            .is_enabled(Extension::Rooms)
            .then(|| RoomManager::new(platform.clone(), config.room_deletion_timeout));

        Self::new(
            registrar,
            platform,
            rooms,
            config.is_enabled(Extension::Filter),
        )
    }

    pub async fn on_message(&self, message: &MessageReceived) -> Result<Routed, DatabaseError> {
        if message.author_is_bot {
            return Ok(Routed::Ignored);
        }
        let Some(guild_id) = message.guild_id else {
            return Ok(Routed::Ignored);
        };

        self.registrar.ensure(guild_id).await?;

        if self.filter_enabled {
            let banned_words = self.registrar.banned_words(guild_id).await?;
            if let Some(word) = filter::find_banned_word(&message.content, &banned_words) {
                filter::enforce(self.platform.as_ref(), message, word).await;
                return Ok(Routed::Filtered(word.to_string()));
            }
        }

        let prefix = self.registrar.prefix(guild_id).await?;
        match message.content.strip_prefix(prefix.as_str()) {
            Some(body) if !body.trim().is_empty() => Ok(Routed::Command {
                body: body.trim_start().to_string(),
                prefix,
            }),
            _ => Ok(Routed::Passed),
        }
    }

    /// Forward a voice-presence change to the room manager, if rooms are enabled
    pub fn on_voice_state(&self, change: VoicePresenceChange) -> Option<Transition> {
        self.rooms.as_ref()?.handle(change)
    }

    pub fn on_channel_delete(&self, channel_id: ChannelId) -> bool {
        self.rooms
            .as_ref()
            .is_some_and(|rooms| rooms.forget(channel_id))
    }

    pub fn rooms(&self) -> Option<&RoomManager> {
        self.rooms.as_ref()
    }
}
