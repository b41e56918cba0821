//! Discord event handler and client setup

use crate::config::Config;
use crate::database::TableStore;
use crate::platform::{DiscordPlatform, Platform};
use crate::room::{Transition, VoicePresenceChange};
use crate::router::{EventRouter, MessageReceived, Routed};
use serenity::all::{
    Client, Context, EventHandler, GatewayIntents, GuildChannel, Message, Ready, VoiceState,
};
use serenity::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Main event handler for the bot
pub struct Handler {
    pub router: Arc<EventRouter>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("Logged in as {} ({} guilds)", ready.user.name, ready.guilds.len());
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let message = MessageReceived {
            author_id: msg.author.id,
            author_is_bot: msg.author.bot,
            guild_id: msg.guild_id,
            channel_id: msg.channel_id,
            message_id: msg.id,
            content: msg.content,
        };

        match self.router.on_message(&message).await {
            Ok(Routed::Command { prefix, body }) => {
                debug!("Command {:?} (prefix {:?}) from {}", body, prefix, message.author_id);
            }
            Ok(_) => {}
            Err(e) => error!("Failed to handle message {}: {}", message.message_id, e),
        }
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let member_is_bot = new
            .member
            .as_ref()
            .map(|member| member.user.bot)
            .or_else(|| ctx.cache.user(new.user_id).map(|user| user.bot))
            .unwrap_or(false);

        let change = VoicePresenceChange {
            member: new.user_id,
            member_is_bot,
            previous: old.and_then(|state| state.channel_id),
            next: new.channel_id,
        };

        let Some(transition) = self.router.on_voice_state(change) else {
            return;
        };
        let Some(rooms) = self.router.rooms() else {
            return;
        };

        let channel = match transition {
            Transition::Join(channel) | Transition::Leave(channel) => channel,
            Transition::Move { to, .. } => to,
        };
        match rooms.room(channel) {
            Some(room) => debug!(
                "{:?} by {}: room {} by {} is {:?} with {} members ({} rooms tracked)",
                transition,
                new.user_id,
                room.id,
                room.author,
                room.state,
                room.members.len(),
                rooms.len()
            ),
            None => debug!("{:?} by {} ({} rooms tracked)", transition, new.user_id, rooms.len()),
        }
    }

    async fn channel_delete(
        &self,
        _ctx: Context,
        channel: GuildChannel,
        _messages: Option<Vec<Message>>,
    ) {
        if self.router.on_channel_delete(channel.id) {
            debug!("Tracked room {} was deleted externally", channel.id);
        }
    }
}

/// Create and run the Discord bot
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let store = Arc::new(TableStore::from_config(&config));

    let discord = Arc::new(DiscordPlatform::new());
    let platform: Arc<dyn Platform> = discord.clone();

    for extension in &config.extensions {
        info!("Extension enabled: {}", extension.as_str());
    }

    let router = Arc::new(EventRouter::from_config(&config, store.clone(), platform));
    let handler = Handler {
        router: router.clone(),
    };

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.token, intents)
        .event_handler(handler)
        .await?;

    // Platform calls share the client's rate limiter
    discord.connect(client.http.clone());

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    // Start the client
    info!("Starting bot...");
    client.start_autosharded().await?;

    if let Some(rooms) = router.rooms().filter(|rooms| !rooms.is_empty()) {
        info!("{} rooms still tracked at shutdown", rooms.len());
    }

    store.flush_loaded().await?;
    info!("Bot stopped");

    Ok(())
}
