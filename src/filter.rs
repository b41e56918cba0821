//! Banned-word message filter

use crate::platform::Platform;
use crate::router::MessageReceived;
use tracing::{info, warn};

pub const CHANNEL_NOTICE: &str = "🚫  Message deleted for banned words. 🚫";
pub const AUTHOR_NOTICE: &str = "🚫  Such language is not permitted. 🚫";

/// First banned word contained in `content`, ignoring case
pub fn find_banned_word<'a>(content: &str, banned_words: &'a [String]) -> Option<&'a str> {
    let content = content.to_lowercase();

    banned_words
        .iter()
        .map(String::as_str)
        .filter(|word| !word.is_empty())
        .find(|word| content.contains(&word.to_lowercase()))
}

/// Delete the message and tell the channel and the author why
///
/// Every step is attempted even if an earlier one fails.
pub async fn enforce(platform: &dyn Platform, message: &MessageReceived, word: &str) {
    info!(
        "Removing message {} from {} for banned word {:?}",
        message.message_id, message.author_id, word
    );

    if let Err(e) = platform
        .delete_message(message.channel_id, message.message_id)
        .await
    {
        warn!("Failed to delete message {}: {}", message.message_id, e);
    }

    if let Err(e) = platform.send_message(message.channel_id, CHANNEL_NOTICE).await {
        warn!("Failed to post notice in {}: {}", message.channel_id, e);
    }

    let direct = format!("{}\n{}", AUTHOR_NOTICE, message.content);
    if let Err(e) = platform.direct_message(message.author_id, &direct).await {
        warn!("Failed to notify {}: {}", message.author_id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::testing::{Action, FakePlatform};
    use serenity::all::{ChannelId, GuildId, MessageId, UserId};

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_find_banned_word() {
        let banned = words(&["heck", "", "Darn"]);

        assert_eq!(find_banned_word("What the HECK", &banned), Some("heck"));
        assert_eq!(find_banned_word("darned thing", &banned), Some("Darn"));
        assert_eq!(find_banned_word("all good here", &banned), None);
        assert_eq!(find_banned_word("anything", &[]), None);
    }

    #[tokio::test]
    async fn test_enforce_survives_platform_failures() {
        let platform = FakePlatform::failing();
        let message = MessageReceived {
            author_id: UserId::new(7),
            author_is_bot: false,
            guild_id: Some(GuildId::new(1)),
            channel_id: ChannelId::new(2),
            message_id: MessageId::new(3),
            content: "heck".to_string(),
        };

        enforce(&platform, &message, "heck").await;

        assert_eq!(
            platform.actions(),
            vec![
                Action::DeleteMessage(ChannelId::new(2), MessageId::new(3)),
                Action::Send(ChannelId::new(2), CHANNEL_NOTICE.to_string()),
                Action::Direct(UserId::new(7), format!("{}\nheck", AUTHOR_NOTICE)),
            ]
        );
    }
}
