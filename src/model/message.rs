//! Message and user objects, reduced to the fields the engine consumes.

use serde::{Deserialize, Serialize};

use super::id::{ChannelId, GuildId, MessageId, UserId};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub username: Option<String>,
}

/// Subset of a `MESSAGE_CREATE` payload.
#[derive(Clone, Debug, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub author: User,
    #[serde(default)]
    pub content: String,
}

/// Body of `POST /channels/{channel_id}/messages`.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CreateMessage {
    pub content: String,
    pub tts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl CreateMessage {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}
