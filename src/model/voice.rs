//! Voice-state payloads shared by the dispatch stream and the REST facade.

use serde::{Deserialize, Serialize};

use super::id::{ChannelId, GuildId, UserId};

/// A user's voice connection status, as carried by `VOICE_STATE_UPDATE`
/// dispatches and `GET /guilds/{gid}/voice-states/{uid}`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VoiceState {
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// `None` when the user left voice entirely.
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    pub user_id: UserId,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// `VOICE_SERVER_UPDATE` dispatch payload.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    /// `None` while the platform is reallocating voice servers.
    #[serde(default)]
    pub endpoint: Option<String>,
}
