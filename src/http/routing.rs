//! Route construction for the REST facade.

use std::fmt;

use crate::model::id::{ApplicationId, ChannelId, GuildId, InteractionId, UserId};

/// A path under the API base URL.
///
/// Only the handful of routes the engine drives; the facade makes no attempt
/// at covering the platform's REST surface.
#[derive(Clone, Debug)]
pub enum Route<'a> {
    /// `GET /guilds/{guild_id}/voice-states/{user_id}`
    GuildVoiceState { guild_id: GuildId, user_id: UserId },
    /// `GET /guilds/{guild_id}/voice-states/@me`
    GuildVoiceStateMe { guild_id: GuildId },
    /// `POST /interactions/{interaction_id}/{token}/callback`
    InteractionCallback {
        interaction_id: InteractionId,
        token: &'a str,
        with_response: bool,
    },
    /// `POST /channels/{channel_id}/messages`
    ChannelMessages { channel_id: ChannelId },
    /// `DELETE /webhooks/{application_id}/{token}/messages/@original`
    WebhookOriginalMessage {
        application_id: ApplicationId,
        token: &'a str,
    },
}

impl fmt::Display for Route<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::GuildVoiceState { guild_id, user_id } => {
                write!(f, "/guilds/{guild_id}/voice-states/{user_id}")
            },
            Route::GuildVoiceStateMe { guild_id } => {
                write!(f, "/guilds/{guild_id}/voice-states/@me")
            },
            Route::InteractionCallback {
                interaction_id,
                token,
                with_response,
            } => {
                write!(f, "/interactions/{interaction_id}/{token}/callback")?;
                if *with_response {
                    f.write_str("?with_response=true")?;
                }
                Ok(())
            },
            Route::ChannelMessages { channel_id } => {
                write!(f, "/channels/{channel_id}/messages")
            },
            Route::WebhookOriginalMessage {
                application_id,
                token,
            } => {
                write!(f, "/webhooks/{application_id}/{token}/messages/@original")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_render_expected_paths() {
        let callback = Route::InteractionCallback {
            interaction_id: InteractionId(9001),
            token: "tok",
            with_response: true,
        };

        assert_eq!(callback.to_string(), "/interactions/9001/tok/callback?with_response=true");
        assert_eq!(
            Route::GuildVoiceState {
                guild_id: GuildId(7),
                user_id: UserId(3),
            }
            .to_string(),
            "/guilds/7/voice-states/3",
        );
        assert_eq!(
            Route::WebhookOriginalMessage {
                application_id: ApplicationId(5),
                token: "t",
            }
            .to_string(),
            "/webhooks/5/t/messages/@original",
        );
    }
}
