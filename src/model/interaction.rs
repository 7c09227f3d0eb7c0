//! Interaction objects and callback bodies.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::id::{ChannelId, GuildId, InteractionId};
use super::message::User;

/// Subset of an `INTERACTION_CREATE` payload.
#[derive(Clone, Debug, Deserialize)]
pub struct Interaction {
    pub id: InteractionId,
    /// Continuation token for responding to this interaction.
    pub token: String,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    #[serde(default)]
    pub channel_id: Option<ChannelId>,
    /// Present for guild interactions.
    #[serde(default)]
    pub member: Option<Member>,
    /// Present for DM interactions.
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub data: Option<InteractionData>,
}

impl Interaction {
    /// The user who triggered the interaction, wherever it happened.
    pub fn invoker(&self) -> Option<&User> {
        self.member.as_ref().map(|m| &m.user).or(self.user.as_ref())
    }

    /// Name of the invoked application command, if any.
    pub fn command_name(&self) -> Option<&str> {
        self.data.as_ref().map(|d| d.name.as_str())
    }

    /// Looks up a string-valued command option.
    pub fn option_str(&self, name: &str) -> Option<&str> {
        self.data
            .as_ref()?
            .options
            .iter()
            .find(|o| o.name == name)
            .and_then(|o| o.value.as_ref())
            .and_then(|v| v.as_str())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Member {
    pub user: User,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionData {
    pub name: String,
    #[serde(default)]
    pub options: Vec<InteractionOption>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InteractionOption {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// An enum representing the [interaction callback types].
///
/// [interaction callback types]: https://discord.com/developers/docs/interactions/receiving-and-responding#interaction-response-object
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize_repr, Serialize_repr)]
#[non_exhaustive]
#[repr(u8)]
pub enum InteractionResponseType {
    Pong = 1,
    ChannelMessageWithSource = 4,
    DeferredChannelMessageWithSource = 5,
    DeferredUpdateMessage = 6,
    UpdateMessage = 7,
    ApplicationCommandAutocompleteResult = 8,
    Modal = 9,
    PremiumRequired = 10,
    LaunchActivity = 12,
}

/// Body of `POST /interactions/{id}/{token}/callback`.
#[derive(Clone, Debug, Serialize)]
pub struct InteractionResponse {
    #[serde(rename = "type")]
    pub kind: InteractionResponseType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<InteractionResponseData>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct InteractionResponseData {
    pub content: String,
}

impl InteractionResponse {
    /// A plain type-4 message reply.
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            kind: InteractionResponseType::ChannelMessageWithSource,
            data: Some(InteractionResponseData {
                content: content.into(),
            }),
        }
    }
}

/// Formats a user mention the way message content embeds it.
pub fn mention(user: super::id::UserId) -> String {
    format!("<@{user}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id::UserId;

    #[test]
    fn decode_interaction_with_member_and_options() {
        let json = r#"{
            "id": "9001",
            "token": "tok",
            "guild_id": "77",
            "member": {"user": {"id": "12", "username": "meri"}},
            "data": {"name": "play", "options": [{"name": "track", "value": "bells.mp3"}]}
        }"#;

        let interaction: Interaction = serde_json::from_str(json).unwrap();

        assert_eq!(interaction.command_name(), Some("play"));
        assert_eq!(interaction.option_str("track"), Some("bells.mp3"));
        assert_eq!(interaction.invoker().unwrap().id, UserId(12));
    }

    #[test]
    fn message_response_serializes_type_4() {
        let json = serde_json::to_value(InteractionResponse::message("hi")).unwrap();

        assert_eq!(json["type"], 4);
        assert_eq!(json["data"]["content"], "hi");
    }
}
