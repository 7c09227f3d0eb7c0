//! A collection of newtypes defining type-strong IDs.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::util::json_safe_u64;

macro_rules! id_newtype {
    ($(#[$attr:meta] $name:ident;)*) => {
        $(
            #[$attr]
            #[derive(
                Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd,
                Serialize,
            )]
            pub struct $name(#[serde(with = "json_safe_u64")] pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    fmt::Display::fmt(&self.0, f)
                }
            }

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id)
                }
            }
        )*
    };
}

id_newtype! {
    /// Identifier of a guild (the scope of one voice session).
    GuildId;
    /// Identifier of a user.
    UserId;
    /// Identifier of a text or voice channel.
    ChannelId;
    /// Identifier of an application, as issued by the developer portal.
    ApplicationId;
    /// Identifier of a single interaction exchange.
    InteractionId;
    /// Identifier of a message.
    MessageId;
}
