//! Message bodies used in voice-gateway event handling.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::model::id::{GuildId, UserId};

/// Used to begin a voice websocket connection.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Identify {
    /// Guild which the target voice channel belongs to.
    pub server_id: GuildId,
    /// Authentication session received as part of a `VOICE_STATE_UPDATE`.
    pub session_id: String,
    /// Authentication token received as part of a `VOICE_SERVER_UPDATE`.
    pub token: String,
    /// User of the client who is connecting.
    pub user_id: UserId,
}

/// RTP server's connection offer and supported encryption modes.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Ready {
    /// IP address of the call's allocated RTP server.
    pub ip: IpAddr,
    /// Destination port on the call's allocated RTP server.
    pub port: u16,
    /// RTP synchronisation source assigned by the server to the client.
    pub ssrc: u32,
    /// Set of voice encryption modes offered by the server.
    pub modes: Vec<String>,
}

/// Used to determine how often the client must send a heartbeat.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Hello {
    /// Number of milliseconds to wait between sending heartbeat messages.
    pub heartbeat_interval: f64,
}

/// Periodic client message keeping the websocket alive.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Heartbeat {
    /// Client nonce, conventionally milliseconds since the unix epoch.
    pub t: u64,
    /// Last server-side sequence number observed on this socket.
    pub seq_ack: u64,
}

/// Acknowledgement from the server for a prior voice heartbeat.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct HeartbeatAck {
    /// The nonce the acknowledged heartbeat carried.
    pub t: u64,
}

/// Used to select the voice protocol and encryption mechanism.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SelectProtocol {
    /// Transport protocol; `"udp"` is the only accepted value.
    pub protocol: String,
    /// Client's response to encryption/connection negotiation.
    pub data: ProtocolData,
}

/// The client's external address as revealed by IP discovery.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ProtocolData {
    pub address: String,
    pub port: u16,
    /// Negotiated encryption mode name.
    pub mode: String,
}

/// Server's confirmation of a negotiated encryption scheme.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct SessionDescription {
    /// The negotiated encryption mode.
    pub mode: String,
    /// Key used for encryption of RTP payloads using the chosen mode.
    pub secret_key: Vec<u8>,
}

/// Used to indicate which users are speaking, or to inform the server that
/// the client is now speaking.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Speaking {
    /// Speaking-mode bitfield; bit 0 is the microphone flag.
    pub speaking: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<u32>,
    pub ssrc: u32,
    /// Set on messages *received from* the server, mapping SSRC to speaker.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Sent by the client after a disconnect to attempt to resume a session.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Resume {
    pub server_id: GuildId,
    pub session_id: String,
    pub token: String,
    pub seq_ack: u64,
}

/// Status update in the current channel: users have connected.
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ClientsConnect {
    #[serde(default)]
    pub user_ids: Vec<UserId>,
}

/// Status update in the current channel: a user has disconnected.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct ClientDisconnect {
    pub user_id: UserId,
}
