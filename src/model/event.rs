//! The control-gateway wire envelope and its typed event variants.
//!
//! Every frame received from the gateway is decoded exactly once into an
//! [`Envelope`]; the inner `d` payload stays as raw JSON until the opcode
//! (and, for dispatches, the event name) selects a concrete type.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::gateway::Hello;

/// An enum representing the [gateway opcodes].
///
/// [gateway opcodes]: https://discord.com/developers/docs/topics/opcodes-and-status-codes#gateway
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize_repr, Serialize_repr,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    /// An event was dispatched.
    Dispatch = 0,
    /// Fired periodically by the client to keep the connection alive.
    Heartbeat = 1,
    /// Starts a new session during the initial handshake.
    Identify = 2,
    /// Update the client's presence.
    PresenceUpdate = 3,
    /// Used to join/leave or move between voice channels.
    VoiceStateUpdate = 4,
    /// Resume a previous session that was disconnected.
    Resume = 6,
    /// You should attempt to reconnect and resume immediately.
    Reconnect = 7,
    /// Request information about offline guild members in a large guild.
    RequestGuildMembers = 8,
    /// The session has been invalidated.
    InvalidSession = 9,
    /// Sent immediately after connecting, contains the heartbeat interval.
    Hello = 10,
    /// Sent in response to receiving a heartbeat to acknowledge it.
    HeartbeatAck = 11,
}

/// The raw `{op, d, s, t}` wire envelope.
///
/// `d` is held as unparsed JSON; per-variant decoding happens in
/// [`GatewayEvent::try_from`] and, for dispatches, in the event router.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: Opcode,
    #[serde(default)]
    pub d: Option<Box<RawValue>>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// A partially-decoded gateway event, switched on by the session driver.
#[derive(Debug)]
pub enum GatewayEvent {
    /// An opcode-0 event carrying a named payload, still raw.
    Dispatch {
        seq: Option<u64>,
        name: String,
        payload: Box<RawValue>,
    },
    /// The gateway requests an immediate heartbeat.
    Heartbeat,
    /// The gateway acknowledged our last heartbeat.
    HeartbeatAck,
    /// The gateway asks the client to reconnect and resume.
    Reconnect,
    /// The session was invalidated; the flag says whether it is resumable.
    InvalidSession(bool),
    /// First message on any fresh socket; carries the heartbeat interval.
    Hello(Hello),
}

impl TryFrom<Envelope> for GatewayEvent {
    type Error = serde_json::Error;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        Ok(match envelope.op {
            Opcode::Dispatch => {
                let payload = envelope.d.unwrap_or_else(|| {
                    RawValue::from_string("null".into()).expect("literal null is valid json")
                });

                GatewayEvent::Dispatch {
                    seq: envelope.s,
                    name: envelope.t.unwrap_or_default(),
                    payload,
                }
            },
            Opcode::Heartbeat => GatewayEvent::Heartbeat,
            Opcode::HeartbeatAck => GatewayEvent::HeartbeatAck,
            Opcode::Reconnect => GatewayEvent::Reconnect,
            Opcode::InvalidSession => {
                let resumable = match envelope.d {
                    Some(raw) => serde_json::from_str(raw.get())?,
                    None => false,
                };

                GatewayEvent::InvalidSession(resumable)
            },
            Opcode::Hello => {
                let raw = envelope
                    .d
                    .ok_or_else(|| serde::de::Error::custom("hello without payload"))?;

                GatewayEvent::Hello(serde_json::from_str(raw.get())?)
            },
            // Client-to-server opcodes are never received.
            other => {
                return Err(serde::de::Error::custom(format_args!(
                    "unexpected inbound opcode {:?}",
                    other
                )))
            },
        })
    }
}

/// Names of the dispatch events the router understands.
pub mod event_name {
    pub const READY: &str = "READY";
    pub const RESUMED: &str = "RESUMED";
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
    pub const INTERACTION_CREATE: &str = "INTERACTION_CREATE";
    pub const VOICE_STATE_UPDATE: &str = "VOICE_STATE_UPDATE";
    pub const VOICE_SERVER_UPDATE: &str = "VOICE_SERVER_UPDATE";
}

/// A fully-decoded dispatch event.
///
/// Decoding happens in one place so the session state machine never touches
/// ad-hoc JSON. Unknown names are preserved for logging and then dropped:
/// forward compatibility is a hard requirement.
#[derive(Debug)]
pub enum Event {
    Ready(super::gateway::Ready),
    Resumed,
    MessageCreate(super::message::Message),
    InteractionCreate(super::interaction::Interaction),
    VoiceStateUpdate(super::voice::VoiceState),
    VoiceServerUpdate(super::voice::VoiceServerUpdate),
    Unknown(String),
}

impl Event {
    /// Decodes a named dispatch payload into its typed variant.
    pub fn decode(name: &str, payload: &RawValue) -> Result<Event, serde_json::Error> {
        Ok(match name {
            event_name::READY => Event::Ready(serde_json::from_str(payload.get())?),
            event_name::RESUMED => Event::Resumed,
            event_name::MESSAGE_CREATE => {
                Event::MessageCreate(serde_json::from_str(payload.get())?)
            },
            event_name::INTERACTION_CREATE => {
                Event::InteractionCreate(serde_json::from_str(payload.get())?)
            },
            event_name::VOICE_STATE_UPDATE => {
                Event::VoiceStateUpdate(serde_json::from_str(payload.get())?)
            },
            event_name::VOICE_SERVER_UPDATE => {
                Event::VoiceServerUpdate(serde_json::from_str(payload.get())?)
            },
            other => Event::Unknown(other.to_owned()),
        })
    }
}

/// Outbound heartbeat body: `{op: 1, d: <sequence|null>}`.
#[derive(Debug, Serialize)]
pub struct OutboundHeartbeat {
    pub op: Opcode,
    pub d: Option<u64>,
}

impl OutboundHeartbeat {
    pub fn new(seq: Option<u64>) -> Self {
        Self {
            op: Opcode::Heartbeat,
            d: seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_hello_envelope() {
        let json = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();
        let event = GatewayEvent::try_from(envelope).unwrap();

        assert!(matches!(event, GatewayEvent::Hello(h) if h.heartbeat_interval == 41250));
    }

    #[test]
    fn decode_dispatch_keeps_payload_raw() {
        let json = r#"{"op":0,"s":42,"t":"READY","d":{"session_id":"abc","resume_gateway_url":"wss://r","user":{"id":"7"}}}"#;
        let envelope: Envelope = serde_json::from_str(json).unwrap();

        match GatewayEvent::try_from(envelope).unwrap() {
            GatewayEvent::Dispatch { seq, name, payload } => {
                assert_eq!(seq, Some(42));
                assert_eq!(name, "READY");

                let ready = Event::decode(&name, &payload).unwrap();
                assert!(matches!(ready, Event::Ready(r) if r.session_id == "abc"));
            },
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn decode_invalid_session_flag() {
        let envelope: Envelope = serde_json::from_str(r#"{"op":9,"d":false}"#).unwrap();
        let event = GatewayEvent::try_from(envelope).unwrap();

        assert!(matches!(event, GatewayEvent::InvalidSession(false)));
    }

    #[test]
    fn decode_heartbeat_request_and_ack() {
        let hb: Envelope = serde_json::from_str(r#"{"op":1,"d":41}"#).unwrap();
        let ack: Envelope = serde_json::from_str(r#"{"op":11}"#).unwrap();

        assert!(matches!(GatewayEvent::try_from(hb).unwrap(), GatewayEvent::Heartbeat));
        assert!(matches!(GatewayEvent::try_from(ack).unwrap(), GatewayEvent::HeartbeatAck));
    }

    #[test]
    fn unknown_opcode_is_a_decode_error() {
        let result = serde_json::from_str::<Envelope>(r#"{"op":250,"d":null}"#);

        assert!(result.is_err());
    }

    #[test]
    fn unknown_dispatch_name_is_preserved() {
        let payload = RawValue::from_string("{}".into()).unwrap();
        let event = Event::decode("GUILD_CREATE", &payload).unwrap();

        assert!(matches!(event, Event::Unknown(name) if name == "GUILD_CREATE"));
    }

    #[test]
    fn outbound_heartbeat_round_trips() {
        let json = serde_json::to_string(&OutboundHeartbeat::new(Some(42))).unwrap();
        let envelope: Envelope = serde_json::from_str(&json).unwrap();

        assert_eq!(envelope.op, Opcode::Heartbeat);
        assert_eq!(envelope.d.unwrap().get(), "42");

        let null = serde_json::to_string(&OutboundHeartbeat::new(None)).unwrap();
        assert_eq!(null, r#"{"op":1,"d":null}"#);
    }
}
