//! The voice-gateway wire envelope and event variants.

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_repr::{Deserialize_repr, Serialize_repr};

use super::payload::*;

/// An enum representing the [voice opcodes].
///
/// Opcodes 21 through 31 belong to the DAVE end-to-end encryption protocol;
/// they are recognised so that decoding survives them, and then ignored.
///
/// [voice opcodes]: https://discord.com/developers/docs/topics/opcodes-and-status-codes#voice
#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize_repr, Serialize_repr,
)]
#[non_exhaustive]
#[repr(u8)]
pub enum Opcode {
    /// Used to begin a voice websocket connection.
    Identify = 0,
    /// Used to select the voice protocol.
    SelectProtocol = 1,
    /// Used to complete the websocket handshake.
    Ready = 2,
    /// Used to keep the websocket connection alive.
    Heartbeat = 3,
    /// Server's confirmation of a negotiated encryption scheme.
    SessionDescription = 4,
    /// Used to indicate which users are speaking.
    Speaking = 5,
    /// Server's receipt of a client heartbeat.
    HeartbeatAck = 6,
    /// Sent after a disconnect to attempt to resume a session.
    Resume = 7,
    /// Used to determine how often the client must send a heartbeat.
    Hello = 8,
    /// Message received if a Resume request was successful.
    Resumed = 9,
    /// Users have connected to the voice channel.
    ClientsConnect = 11,
    /// A user has disconnected from the voice channel.
    ClientDisconnect = 13,
    DavePrepareTransition = 21,
    DaveExecuteTransition = 22,
    DaveTransitionReady = 23,
    DavePrepareEpoch = 24,
    DaveMlsExternalSender = 25,
    DaveMlsKeyPackage = 26,
    DaveMlsProposals = 27,
    DaveMlsCommitWelcome = 28,
    DaveMlsAnnounceCommitTransition = 29,
    DaveMlsWelcome = 30,
    DaveMlsInvalidCommitWelcome = 31,
}

impl Opcode {
    pub fn is_dave(self) -> bool {
        (self as u8) >= 21
    }
}

/// The raw voice envelope. Newer gateway versions attach a server `seq` to
/// most frames; it feeds the heartbeat's `seq_ack`.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub op: Opcode,
    #[serde(default)]
    pub d: Option<Box<RawValue>>,
    #[serde(default)]
    pub seq: Option<u64>,
}

/// A representation of data received for voice gateway events.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Event {
    Identify(Identify),
    SelectProtocol(SelectProtocol),
    Ready(Ready),
    Heartbeat(Heartbeat),
    SessionDescription(SessionDescription),
    Speaking(Speaking),
    HeartbeatAck(HeartbeatAck),
    Resume(Resume),
    Hello(Hello),
    Resumed,
    ClientsConnect(ClientsConnect),
    ClientDisconnect(ClientDisconnect),
    /// A recognised-but-unimplemented opcode (the DAVE family).
    Ignored(Opcode),
}

impl Event {
    pub fn kind(&self) -> Opcode {
        use Event::*;
        match self {
            Identify(_) => Opcode::Identify,
            SelectProtocol(_) => Opcode::SelectProtocol,
            Ready(_) => Opcode::Ready,
            Heartbeat(_) => Opcode::Heartbeat,
            SessionDescription(_) => Opcode::SessionDescription,
            Speaking(_) => Opcode::Speaking,
            HeartbeatAck(_) => Opcode::HeartbeatAck,
            Resume(_) => Opcode::Resume,
            Hello(_) => Opcode::Hello,
            Resumed => Opcode::Resumed,
            ClientsConnect(_) => Opcode::ClientsConnect,
            ClientDisconnect(_) => Opcode::ClientDisconnect,
            Ignored(op) => *op,
        }
    }
}

impl Envelope {
    /// Decodes the inner payload according to the opcode.
    pub fn into_event(self) -> Result<Event, serde_json::Error> {
        let d = self.d.as_ref().map(|raw| raw.get()).unwrap_or("null");

        Ok(match self.op {
            Opcode::Identify => Event::Identify(serde_json::from_str(d)?),
            Opcode::SelectProtocol => Event::SelectProtocol(serde_json::from_str(d)?),
            Opcode::Ready => Event::Ready(serde_json::from_str(d)?),
            Opcode::Heartbeat => Event::Heartbeat(serde_json::from_str(d)?),
            Opcode::SessionDescription => Event::SessionDescription(serde_json::from_str(d)?),
            Opcode::Speaking => Event::Speaking(serde_json::from_str(d)?),
            Opcode::HeartbeatAck => Event::HeartbeatAck(serde_json::from_str(d)?),
            Opcode::Resume => Event::Resume(serde_json::from_str(d)?),
            Opcode::Hello => Event::Hello(serde_json::from_str(d)?),
            Opcode::Resumed => Event::Resumed,
            Opcode::ClientsConnect => Event::ClientsConnect(serde_json::from_str(d)?),
            Opcode::ClientDisconnect => Event::ClientDisconnect(serde_json::from_str(d)?),
            op => Event::Ignored(op),
        })
    }
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s = serializer.serialize_struct("Event", 2)?;

        s.serialize_field("op", &self.kind())?;

        use Event::*;
        match self {
            Identify(e) => s.serialize_field("d", e)?,
            SelectProtocol(e) => s.serialize_field("d", e)?,
            Ready(e) => s.serialize_field("d", e)?,
            Heartbeat(e) => s.serialize_field("d", e)?,
            SessionDescription(e) => s.serialize_field("d", e)?,
            Speaking(e) => s.serialize_field("d", e)?,
            HeartbeatAck(e) => s.serialize_field("d", e)?,
            Resume(e) => s.serialize_field("d", e)?,
            Hello(e) => s.serialize_field("d", e)?,
            Resumed | Ignored(_) => s.serialize_field("d", &None::<()>)?,
            ClientsConnect(e) => s.serialize_field("d", e)?,
            ClientDisconnect(e) => s.serialize_field("d", e)?,
        }

        s.end()
    }
}

macro_rules! event_from {
    ($($payload:ident),*) => {
        $(
            impl From<$payload> for Event {
                fn from(payload: $payload) -> Self {
                    Event::$payload(payload)
                }
            }
        )*
    };
}

event_from! {
    Identify, SelectProtocol, Ready, Heartbeat, SessionDescription, Speaking,
    HeartbeatAck, Resume, Hello, ClientsConnect, ClientDisconnect
}
