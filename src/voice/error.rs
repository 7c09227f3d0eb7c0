//! Voice connection errors and close-code classification.

use std::fmt;
use std::io::Error as IoError;

use crate::ws::Error as WsError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The websocket handshake returned something other than Hello/Ready.
    ExpectedHandshake,
    /// The voice endpoint could not be turned into a URL.
    EndpointUrl,
    /// The server offered no encryption mode we implement.
    CryptoModeUnavailable,
    /// The session description named a different mode than we selected.
    CryptoModeInvalid,
    /// The secret key was the wrong length for the negotiated cipher.
    CryptoInvalidKey,
    /// AEAD sealing failed.
    CryptoFailure,
    /// The IP discovery reply was too short or of the wrong type.
    IllegalDiscoveryResponse,
    /// The IP discovery reply's address field did not parse.
    IllegalIp,
    /// No heartbeat acknowledgement arrived within one interval.
    HeartbeatMissed,
    Io(IoError),
    Json(serde_json::Error),
    Ws(WsError),
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        Error::Io(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Error::Ws(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ExpectedHandshake => f.write_str("expected hello/ready during voice handshake"),
            Error::EndpointUrl => f.write_str("voice endpoint url invalid"),
            Error::CryptoModeUnavailable => f.write_str("no supported encryption mode offered"),
            Error::CryptoModeInvalid => f.write_str("session description mode mismatch"),
            Error::CryptoInvalidKey => f.write_str("secret key has the wrong length"),
            Error::CryptoFailure => f.write_str("aead sealing failed"),
            Error::IllegalDiscoveryResponse => f.write_str("malformed ip discovery response"),
            Error::IllegalIp => f.write_str("ip discovery reply held an unparsable address"),
            Error::HeartbeatMissed => f.write_str("voice heartbeat went unacknowledged"),
            Error::Io(e) => write!(f, "voice io error: {e}"),
            Error::Json(e) => write!(f, "voice json error: {e}"),
            Error::Ws(e) => write!(f, "voice websocket error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Ws(e) => Some(e),
            _ => None,
        }
    }
}

/// What the session runner should do after the socket went away.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseAction {
    /// Redial the same endpoint and send RESUME.
    Resume,
    /// The session is dead; release resources and drop out of the manager.
    Teardown,
    /// As `Teardown`, but worth an error-level log: the credentials were
    /// rejected outright.
    Fatal,
}

/// Classifies a voice-gateway close code.
///
/// Codes follow the platform's voice close-event table: 4001 unknown opcode,
/// 4002 decode failure, 4003 not authenticated, 4004 authentication failed,
/// 4005 already authenticated, 4006 session invalid, 4009 session timeout,
/// 4011 server not found, 4012 unknown protocol, 4014 disconnected,
/// 4015 server crashed, 4016 unknown encryption mode.
pub fn close_action(code: Option<u16>) -> CloseAction {
    match code {
        Some(4009) | Some(4015) => CloseAction::Resume,
        Some(4004) => CloseAction::Fatal,
        Some(code) if (4000..5000).contains(&code) => CloseAction::Teardown,
        // Transport-level closes (1000, 1006, no frame at all) are worth one
        // resume attempt before giving the session up.
        _ => CloseAction::Resume,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_classify() {
        assert_eq!(close_action(Some(4009)), CloseAction::Resume);
        assert_eq!(close_action(Some(4015)), CloseAction::Resume);
        assert_eq!(close_action(Some(4004)), CloseAction::Fatal);
        assert_eq!(close_action(Some(4006)), CloseAction::Teardown);
        assert_eq!(close_action(Some(4014)), CloseAction::Teardown);
        assert_eq!(close_action(Some(4016)), CloseAction::Teardown);
        assert_eq!(close_action(Some(1006)), CloseAction::Resume);
        assert_eq!(close_action(None), CloseAction::Resume);
    }
}
