//! Errors surfaced by the control-gateway engine.

use std::fmt;

use crate::ws::Error as WsError;

pub type Result<T> = std::result::Result<T, Error>;

/// An error that occurred while attempting to deal with the gateway.
///
/// Recoverable conditions (transport loss, reconnect requests) are absorbed
/// by the session's driver loop; only fatal conditions and shutdown escape
/// to the host.
#[derive(Debug)]
pub enum Error {
    /// There was an error building a gateway URL.
    BuildingUrl,
    /// Expected a Hello during a handshake.
    ExpectedHello,
    /// Invalid authentication (a bad token) was sent in the IDENTIFY
    /// (close code 4004).
    InvalidAuthentication,
    /// The IDENTIFY asked for intents the bot is not approved for
    /// (close code 4014).
    DisallowedIntents,
    /// Failed to connect after the full backoff schedule.
    ReconnectFailure,
    Json(serde_json::Error),
    Ws(WsError),
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
            Error::BuildingUrl => f.write_str("error building gateway url"),
            Error::ExpectedHello => f.write_str("expected a hello"),
            Error::InvalidAuthentication => f.write_str("sent invalid authentication"),
            Error::DisallowedIntents => f.write_str("requested gateway intents are not allowed"),
            Error::ReconnectFailure => f.write_str("failed to connect after retrying"),
            Error::Json(e) => write!(f, "gateway json error: {e}"),
            Error::Ws(e) => write!(f, "gateway websocket error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Json(e) => Some(e),
            Error::Ws(e) => Some(e),
            _ => None,
        }
    }
}

/// Maps a close code to a fatal error, when it is one.
///
/// 4004 (authentication failed) and 4014 (disallowed intents) cannot be
/// retried into success; everything else goes back through resume.
pub(crate) fn fatal_close(code: Option<u16>) -> Option<Error> {
    match code {
        Some(4004) => Some(Error::InvalidAuthentication),
        Some(4014) => Some(Error::DisallowedIntents),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_and_intents_are_fatal() {
        assert!(matches!(fatal_close(Some(4004)), Some(Error::InvalidAuthentication)));
        assert!(matches!(fatal_close(Some(4014)), Some(Error::DisallowedIntents)));
        assert!(fatal_close(Some(4000)).is_none());
        assert!(fatal_close(Some(4009)).is_none());
        assert!(fatal_close(Some(1006)).is_none());
        assert!(fatal_close(None).is_none());
    }
}
