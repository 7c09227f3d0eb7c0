//! The crate-wide error type, composing each subsystem's own errors.

use std::fmt;

use crate::config::ConfigError;
use crate::gateway::Error as GatewayError;
use crate::http::HttpError;
use crate::voice::Error as VoiceError;
use crate::ws::Error as WsError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Config(ConfigError),
    Gateway(GatewayError),
    Http(HttpError),
    Voice(VoiceError),
    Ws(WsError),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<GatewayError> for Error {
    fn from(e: GatewayError) -> Self {
        Error::Gateway(e)
    }
}

impl From<HttpError> for Error {
    fn from(e: HttpError) -> Self {
        Error::Http(e)
    }
}

impl From<VoiceError> for Error {
    fn from(e: VoiceError) -> Self {
        Error::Voice(e)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Self {
        Error::Ws(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => fmt::Display::fmt(e, f),
            Error::Gateway(e) => fmt::Display::fmt(e, f),
            Error::Http(e) => fmt::Display::fmt(e, f),
            Error::Voice(e) => fmt::Display::fmt(e, f),
            Error::Ws(e) => fmt::Display::fmt(e, f),
            Error::Json(e) => fmt::Display::fmt(e, f),
            Error::Io(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => Some(e),
            Error::Gateway(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::Voice(e) => Some(e),
            Error::Ws(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
        }
    }
}
