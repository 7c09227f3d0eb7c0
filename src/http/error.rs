use std::fmt;

use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The request never produced a response (connect error, timeout).
    Request(reqwest::Error),
    /// A response arrived with a status the typed endpoint cannot use.
    UnexpectedStatus(StatusCode),
    /// A 2xx body failed to decode into the endpoint's type.
    Decode(serde_json::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Request(e) => write!(f, "http request error: {e}"),
            Error::UnexpectedStatus(status) => write!(f, "unexpected http status: {status}"),
            Error::Decode(e) => write!(f, "http body decode error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Request(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::UnexpectedStatus(_) => None,
        }
    }
}
