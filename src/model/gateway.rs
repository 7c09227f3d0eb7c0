//! Payload bodies exchanged during the control-gateway handshake.

use serde::{Deserialize, Serialize};

use super::message::User;

/// Used to determine how often the client must send a heartbeat.
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct Hello {
    /// Number of milliseconds to wait between sending heartbeat messages.
    pub heartbeat_interval: u64,
}

/// Dispatch payload confirming a successful identify.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ready {
    /// Unique string naming this session, required for resuming.
    pub session_id: String,
    /// Gateway URL that must be used for resume attempts.
    pub resume_gateway_url: String,
    /// The bot user this session authenticated as.
    pub user: User,
}

/// Connection properties reported inside IDENTIFY.
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyProperties {
    pub os: &'static str,
    pub browser: &'static str,
    pub device: &'static str,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS,
            browser: "bellbird",
            device: "bellbird",
        }
    }
}
