//! Voice-gateway handshake and UDP negotiation.
//!
//! Walks the session through hello/identify/ready, IP discovery,
//! select-protocol and session-description, ending with the initial
//! speaking announcement. The returned [`Negotiated`] carries everything
//! the long-lived socket task and the media pipeline need.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info, instrument};
use url::Url;

use super::crypto::{Cipher, Mode};
use super::error::{Error, Result};
use super::event::{Envelope, Event};
use super::payload::{
    Hello, Identify, ProtocolData, Ready, Resume, SelectProtocol, SessionDescription, Speaking,
};
use super::rtp::{discovery_request, parse_discovery_response, DISCOVERY_LEN};
use crate::model::id::{GuildId, UserId};
use crate::ws::WsClient;

/// How long the UDP discovery reply may take before the handshake fails.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters needed to start communicating with a guild's voice server,
/// assembled from a `VOICE_STATE_UPDATE` / `VOICE_SERVER_UPDATE` pair.
#[derive(Clone)]
pub struct ConnectionInfo {
    /// URL of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// The target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session, from `VOICE_STATE_UPDATE`.
    pub session_id: String,
    /// Ephemeral secret used to validate the session, from
    /// `VOICE_SERVER_UPDATE`.
    pub token: String,
    /// UserId of this bot.
    pub user_id: UserId,
}

impl std::fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Everything a fully-negotiated voice session owns.
pub(crate) struct Negotiated {
    pub client: WsClient,
    pub udp: Arc<UdpSocket>,
    pub ssrc: u32,
    pub cipher: Cipher,
    pub heartbeat_interval: Duration,
    /// Externally-visible address reported by IP discovery.
    pub external_address: (String, u16),
}

fn generate_url(endpoint: &str, version: u8) -> Result<Url> {
    // Tests hand over a full ws:// URL; the platform hands over a bare host,
    // sometimes with a legacy :80 suffix.
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        return Url::parse(&format!("{endpoint}/?v={version}")).map_err(|_| Error::EndpointUrl);
    }

    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);

    Url::parse(&format!("wss://{endpoint}/?v={version}")).map_err(|_| Error::EndpointUrl)
}

async fn recv_event(client: &mut WsClient) -> Result<Event> {
    loop {
        let envelope: Envelope = match client.recv_json().await? {
            Some(envelope) => envelope,
            None => continue,
        };

        return Ok(envelope.into_event()?);
    }
}

/// Dials the voice gateway and negotiates a complete media path.
#[instrument(skip_all, fields(guild_id = %info.guild_id, endpoint = %info.endpoint))]
pub(crate) async fn connect(info: &ConnectionInfo, version: u8) -> Result<Negotiated> {
    let url = generate_url(&info.endpoint, version)?;
    let mut client = WsClient::connect(url).await?;

    client
        .send_json(&Event::from(Identify {
            server_id: info.guild_id,
            session_id: info.session_id.clone(),
            token: info.token.clone(),
            user_id: info.user_id,
        }))
        .await?;

    let mut hello: Option<Hello> = None;
    let mut ready: Option<Ready> = None;

    // Hello and Ready arrive in either order after Identify.
    while hello.is_none() || ready.is_none() {
        match recv_event(&mut client).await? {
            Event::Ready(r) => ready = Some(r),
            Event::Hello(h) => hello = Some(h),
            other => {
                debug!("expected hello/ready; skipping {:?}", other.kind());
            },
        }
    }

    let hello = hello.expect("checked by loop condition");
    let ready = ready.expect("checked by loop condition");

    let mode = Mode::negotiate(&ready.modes)?;

    let udp = UdpSocket::bind("0.0.0.0:0").await?;
    udp.connect((ready.ip, ready.port)).await?;

    // IP discovery, in case NAT tunnelling is needed.
    let request = discovery_request(ready.ssrc, &ready.ip.to_string(), ready.port);
    udp.send(&request).await?;

    let mut reply = [0u8; DISCOVERY_LEN];
    let len = timeout(DISCOVERY_TIMEOUT, udp.recv(&mut reply))
        .await
        .map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "ip discovery reply timed out",
            ))
        })??;
    let (address, port) = parse_discovery_response(&reply[..len])?;

    debug!(%address, port, "ip discovery complete");

    client
        .send_json(&Event::from(SelectProtocol {
            protocol: "udp".into(),
            data: ProtocolData {
                address: address.clone(),
                port,
                mode: mode.to_request_str().into(),
            },
        }))
        .await?;

    let description = loop {
        match recv_event(&mut client).await? {
            Event::SessionDescription(description) => break description,
            other => {
                debug!("expected session description; skipping {:?}", other.kind());
            },
        }
    };

    let cipher = init_cipher(mode, &description)?;

    client
        .send_json(&Event::from(Speaking {
            speaking: 1,
            delay: Some(0),
            ssrc: ready.ssrc,
            user_id: None,
        }))
        .await?;

    info!(ssrc = ready.ssrc, "voice connection negotiated");

    Ok(Negotiated {
        client,
        udp: Arc::new(udp),
        ssrc: ready.ssrc,
        cipher,
        heartbeat_interval: Duration::from_secs_f64(hello.heartbeat_interval / 1000.0),
        external_address: (address, port),
    })
}

/// Redials the same endpoint and resumes the session in place.
///
/// The UDP path, SSRC and keys survive a resume; only the socket and the
/// heartbeat cadence are replaced.
#[instrument(skip_all, fields(guild_id = %info.guild_id))]
pub(crate) async fn resume(
    info: &ConnectionInfo,
    version: u8,
    seq_ack: u64,
) -> Result<(WsClient, Duration)> {
    let url = generate_url(&info.endpoint, version)?;
    let mut client = WsClient::connect(url).await?;

    client
        .send_json(&Event::from(Resume {
            server_id: info.guild_id,
            session_id: info.session_id.clone(),
            token: info.token.clone(),
            seq_ack,
        }))
        .await?;

    let mut hello: Option<Hello> = None;
    let mut resumed = false;

    while hello.is_none() || !resumed {
        match recv_event(&mut client).await? {
            Event::Hello(h) => hello = Some(h),
            Event::Resumed => resumed = true,
            other => {
                debug!("expected hello/resumed; skipping {:?}", other.kind());
            },
        }
    }

    let hello = hello.expect("checked by loop condition");

    info!("voice connection resumed");

    Ok((
        client,
        Duration::from_secs_f64(hello.heartbeat_interval / 1000.0),
    ))
}

/// Encryption must not begin before the session description has supplied
/// both key and mode, and the confirmed mode must be the one we selected.
fn init_cipher(mode: Mode, description: &SessionDescription) -> Result<Cipher> {
    if description.mode != mode.to_request_str() {
        return Err(Error::CryptoModeInvalid);
    }

    Cipher::new(mode, &description.secret_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_url_wraps_bare_endpoints() {
        let url = generate_url("west.voice.example.com:80", 8).unwrap();
        assert_eq!(url.as_str(), "wss://west.voice.example.com/?v=8");

        let passthrough = generate_url("ws://127.0.0.1:9031", 8).unwrap();
        assert_eq!(passthrough.scheme(), "ws");
        assert_eq!(passthrough.port(), Some(9031));
    }

    #[test]
    fn init_cipher_rejects_mode_mismatch() {
        let description = SessionDescription {
            mode: "aead_aes256_gcm_rtpsize".into(),
            secret_key: vec![0; 32],
        };

        assert!(matches!(
            init_cipher(Mode::XChaCha20Poly1305RtpSize, &description),
            Err(Error::CryptoModeInvalid)
        ));
    }
}
