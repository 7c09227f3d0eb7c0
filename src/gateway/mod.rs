//! The control-gateway engine.
//!
//! [`Session`] drives a single long-lived gateway connection through an
//! explicit state loop: dial (with backoff) → hello → identify/resume →
//! read loop. The reader task owns the socket; outbound frames from other
//! parts of the engine are injected through a channel and written by the
//! owner, which keeps writes serialized by construction.

pub mod dispatch;
mod error;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use url::Url;

pub use self::dispatch::{Greeter, MessagePolicy, Router};
pub use self::error::Error;
use crate::config::Config;
use crate::constants::{GATEWAY_DIAL_ATTEMPTS, GATEWAY_DIAL_BACKOFF};
use crate::http::Http;
use crate::model::event::{Envelope, GatewayEvent, Opcode};
use crate::model::gateway::IdentifyProperties;
use crate::model::id::{ChannelId, GuildId};
use crate::voice::Manager;
use crate::ws::{Error as WsError, WsClient};

/// Stage of the connection state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionStage {
    Disconnected,
    Connecting,
    /// Hello received, identify not yet sent.
    WaitingToIdentify,
    Identifying,
    Resuming,
    Ready,
}

/// Outbound frames injected into the socket-owning task.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    UpdateVoiceState {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    },
}

/// Cloneable handle used by the router (and embedders) to push writes onto
/// the control socket.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    tx: Sender<SessionCommand>,
}

impl SessionHandle {
    /// Sends `{op:4}` asking the platform to move the bot in/out of a voice
    /// channel. `None` leaves voice entirely.
    pub fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_mute: bool,
        self_deaf: bool,
    ) {
        let _ = self.tx.send(SessionCommand::UpdateVoiceState {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        });
    }
}

#[derive(Debug, Default)]
struct HeartbeatInfo {
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    /// False while a heartbeat is in flight without an acknowledgement.
    acknowledged: bool,
}

/// Observable session state, shared with embedders and tests.
#[derive(Debug, Default)]
pub struct SessionShared {
    stage: Mutex<ConnectionStage>,
    session_id: Mutex<Option<String>>,
    resume_gateway_url: Mutex<Option<String>>,
    sequence: AtomicU64,
    heartbeat: Mutex<HeartbeatInfo>,
}

impl Default for ConnectionStage {
    fn default() -> Self {
        ConnectionStage::Disconnected
    }
}

impl SessionShared {
    pub fn stage(&self) -> ConnectionStage {
        *self.stage.lock()
    }

    fn set_stage(&self, stage: ConnectionStage) {
        *self.stage.lock() = stage;
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    pub fn resume_gateway_url(&self) -> Option<String> {
        self.resume_gateway_url.lock().clone()
    }

    /// Sequence number of the last dispatched event; monotone.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    fn observe_sequence(&self, seq: u64) {
        self.sequence.fetch_max(seq, Ordering::AcqRel);
    }

    pub fn last_heartbeat_sent(&self) -> Option<Instant> {
        self.heartbeat.lock().last_sent
    }

    pub fn last_heartbeat_ack(&self) -> Option<Instant> {
        self.heartbeat.lock().last_ack
    }

    /// Round-trip latency between the last heartbeat and its ack, when the
    /// pair is complete.
    pub fn latency(&self) -> Option<Duration> {
        let info = self.heartbeat.lock();

        match (info.last_sent, info.last_ack) {
            (Some(sent), Some(ack)) if ack > sent => Some(ack - sent),
            _ => None,
        }
    }
}

/// What the read loop decided after losing (or being told to drop) a socket.
enum SocketVerdict {
    Shutdown,
    Resume,
    Reidentify,
    Fatal(Error),
}

/// How the next socket will be opened.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DialPlan {
    Identify,
    Resume,
}

pub struct Session {
    gateway_address: String,
    gateway_version: u8,
    token: String,
    intents: u64,
    shared: Arc<SessionShared>,
    router: Router,
    rx: Receiver<SessionCommand>,
    tx: Sender<SessionCommand>,
    shutdown: CancellationToken,
}

impl Session {
    /// Builds a session (and its router) from loaded configuration.
    ///
    /// The voice manager is shared so embedders can inspect or tear down
    /// sessions from outside the event stream.
    pub fn new(
        config: &Config,
        http: Arc<Http>,
        manager: Arc<Manager>,
        shutdown: CancellationToken,
    ) -> Session {
        Self::with_policy(config, http, manager, shutdown, Box::new(Greeter))
    }

    pub fn with_policy(
        config: &Config,
        http: Arc<Http>,
        manager: Arc<Manager>,
        shutdown: CancellationToken,
        policy: Box<dyn MessagePolicy>,
    ) -> Session {
        let (tx, rx) = flume::unbounded();

        let router = Router::new(
            http,
            manager,
            config.application_id,
            config.voice_gateway_version,
            config.media_dir.clone(),
            shutdown.clone(),
            policy,
        );

        Session {
            gateway_address: config.gateway_address.clone(),
            gateway_version: config.gateway_version,
            token: config.bot_token.clone(),
            intents: config.bot_intents,
            shared: Arc::new(SessionShared::default()),
            router,
            rx,
            tx,
            shutdown,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle { tx: self.tx.clone() }
    }

    pub fn shared(&self) -> Arc<SessionShared> {
        Arc::clone(&self.shared)
    }

    fn gateway_url(&self, base: &str) -> Result<Url, Error> {
        let base = base.trim_end_matches('/');

        Url::parse(&format!(
            "{base}/?v={version}&encoding=json",
            version = self.gateway_version,
        ))
        .map_err(|_| Error::BuildingUrl)
    }

    fn resumable(&self) -> bool {
        self.shared.session_id().is_some() && self.shared.resume_gateway_url().is_some()
    }

    /// Runs the session until shutdown or a fatal error.
    ///
    /// Reconnects and resumes are internal; the caller only ever sees
    /// `Ok(())` on requested shutdown or the fatal error that ended it all.
    pub async fn run(mut self) -> Result<(), Error> {
        let mut plan = DialPlan::Identify;

        loop {
            if self.shutdown.is_cancelled() {
                self.shared.set_stage(ConnectionStage::Disconnected);
                return Ok(());
            }

            let base = match plan {
                DialPlan::Identify => self.gateway_address.clone(),
                DialPlan::Resume => self
                    .shared
                    .resume_gateway_url()
                    .unwrap_or_else(|| self.gateway_address.clone()),
            };
            let url = self.gateway_url(&base)?;

            self.shared.set_stage(ConnectionStage::Connecting);
            let mut client = match self.dial(url).await? {
                Some(client) => client,
                // Shutdown arrived mid-backoff.
                None => {
                    self.shared.set_stage(ConnectionStage::Disconnected);
                    return Ok(());
                },
            };

            let initial_interval = match plan {
                DialPlan::Identify => match self.handshake_identify(&mut client).await {
                    Ok(interval) => Some(interval),
                    Err(e) => {
                        warn!("handshake failed: {e}; redialing");
                        continue;
                    },
                },
                DialPlan::Resume => {
                    // The resume payload must be the first outbound message;
                    // hello is consumed by the read loop when it arrives.
                    self.shared.set_stage(ConnectionStage::Resuming);
                    let resume = json!({
                        "op": Opcode::Resume,
                        "d": {
                            "token": self.token,
                            "session_id": self.shared.session_id(),
                            "seq": self.shared.sequence(),
                        },
                    });

                    if let Err(e) = client.send_json(&resume).await {
                        warn!("sending resume failed: {e}; redialing");
                        continue;
                    }
                    None
                },
            };

            let verdict = self.run_socket(&mut client, initial_interval).await;
            let _ = client.close().await;

            match verdict {
                SocketVerdict::Shutdown => {
                    self.shared.set_stage(ConnectionStage::Disconnected);
                    info!("gateway session shut down");
                    return Ok(());
                },
                SocketVerdict::Resume => {
                    plan = if self.resumable() {
                        DialPlan::Resume
                    } else {
                        DialPlan::Identify
                    };
                },
                SocketVerdict::Reidentify => {
                    self.reset_identity();
                    plan = DialPlan::Identify;
                },
                SocketVerdict::Fatal(e) => {
                    self.shared.set_stage(ConnectionStage::Disconnected);
                    return Err(e);
                },
            }

            debug!("reconnecting with plan {plan:?}");
        }
    }

    /// Dials with exponential backoff: up to five attempts, 1s → 16s.
    ///
    /// `Ok(None)` means shutdown interrupted the backoff.
    async fn dial(&self, url: Url) -> Result<Option<WsClient>, Error> {
        let mut delay = GATEWAY_DIAL_BACKOFF;

        for attempt in 1..=GATEWAY_DIAL_ATTEMPTS {
            info!(%url, attempt, "connecting to gateway");

            match WsClient::connect(url.clone()).await {
                Ok(client) => return Ok(Some(client)),
                Err(e) => warn!("gateway dial attempt {attempt} failed: {e}"),
            }

            if attempt < GATEWAY_DIAL_ATTEMPTS {
                tokio::select! {
                    _ = self.shutdown.cancelled() => return Ok(None),
                    _ = sleep(delay) => {},
                }
                delay *= 2;
            }
        }

        Err(Error::ReconnectFailure)
    }

    /// Fresh-session handshake: await hello, then identify.
    async fn handshake_identify(&self, client: &mut WsClient) -> Result<Duration, Error> {
        let hello = loop {
            let envelope: Envelope = match client.recv_json().await? {
                Some(envelope) => envelope,
                None => continue,
            };

            match GatewayEvent::try_from(envelope) {
                Ok(GatewayEvent::Hello(hello)) => break hello,
                Ok(other) => {
                    // Anything before hello is out of contract; it never
                    // reaches the dispatch path.
                    debug!("expected hello, skipping {other:?}");
                },
                Err(e) => warn!("undecodable pre-hello frame dropped: {e:?}"),
            }
        };

        self.shared.set_stage(ConnectionStage::WaitingToIdentify);
        debug!(interval_ms = hello.heartbeat_interval, "hello received; identifying");

        let identify = json!({
            "op": Opcode::Identify,
            "d": {
                "token": self.token,
                "intents": self.intents,
                "properties": IdentifyProperties::default(),
            },
        });
        client.send_json(&identify).await?;
        self.shared.set_stage(ConnectionStage::Identifying);

        Ok(Duration::from_millis(hello.heartbeat_interval))
    }

    /// The read loop: owns the socket until it dies or shutdown fires.
    async fn run_socket(
        &mut self,
        client: &mut WsClient,
        initial_interval: Option<Duration>,
    ) -> SocketVerdict {
        let mut interval = initial_interval;
        let mut next_beat = interval.map(|d| Instant::now() + d);

        {
            let mut hb = self.shared.heartbeat.lock();
            hb.acknowledged = true;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return SocketVerdict::Shutdown,

                _ = maybe_sleep_until(next_beat) => {
                    if !self.shared.heartbeat.lock().acknowledged {
                        warn!("heartbeat went unacknowledged for a full interval; resuming");
                        return SocketVerdict::Resume;
                    }
                    if let Err(e) = self.send_heartbeat(client).await {
                        error!("heartbeat send failure: {e}");
                        return SocketVerdict::Resume;
                    }
                    next_beat = interval.map(|d| Instant::now() + d);
                },

                msg = client.recv_json::<Envelope>() => match msg {
                    Ok(Some(envelope)) => match GatewayEvent::try_from(envelope) {
                        Ok(event) => {
                            if let Some(verdict) =
                                self.process(client, event, &mut interval, &mut next_beat).await
                            {
                                return verdict;
                            }
                        },
                        Err(e) => warn!("undecodable gateway frame dropped: {e:?}"),
                    },
                    Ok(None) => {},
                    Err(WsError::Json(e)) => warn!("undecodable gateway frame dropped: {e:?}"),
                    Err(WsError::Closed(frame)) => {
                        let code = frame.as_ref().map(|f| f.code.into());
                        info!("gateway closed: {code:?}");

                        return match error::fatal_close(code) {
                            Some(fatal) => SocketVerdict::Fatal(fatal),
                            None => SocketVerdict::Resume,
                        };
                    },
                    Err(e) => {
                        error!("gateway socket error: {e}");
                        return SocketVerdict::Resume;
                    },
                },

                cmd = self.rx.recv_async() => {
                    if let Ok(cmd) = cmd {
                        if let Err(e) = self.send_command(client, cmd).await {
                            error!("outbound send failure: {e}");
                            return SocketVerdict::Resume;
                        }
                    }
                },
            }
        }
    }

    /// Handles one decoded event; `Some` ends the current socket.
    async fn process(
        &mut self,
        client: &mut WsClient,
        event: GatewayEvent,
        interval: &mut Option<Duration>,
        next_beat: &mut Option<Instant>,
    ) -> Option<SocketVerdict> {
        match event {
            GatewayEvent::Dispatch { seq, name, payload } => {
                if let Some(seq) = seq {
                    self.shared.observe_sequence(seq);
                }

                match name.as_str() {
                    crate::model::event::event_name::READY => {
                        match serde_json::from_str::<crate::model::gateway::Ready>(payload.get()) {
                            Ok(ready) => {
                                info!(session_id = %ready.session_id, "gateway is ready");

                                *self.shared.session_id.lock() = Some(ready.session_id);
                                *self.shared.resume_gateway_url.lock() =
                                    Some(ready.resume_gateway_url);
                                self.shared.set_stage(ConnectionStage::Ready);
                                self.router.set_bot_user(ready.user.id);
                            },
                            Err(e) => warn!("undecodable ready payload: {e:?}"),
                        }
                    },
                    crate::model::event::event_name::RESUMED => {
                        info!("gateway session resumed");
                        self.shared.set_stage(ConnectionStage::Ready);
                    },
                    _ => self.router.dispatch(&name, &payload, &self.handle()),
                }
            },
            GatewayEvent::Heartbeat => {
                // Answered immediately, out of band; the timer keeps its
                // own cadence.
                trace!("server requested an immediate heartbeat");
                if let Err(e) = self.send_heartbeat(client).await {
                    error!("heartbeat send failure: {e}");
                    return Some(SocketVerdict::Resume);
                }
            },
            GatewayEvent::HeartbeatAck => {
                trace!("heartbeat acknowledged");
                let mut hb = self.shared.heartbeat.lock();
                hb.last_ack = Some(Instant::now());
                hb.acknowledged = true;
            },
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect");
                return Some(SocketVerdict::Resume);
            },
            GatewayEvent::InvalidSession(resumable) => {
                info!(resumable, "session invalidated");
                return Some(if resumable {
                    SocketVerdict::Resume
                } else {
                    SocketVerdict::Reidentify
                });
            },
            GatewayEvent::Hello(hello) => {
                // Seen mid-loop only on the resume path (the resume frame
                // goes out before hello arrives).
                let d = Duration::from_millis(hello.heartbeat_interval);
                *interval = Some(d);
                *next_beat = Some(Instant::now() + d);
                debug!(interval_ms = hello.heartbeat_interval, "hello received");
            },
        }

        None
    }

    #[instrument(skip_all)]
    async fn send_heartbeat(&self, client: &mut WsClient) -> Result<(), Error> {
        let seq = match self.shared.sequence() {
            0 => None,
            seq => Some(seq),
        };
        trace!("sending heartbeat d: {seq:?}");

        client
            .send_json(&crate::model::event::OutboundHeartbeat::new(seq))
            .await?;

        let mut hb = self.shared.heartbeat.lock();
        hb.last_sent = Some(Instant::now());
        hb.acknowledged = false;

        Ok(())
    }

    async fn send_command(
        &self,
        client: &mut WsClient,
        command: SessionCommand,
    ) -> Result<(), Error> {
        match command {
            SessionCommand::UpdateVoiceState {
                guild_id,
                channel_id,
                self_mute,
                self_deaf,
            } => {
                debug!(%guild_id, ?channel_id, "sending voice state update");

                client
                    .send_json(&json!({
                        "op": Opcode::VoiceStateUpdate,
                        "d": {
                            "guild_id": guild_id,
                            "channel_id": channel_id,
                            "self_mute": self_mute,
                            "self_deaf": self_deaf,
                        },
                    }))
                    .await?;
            },
        }

        Ok(())
    }

    fn reset_identity(&self) {
        *self.shared.session_id.lock() = None;
        *self.shared.resume_gateway_url.lock() = None;
        self.shared.sequence.store(0, Ordering::Release);
        self.shared.set_stage(ConnectionStage::Disconnected);
    }
}

/// Sleeps until the deadline, or forever when no heartbeat is scheduled yet.
async fn maybe_sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
