//! A per-guild voice call.
//!
//! A call is created on `VOICE_STATE_UPDATE`, armed by `VOICE_SERVER_UPDATE`
//! (either arrival order works), and owns the session runner from the moment
//! both halves are known. Handles stay valid after removal from the manager;
//! operations on a removed call are inert.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::connection::{self, ConnectionInfo};
use super::manager::Manager;
use super::udp_tx::TransmitState;
use super::ws_task::{Verdict, VoiceWs, WsCommand};
use crate::input::AudioSource;
use crate::model::id::{GuildId, UserId};

/// Lifecycle state of one voice session.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Disconnected,
    Identifying,
    Ready,
}

/// Two-phase connection arming.
///
/// `VOICE_STATE_UPDATE` supplies the session id, `VOICE_SERVER_UPDATE` the
/// endpoint and token; dialing starts only once both have been applied.
#[derive(Clone, Debug)]
enum ConnectionProgress {
    Complete(ConnectionInfo),
    Incomplete(Partial),
}

#[derive(Clone, Debug, Default)]
struct Partial {
    endpoint: Option<String>,
    session_id: Option<String>,
    token: Option<String>,
}

impl Partial {
    fn finalise(&mut self, guild_id: GuildId, user_id: UserId) -> Option<ConnectionInfo> {
        if self.endpoint.is_some() && self.session_id.is_some() && self.token.is_some() {
            Some(ConnectionInfo {
                endpoint: self.endpoint.take().expect("checked above"),
                session_id: self.session_id.take().expect("checked above"),
                token: self.token.take().expect("checked above"),
                guild_id,
                user_id,
            })
        } else {
            None
        }
    }
}

struct CallState {
    progress: ConnectionProgress,
    runner_started: bool,
}

pub struct Call {
    guild_id: GuildId,
    user_id: UserId,
    voice_gateway_version: u8,
    /// Child of the process root; cancelling it stops every task the call
    /// owns. Monotone, it never un-cancels.
    cancel: CancellationToken,
    status: Arc<Mutex<Status>>,
    seq_ack: Arc<AtomicU64>,
    transmit: Arc<TransmitState>,
    control_tx: Sender<WsCommand>,
    control_rx: Receiver<WsCommand>,
    state: Mutex<CallState>,
}

impl Call {
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        session_id: String,
        voice_gateway_version: u8,
        cancel: CancellationToken,
    ) -> Arc<Call> {
        let (control_tx, control_rx) = flume::unbounded();

        Arc::new(Call {
            guild_id,
            user_id,
            voice_gateway_version,
            cancel,
            status: Arc::new(Mutex::new(Status::Disconnected)),
            seq_ack: Arc::new(AtomicU64::new(0)),
            transmit: Arc::new(TransmitState::new()),
            control_tx,
            control_rx,
            state: Mutex::new(CallState {
                progress: ConnectionProgress::Incomplete(Partial {
                    session_id: Some(session_id),
                    ..Partial::default()
                }),
                runner_started: false,
            }),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    fn set_status(&self, status: Status) {
        *self.status.lock() = status;
    }

    /// True once the call has been torn down (or removal began); a stale
    /// handle can be detected through this.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Applies the session id from a `VOICE_STATE_UPDATE`.
    pub fn apply_state_update(self: &Arc<Self>, manager: &Arc<Manager>, session_id: String) {
        if self.is_cancelled() {
            return;
        }

        let info = {
            let mut state = self.state.lock();
            match &mut state.progress {
                ConnectionProgress::Complete(info) => {
                    if info.session_id != session_id {
                        debug!("session id changed on a live call; keeping current session");
                    }
                    None
                },
                ConnectionProgress::Incomplete(partial) => {
                    partial.session_id = Some(session_id);
                    Self::try_finalise(self.guild_id, self.user_id, &mut state)
                },
            }
        };

        if let Some(info) = info {
            self.start_runner(manager, info);
        }
    }

    /// Arms the call with a `VOICE_SERVER_UPDATE` and begins dialing once
    /// both halves are present. Idempotent after the session exists.
    pub fn apply_server_update(
        self: &Arc<Self>,
        manager: &Arc<Manager>,
        endpoint: String,
        token: String,
    ) {
        if self.is_cancelled() {
            return;
        }

        let info = {
            let mut state = self.state.lock();
            match &mut state.progress {
                ConnectionProgress::Complete(_) => {
                    debug!("server update on a live call; keeping current session");
                    None
                },
                ConnectionProgress::Incomplete(partial) => {
                    partial.endpoint = Some(endpoint);
                    partial.token = Some(token);
                    Self::try_finalise(self.guild_id, self.user_id, &mut state)
                },
            }
        };

        if let Some(info) = info {
            self.start_runner(manager, info);
        }
    }

    fn try_finalise(
        guild_id: GuildId,
        user_id: UserId,
        state: &mut CallState,
    ) -> Option<ConnectionInfo> {
        let ConnectionProgress::Incomplete(partial) = &mut state.progress else {
            return None;
        };

        let info = partial.finalise(guild_id, user_id)?;
        state.progress = ConnectionProgress::Complete(info.clone());

        if state.runner_started {
            return None;
        }
        state.runner_started = true;

        Some(info)
    }

    fn start_runner(self: &Arc<Self>, manager: &Arc<Manager>, info: ConnectionInfo) {
        tokio::spawn(runner(Arc::clone(self), Arc::clone(manager), info));
    }

    /// Queues a source for playback; it replaces whatever is playing once
    /// the session is up.
    pub fn play(&self, source: Box<dyn AudioSource>) {
        if self.is_cancelled() {
            return;
        }

        let _ = self.control_tx.send(WsCommand::Play(source));
    }

    /// Stops playback, leaving the session connected.
    pub fn stop(&self) {
        if self.is_cancelled() {
            return;
        }

        let _ = self.control_tx.send(WsCommand::Stop);
    }

    /// RTP counters, observable for diagnostics; the sender is the single
    /// writer.
    pub fn transmit_state(&self) -> &TransmitState {
        &self.transmit
    }
}

impl std::fmt::Debug for Call {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Call")
            .field("guild_id", &self.guild_id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Drives one voice session from dial to teardown.
///
/// Recoverable socket losses loop back through RESUME; anything else ends
/// the session. Every exit path cancels the call's children and removes the
/// guild's manager entry.
#[instrument(skip_all, fields(guild_id = %call.guild_id))]
async fn runner(call: Arc<Call>, manager: Arc<Manager>, info: ConnectionInfo) {
    call.set_status(Status::Identifying);

    let negotiated = tokio::select! {
        _ = call.cancel.cancelled() => None,
        result = connection::connect(&info, call.voice_gateway_version) => match result {
            Ok(negotiated) => Some(negotiated),
            Err(e) => {
                error!("voice connection failed: {e}");
                None
            },
        },
    };

    if let Some(negotiated) = negotiated {
        info!(
            address = %negotiated.external_address.0,
            port = negotiated.external_address.1,
            "voice session up",
        );
        call.set_status(Status::Ready);

        let mut ws = VoiceWs::new(
            negotiated.client,
            negotiated.heartbeat_interval,
            negotiated.ssrc,
            negotiated.udp,
            negotiated.cipher,
            Arc::clone(&call.transmit),
            Arc::clone(&call.seq_ack),
            Arc::clone(&call.status),
            call.control_rx.clone(),
            call.control_tx.clone(),
            call.cancel.clone(),
        );

        loop {
            match ws.run().await {
                Verdict::Cancelled | Verdict::Teardown => break,
                Verdict::Resume => {
                    call.set_status(Status::Identifying);

                    let seq_ack = call.seq_ack.load(std::sync::atomic::Ordering::Acquire);
                    let resumed = tokio::select! {
                        _ = call.cancel.cancelled() => None,
                        result = connection::resume(&info, call.voice_gateway_version, seq_ack) => {
                            result.map_err(|e| error!("voice resume failed: {e}")).ok()
                        },
                    };

                    match resumed {
                        Some((client, interval)) => {
                            ws.replace_socket(client, interval);
                            call.set_status(Status::Ready);
                        },
                        None => break,
                    }
                },
            }
        }

        ws.stop_pipeline().await;
    }

    // Teardown: stop children, then drop out of the manager. Removal is
    // idempotent, so racing an empty-channel update is harmless.
    call.cancel.cancel();
    call.set_status(Status::Disconnected);
    manager.remove(call.guild_id);

    info!("voice session finished");
}
