//! The per-session voice socket task.
//!
//! After the handshake, one task owns the voice WebSocket: it paces the
//! voice heartbeat, processes inbound events, relays speaking transitions
//! for the sender, and supervises the media-pipeline children.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::call::Status;
use super::crypto::Cipher;
use super::error::{close_action, CloseAction};
use super::event::{Envelope, Event};
use super::payload::{Heartbeat, Speaking};
use super::udp_tx::{encoder_runner, sender_runner, TransmitState};
use crate::constants::AUDIO_CHANNEL_CAPACITY;
use crate::input::AudioSource;
use crate::ws::{Error as WsError, WsClient};

/// Messages injected into the socket task.
pub(crate) enum WsCommand {
    /// Raise or lower the microphone flag (sent by the UDP sender on
    /// speech transitions).
    Speaking(bool),
    /// The sender hit a fatal media error; the session must go away.
    PipelineFailed,
    /// Replace the playing source (also starts the first pipeline).
    Play(Box<dyn AudioSource>),
    /// Stop playback, releasing the current pipeline.
    Stop,
}

/// Why the socket task returned.
#[derive(Debug)]
pub(crate) enum Verdict {
    /// The session token fired; the caller is already tearing down.
    Cancelled,
    /// Recoverable loss of the socket; redial and RESUME.
    Resume,
    /// The session is over (4006/4014, unrecoverable close, media failure).
    Teardown,
}

pub(crate) struct VoiceWs {
    client: WsClient,
    heartbeat_interval: Duration,
    ssrc: u32,
    udp: Arc<UdpSocket>,
    cipher: Cipher,
    transmit: Arc<TransmitState>,
    seq_ack: Arc<AtomicU64>,
    status: Arc<Mutex<Status>>,
    rx: Receiver<WsCommand>,
    tx: Sender<WsCommand>,
    cancel: CancellationToken,
    speaking: bool,
    heartbeat_outstanding: bool,
    pipeline: Option<Pipeline>,
}

struct Pipeline {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl VoiceWs {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        client: WsClient,
        heartbeat_interval: Duration,
        ssrc: u32,
        udp: Arc<UdpSocket>,
        cipher: Cipher,
        transmit: Arc<TransmitState>,
        seq_ack: Arc<AtomicU64>,
        status: Arc<Mutex<Status>>,
        rx: Receiver<WsCommand>,
        tx: Sender<WsCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            heartbeat_interval,
            ssrc,
            udp,
            cipher,
            transmit,
            seq_ack,
            status,
            rx,
            tx,
            cancel,
            speaking: true,
            heartbeat_outstanding: false,
            pipeline: None,
        }
    }

    /// Swaps in a fresh socket after a successful RESUME.
    pub(crate) fn replace_socket(&mut self, client: WsClient, heartbeat_interval: Duration) {
        self.client = client;
        self.heartbeat_interval = heartbeat_interval;
        self.heartbeat_outstanding = false;
    }

    pub(crate) async fn run(&mut self) -> Verdict {
        let mut next_beat = Instant::now() + self.heartbeat_interval;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.stop_pipeline().await;
                    return Verdict::Cancelled;
                },
                _ = sleep_until(next_beat) => {
                    if self.heartbeat_outstanding {
                        warn!("voice heartbeat went unacknowledged for a full interval");
                        return Verdict::Resume;
                    }
                    if let Err(e) = self.send_heartbeat().await {
                        error!("voice heartbeat send failure: {e:?}");
                        return Verdict::Resume;
                    }
                    next_beat = Instant::now() + self.heartbeat_interval;
                },
                msg = self.client.recv_json::<Envelope>() => match msg {
                    Ok(Some(envelope)) => {
                        if let Some(seq) = envelope.seq {
                            self.seq_ack.store(seq, Ordering::Release);
                        }
                        match envelope.into_event() {
                            Ok(event) => {
                                if let Some(verdict) = self.process(event) {
                                    return verdict;
                                }
                            },
                            Err(e) => warn!("undecodable voice payload dropped: {e:?}"),
                        }
                    },
                    Ok(None) => {},
                    Err(WsError::Json(e)) => warn!("unexpected voice json: {e:?}"),
                    Err(WsError::Closed(frame)) => {
                        let code = frame.as_ref().map(|f| f.code.into());
                        info!("voice gateway closed: {code:?}");

                        return match close_action(code) {
                            CloseAction::Resume => Verdict::Resume,
                            CloseAction::Teardown => Verdict::Teardown,
                            CloseAction::Fatal => {
                                error!("voice authentication rejected (close {code:?})");
                                Verdict::Teardown
                            },
                        };
                    },
                    Err(e) => {
                        error!("voice socket error: {e:?}");
                        return Verdict::Resume;
                    },
                },
                cmd = self.rx.recv_async() => match cmd {
                    Ok(WsCommand::Speaking(flag)) => {
                        if let Err(e) = self.send_speaking(flag).await {
                            error!("speaking update failed: {e:?}");
                            return Verdict::Resume;
                        }
                    },
                    Ok(WsCommand::PipelineFailed) => {
                        self.stop_pipeline().await;
                        return Verdict::Teardown;
                    },
                    Ok(WsCommand::Play(source)) => {
                        self.start_pipeline(source).await;
                        if !self.speaking {
                            if let Err(e) = self.send_speaking(true).await {
                                error!("speaking update failed: {e:?}");
                                return Verdict::Resume;
                            }
                        }
                    },
                    Ok(WsCommand::Stop) => {
                        self.stop_pipeline().await;
                        if let Err(e) = self.send_speaking(false).await {
                            error!("speaking update failed: {e:?}");
                            return Verdict::Resume;
                        }
                    },
                    Err(_) => {
                        // Every handle dropped; nothing can drive us anymore.
                        self.stop_pipeline().await;
                        return Verdict::Cancelled;
                    },
                },
            }
        }
    }

    fn process(&mut self, event: Event) -> Option<Verdict> {
        match event {
            Event::HeartbeatAck(ack) => {
                trace!("voice heartbeat ack for nonce {}", ack.t);
                self.heartbeat_outstanding = false;
            },
            Event::Speaking(ev) => {
                trace!("peer speaking update: {ev:?}");
            },
            Event::ClientsConnect(ev) => {
                debug!("clients connected to the channel: {:?}", ev.user_ids);
                *self.status.lock() = Status::Ready;
            },
            Event::ClientDisconnect(ev) => {
                info!("client disconnected from the channel: {}", ev.user_id);
            },
            Event::SessionDescription(_) => {
                warn!("mid-session re-key received; not supported, ignoring");
            },
            Event::Hello(hello) => {
                self.heartbeat_interval = Duration::from_secs_f64(hello.heartbeat_interval / 1000.0);
            },
            Event::Ignored(op) => {
                trace!("ignoring reserved opcode {op:?}");
            },
            other => {
                debug!("received other voice event: {:?}", other.kind());
            },
        }

        None
    }

    async fn send_heartbeat(&mut self) -> crate::ws::Result<()> {
        let nonce = unix_millis();
        trace!("sending voice heartbeat, nonce {nonce}");

        self.heartbeat_outstanding = true;
        self.client
            .send_json(&Event::from(Heartbeat {
                t: nonce,
                seq_ack: self.seq_ack.load(Ordering::Acquire),
            }))
            .await
    }

    async fn send_speaking(&mut self, flag: bool) -> crate::ws::Result<()> {
        if self.speaking == flag {
            return Ok(());
        }
        self.speaking = flag;
        info!("speaking -> {flag}");

        self.client
            .send_json(&Event::from(Speaking {
                speaking: flag as u8,
                delay: Some(0),
                ssrc: self.ssrc,
                user_id: None,
            }))
            .await
    }

    /// Replaces the running pipeline with a fresh encoder/sender pair.
    pub(crate) async fn start_pipeline(&mut self, source: Box<dyn AudioSource>) {
        self.stop_pipeline().await;

        let cancel = self.cancel.child_token();
        let (frame_tx, frame_rx) = flume::bounded(AUDIO_CHANNEL_CAPACITY);

        let tasks = vec![
            tokio::spawn(encoder_runner(source, frame_tx, cancel.clone())),
            tokio::spawn(sender_runner(
                Arc::clone(&self.udp),
                self.cipher.clone(),
                self.ssrc,
                Arc::clone(&self.transmit),
                frame_rx,
                self.tx.clone(),
                cancel.clone(),
            )),
        ];

        self.pipeline = Some(Pipeline { cancel, tasks });
    }

    /// Cancels the pipeline and joins both children; they exit within one
    /// transmit tick, so overlapping senders cannot reorder RTP sequence.
    pub(crate) async fn stop_pipeline(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.cancel.cancel();
            for task in pipeline.tasks {
                let _ = task.await;
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
