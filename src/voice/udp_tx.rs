//! The transmit side of the media pipeline.
//!
//! Two tasks per playing source: the encoder pump drains an [`AudioSource`]
//! into a bounded frame channel, and the sender drains that channel on a
//! 20 ms cadence, sealing each frame into an encrypted RTP packet.

use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use flume::{Receiver, Sender, TryRecvError};
use tokio::net::UdpSocket;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::crypto::Cipher;
use super::rtp::{keepalive_packet, RtpHeader, RTP_HEADER_LEN};
use super::ws_task::WsCommand;
use crate::constants::{
    MAX_SILENT_FRAMES, MONO_FRAME_SIZE, SILENT_FRAME, TIMESTEP_LENGTH, UDP_KEEPALIVE_GAP,
};
use crate::input::AudioSource;

/// RTP sequence/timestamp accounting for one voice session.
///
/// The sender is the single writer; other tasks may observe. Both counters
/// wrap by design: sequence mod 2^16, timestamp mod 2^32.
#[derive(Debug)]
pub struct TransmitState {
    sequence: AtomicU16,
    timestamp: AtomicU32,
}

impl TransmitState {
    /// Starts both counters at random points, as real RTP stacks do.
    pub fn new() -> Self {
        Self {
            sequence: AtomicU16::new(rand::random()),
            timestamp: AtomicU32::new(rand::random()),
        }
    }

    pub fn with_initial(sequence: u16, timestamp: u32) -> Self {
        Self {
            sequence: AtomicU16::new(sequence),
            timestamp: AtomicU32::new(timestamp),
        }
    }

    pub fn sequence(&self) -> u16 {
        self.sequence.load(Ordering::Acquire)
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp.load(Ordering::Acquire)
    }

    /// Current header values, then advance: sequence +1, timestamp +960.
    fn advance(&self, ssrc: u32) -> RtpHeader {
        RtpHeader {
            sequence: self.sequence.fetch_add(1, Ordering::AcqRel),
            timestamp: self.timestamp.fetch_add(MONO_FRAME_SIZE as u32, Ordering::AcqRel),
            ssrc,
        }
    }
}

impl Default for TransmitState {
    fn default() -> Self {
        Self::new()
    }
}

/// Pumps the source into the bounded frame channel.
///
/// Dropping the sender half is the pipeline's done signal. The source is
/// closed on every exit path.
pub(crate) async fn encoder_runner(
    mut source: Box<dyn AudioSource>,
    tx: Sender<Bytes>,
    cancel: CancellationToken,
) {
    debug!("encoder pump started");

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next_frame() => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                let send = tokio::select! {
                    _ = cancel.cancelled() => break,
                    send = tx.send_async(frame) => send,
                };

                if send.is_err() {
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!("audio source failed: {e:?}");
                break;
            },
        }
    }

    source.close();
    debug!("encoder pump finished");
}

/// The paced sender: one tick every 20 ms.
///
/// On each tick the next queued frame (real or interpolated silence) is
/// sealed and written to the UDP socket in a single send. When the channel
/// runs dry mid-speech, up to [`MAX_SILENT_FRAMES`] silence frames cover the
/// transition before the speaking flag drops. Idle ticks fall back to a
/// keepalive every five seconds so the NAT mapping survives.
pub(crate) async fn sender_runner(
    udp: Arc<UdpSocket>,
    cipher: Cipher,
    ssrc: u32,
    state: Arc<TransmitState>,
    frames: Receiver<Bytes>,
    ws_tx: Sender<WsCommand>,
    cancel: CancellationToken,
) {
    info!("udp transmit handle started");

    let mut ticker = interval(TIMESTEP_LENGTH);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut ka_time = Instant::now() + UDP_KEEPALIVE_GAP;
    let mut speaking = true;
    let mut silence_left = MAX_SILENT_FRAMES;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let frame = match frames.try_recv() {
            Ok(frame) => Some(frame),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        };

        match frame {
            Some(frame) => {
                if !speaking {
                    speaking = true;
                    silence_left = MAX_SILENT_FRAMES;
                    let _ = ws_tx.send(WsCommand::Speaking(true));
                }

                if let Err(e) = transmit(&udp, &cipher, ssrc, &state, &frame).await {
                    error!("fatal udp packet send error: {e:?}");
                    let _ = ws_tx.send(WsCommand::PipelineFailed);
                    break;
                }
                ka_time = Instant::now() + UDP_KEEPALIVE_GAP;
            },
            None if speaking => {
                if silence_left > 0 {
                    silence_left -= 1;
                    trace!("interpolating silence, {silence_left} left");

                    if let Err(e) = transmit(&udp, &cipher, ssrc, &state, &SILENT_FRAME).await {
                        error!("fatal udp packet send error: {e:?}");
                        let _ = ws_tx.send(WsCommand::PipelineFailed);
                        break;
                    }
                    ka_time = Instant::now() + UDP_KEEPALIVE_GAP;
                } else {
                    speaking = false;
                    let _ = ws_tx.send(WsCommand::Speaking(false));
                }
            },
            None => {
                if Instant::now() >= ka_time {
                    trace!("sending udp keepalive");
                    if let Err(e) = udp.send(&keepalive_packet(ssrc)).await {
                        error!("fatal udp keepalive send error: {e:?}");
                        let _ = ws_tx.send(WsCommand::PipelineFailed);
                        break;
                    }
                    ka_time += UDP_KEEPALIVE_GAP;
                }
            },
        }
    }

    info!("udp transmit handle stopped");
}

/// Seals one frame and writes header+ciphertext in one UDP send.
async fn transmit(
    udp: &UdpSocket,
    cipher: &Cipher,
    ssrc: u32,
    state: &TransmitState,
    frame: &[u8],
) -> Result<(), super::error::Error> {
    let mut header = [0u8; RTP_HEADER_LEN];
    state.advance(ssrc).write(&mut header);

    let sealed = cipher.seal(&header, frame)?;

    let mut packet = Vec::with_capacity(RTP_HEADER_LEN + sealed.len());
    packet.extend_from_slice(&header);
    packet.extend_from_slice(&sealed);

    udp.send(&packet).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_advance_and_wrap() {
        let state = TransmitState::with_initial(u16::MAX, u32::MAX - 100);

        let first = state.advance(1);
        assert_eq!(first.sequence, u16::MAX);
        assert_eq!(first.timestamp, u32::MAX - 100);

        let second = state.advance(1);
        assert_eq!(second.sequence, 0);
        assert_eq!(second.timestamp, (u32::MAX - 100).wrapping_add(960));
    }

    #[test]
    fn n_frames_obey_arithmetic_invariants() {
        let state = TransmitState::with_initial(17, 1000);
        let (seq_0, ts_0) = (state.sequence(), state.timestamp());

        for n in 0..70_000u32 {
            let header = state.advance(9);
            assert_eq!(header.sequence, (seq_0 as u32 + n) as u16);
            assert_eq!(header.timestamp, ts_0.wrapping_add(960 * n));
        }
    }
}
