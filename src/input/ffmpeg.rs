//! Opens an audio file through `ffmpeg` and exposes it as an
//! [`AudioSource`] of Opus frames.

use std::io::Result as IoResult;
use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::BufReader;
use tokio::process::ChildStdout;
use tracing::debug;

use super::child::ChildContainer;
use super::ogg::OggPacketReader;
use super::AudioSource;

/// Container packets that describe the stream rather than carry audio.
const OPUS_HEAD: &[u8] = b"OpusHead";
const OPUS_TAGS: &[u8] = b"OpusTags";

/// An ffmpeg subprocess transcoding a named source to 48 kHz stereo Opus,
/// streamed out as Ogg and unpacked into per-frame packets.
pub struct FfmpegOpusSource {
    child: ChildContainer,
    packets: OggPacketReader<BufReader<ChildStdout>>,
}

/// Spawns `ffmpeg -i <source> -ac 2 -ar 48000 -c:a libopus -f opus -`.
pub fn ffmpeg<P: AsRef<Path>>(source: P) -> IoResult<FfmpegOpusSource> {
    let source = source.as_ref();

    let path = source.to_str().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "non-utf8 media path")
    })?;

    let (child, stdout) = ChildContainer::spawn(
        "ffmpeg",
        &[
            "-i", path, "-ac", "2", "-ar", "48000", "-c:a", "libopus", "-f", "opus", "-",
        ],
    )?;

    debug!(%path, "spawned ffmpeg encoder");

    Ok(FfmpegOpusSource {
        child,
        packets: OggPacketReader::new(BufReader::new(stdout)),
    })
}

#[async_trait]
impl AudioSource for FfmpegOpusSource {
    async fn next_frame(&mut self) -> IoResult<Option<Bytes>> {
        loop {
            let packet = match self.packets.next_packet().await? {
                Some(packet) => packet,
                None => return Ok(None),
            };

            if packet.starts_with(OPUS_HEAD) || packet.starts_with(OPUS_TAGS) {
                continue;
            }

            return Ok(Some(Bytes::from(packet)));
        }
    }

    fn close(&mut self) {
        self.child.kill();
    }
}
