//! Audio sources feeding the media pipeline.
//!
//! The pipeline consumes the [`AudioSource`] capability rather than a
//! concrete decoder, so the default ffmpeg subprocess can be swapped for an
//! in-memory source in tests (or an in-process encoder in other deployments).

mod child;
mod ffmpeg;
mod ogg;

use std::collections::VecDeque;
use std::io::Result as IoResult;

use async_trait::async_trait;
use bytes::Bytes;

pub use self::ffmpeg::{ffmpeg, FfmpegOpusSource};
pub use self::ogg::OggPacketReader;

/// A lazy, finite stream of encoded Opus frames, each spanning 20 ms of
/// audio (960 samples per channel at 48 kHz).
#[async_trait]
pub trait AudioSource: Send {
    /// Yields the next frame, or `Ok(None)` once the source is exhausted.
    async fn next_frame(&mut self) -> IoResult<Option<Bytes>>;

    /// Releases held resources. Must be safe to call more than once;
    /// called on pipeline cancellation.
    fn close(&mut self) {}
}

/// An in-memory source: hands out pre-encoded frames, then ends.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<Bytes>,
}

impl MemorySource {
    pub fn new<I>(frames: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl AudioSource for MemorySource {
    async fn next_frame(&mut self) -> IoResult<Option<Bytes>> {
        Ok(self.frames.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_source_drains_then_ends() {
        let mut source = MemorySource::new([vec![1u8, 2], vec![3u8]]);

        assert_eq!(source.next_frame().await.unwrap(), Some(Bytes::from_static(&[1, 2])));
        assert_eq!(source.next_frame().await.unwrap(), Some(Bytes::from_static(&[3])));
        assert_eq!(source.next_frame().await.unwrap(), None);
        assert_eq!(source.next_frame().await.unwrap(), None);
    }
}
