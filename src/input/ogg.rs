//! A minimal Ogg page reader, just enough to lift Opus packets out of an
//! `ffmpeg -f opus` stream.
//!
//! Pages are `"OggS" | version | header_type | granule(8) | serial(4) |
//! page_seq(4) | crc(4) | n_segments | segment_table | payload`; packets are
//! reassembled from lacing values, where a 255 lacing value continues the
//! packet into the next segment (possibly on the next page).

use std::collections::VecDeque;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const FLAG_EOS: u8 = 0x04;

pub struct OggPacketReader<R> {
    reader: R,
    /// Bytes of a packet continued across page boundaries.
    partial: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
    finished: bool,
}

impl<R: AsyncRead + Unpin + Send> OggPacketReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            partial: Vec::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// Yields the next whole packet, or `Ok(None)` at end of stream.
    pub async fn next_packet(&mut self) -> IoResult<Option<Vec<u8>>> {
        loop {
            if let Some(packet) = self.ready.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }

            self.read_page().await?;
        }
    }

    async fn read_page(&mut self) -> IoResult<()> {
        let mut header = [0u8; PAGE_HEADER_LEN];
        match self.reader.read_exact(&mut header).await {
            Ok(_) => {},
            // EOF on a page boundary is the normal end of the stream.
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                self.finished = true;
                return Ok(());
            },
            Err(e) => return Err(e),
        }

        if &header[0..4] != CAPTURE_PATTERN {
            return Err(IoError::new(ErrorKind::InvalidData, "bad ogg capture pattern"));
        }

        let header_type = header[5];
        let segment_count = header[26] as usize;

        let mut lacing = vec![0u8; segment_count];
        self.reader.read_exact(&mut lacing).await?;

        let payload_len: usize = lacing.iter().map(|&l| l as usize).sum();
        let mut payload = vec![0u8; payload_len];
        self.reader.read_exact(&mut payload).await?;

        trace!(segment_count, payload_len, "ogg page");

        let mut offset = 0;
        for &lace in &lacing {
            let lace = lace as usize;
            self.partial.extend_from_slice(&payload[offset..offset + lace]);
            offset += lace;

            if lace < 255 {
                self.ready.push_back(std::mem::take(&mut self.partial));
            }
        }

        if header_type & FLAG_EOS != 0 {
            self.finished = true;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serializes packets into one Ogg page, 255-laced as needed.
    fn page(packets: &[&[u8]], flags: u8) -> Vec<u8> {
        let mut lacing = Vec::new();
        let mut payload = Vec::new();
        for packet in packets {
            let mut remaining = packet.len();
            loop {
                let lace = remaining.min(255);
                lacing.push(lace as u8);
                remaining -= lace;
                if lace < 255 {
                    break;
                }
            }
            payload.extend_from_slice(packet);
        }

        let mut page = Vec::new();
        page.extend_from_slice(b"OggS");
        page.push(0);
        page.push(flags);
        page.extend_from_slice(&[0u8; 8]); // granule
        page.extend_from_slice(&[0u8; 4]); // serial
        page.extend_from_slice(&[0u8; 4]); // page seq
        page.extend_from_slice(&[0u8; 4]); // crc (unchecked)
        page.push(lacing.len() as u8);
        page.extend_from_slice(&lacing);
        page.extend_from_slice(&payload);
        page
    }

    #[tokio::test]
    async fn extracts_packets_from_pages() {
        let mut stream = page(&[b"OpusHead"], 0x02);
        stream.extend(page(&[b"OpusTags"], 0));
        stream.extend(page(&[b"frame-one", b"frame-two"], FLAG_EOS));

        let mut reader = OggPacketReader::new(&stream[..]);

        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"OpusHead");
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"OpusTags");
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"frame-one");
        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"frame-two");
        assert_eq!(reader.next_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn reassembles_packet_laced_across_segments() {
        let big = vec![0x5A_u8; 600];
        let stream = page(&[&big], FLAG_EOS);

        let mut reader = OggPacketReader::new(&stream[..]);

        assert_eq!(reader.next_packet().await.unwrap().unwrap(), big);
        assert_eq!(reader.next_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn eof_between_pages_ends_the_stream() {
        let stream = page(&[b"only"], 0);
        let mut reader = OggPacketReader::new(&stream[..]);

        assert_eq!(reader.next_packet().await.unwrap().unwrap(), b"only");
        assert_eq!(reader.next_packet().await.unwrap(), None);
    }

    #[tokio::test]
    async fn garbage_is_an_error() {
        let mut reader = OggPacketReader::new(&b"not an ogg stream at all..."[..]);

        assert!(reader.next_packet().await.is_err());
    }
}
