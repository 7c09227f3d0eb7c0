//! Bit-exact RTP and IP-discovery framing.
//!
//! Everything here is plain big-endian byte work: a 12-byte RTP header in
//! front of each sealed Opus frame, and the 74-byte discovery exchange used
//! to learn the client's external address before SELECT_PROTOCOL.

use super::error::{Error, Result};

/// Length of the RTP header preceding every voice packet.
pub const RTP_HEADER_LEN: usize = 12;

/// Byte 0 of every packet: RTP version 2, no padding/extension/CSRC.
pub const RTP_VERSION_FLAGS: u8 = 0x80;

/// Byte 1 of every packet: dynamic payload type 120 (Opus).
pub const RTP_PAYLOAD_TYPE: u8 = 0x78;

/// A decoded RTP header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RtpHeader {
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Writes the header into `buf`.
    pub fn write(&self, buf: &mut [u8; RTP_HEADER_LEN]) {
        buf[0] = RTP_VERSION_FLAGS;
        buf[1] = RTP_PAYLOAD_TYPE;
        buf[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
    }

    /// Parses the leading header of a voice packet.
    pub fn parse(buf: &[u8]) -> Option<RtpHeader> {
        if buf.len() < RTP_HEADER_LEN
            || buf[0] != RTP_VERSION_FLAGS
            || buf[1] != RTP_PAYLOAD_TYPE
        {
            return None;
        }

        Some(RtpHeader {
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

/// Total size of a discovery request or response.
pub const DISCOVERY_LEN: usize = 74;

const DISCOVERY_REQUEST: u16 = 0x0001;
const DISCOVERY_RESPONSE: u16 = 0x0002;
/// Length field value: everything after type+length.
const DISCOVERY_BODY_LEN: u16 = 70;
const DISCOVERY_ADDRESS_OFFSET: usize = 8;
const DISCOVERY_PORT_OFFSET: usize = 72;

/// Builds the 74-byte discovery request:
/// `0x0001 | 0x0046 | ssrc | address[64] | port`, all big-endian.
///
/// `address`/`port` echo the RTP server's own coordinates from READY; the
/// server only requires the ssrc, the rest is zero-padded.
pub fn discovery_request(ssrc: u32, address: &str, port: u16) -> [u8; DISCOVERY_LEN] {
    let mut packet = [0u8; DISCOVERY_LEN];

    packet[0..2].copy_from_slice(&DISCOVERY_REQUEST.to_be_bytes());
    packet[2..4].copy_from_slice(&DISCOVERY_BODY_LEN.to_be_bytes());
    packet[4..8].copy_from_slice(&ssrc.to_be_bytes());

    let raw = address.as_bytes();
    let len = raw.len().min(64);
    packet[DISCOVERY_ADDRESS_OFFSET..DISCOVERY_ADDRESS_OFFSET + len]
        .copy_from_slice(&raw[..len]);

    packet[DISCOVERY_PORT_OFFSET..].copy_from_slice(&port.to_be_bytes());

    packet
}

/// Parses a discovery response into the externally-visible `(address, port)`.
///
/// The address field is consumed as a null-terminated ASCII string starting
/// at byte 8. UDP contents are attacker-controlled, so nothing beyond the
/// first null is trusted.
pub fn parse_discovery_response(buf: &[u8]) -> Result<(String, u16)> {
    if buf.len() < DISCOVERY_LEN {
        return Err(Error::IllegalDiscoveryResponse);
    }

    let pkt_type = u16::from_be_bytes([buf[0], buf[1]]);
    if pkt_type != DISCOVERY_RESPONSE {
        return Err(Error::IllegalDiscoveryResponse);
    }

    let address_field = &buf[DISCOVERY_ADDRESS_OFFSET..DISCOVERY_PORT_OFFSET];
    let nul = address_field
        .iter()
        .position(|&b| b == 0)
        .ok_or(Error::IllegalIp)?;

    let address = std::str::from_utf8(&address_field[..nul])
        .map_err(|_| Error::IllegalIp)?
        .to_owned();
    if address.is_empty() {
        return Err(Error::IllegalIp);
    }

    let port = u16::from_be_bytes([buf[DISCOVERY_PORT_OFFSET], buf[DISCOVERY_PORT_OFFSET + 1]]);

    Ok((address, port))
}

/// Builds a discovery response (used by tests standing in for the server).
pub fn discovery_response(ssrc: u32, address: &str, port: u16) -> [u8; DISCOVERY_LEN] {
    let mut packet = discovery_request(ssrc, address, port);
    packet[0..2].copy_from_slice(&DISCOVERY_RESPONSE.to_be_bytes());

    packet
}

/// The 4-byte keepalive frame: just the SSRC, big-endian.
pub fn keepalive_packet(ssrc: u32) -> [u8; 4] {
    ssrc.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtp_header_round_trips() {
        let header = RtpHeader {
            sequence: 0xBEEF,
            timestamp: 0x0123_4567,
            ssrc: 0xDEAD_BEEF,
        };

        let mut buf = [0u8; RTP_HEADER_LEN];
        header.write(&mut buf);

        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x78);
        assert_eq!(RtpHeader::parse(&buf), Some(header));
    }

    #[test]
    fn rtp_header_rejects_foreign_packets() {
        assert_eq!(RtpHeader::parse(&[0x80, 0x78, 0, 1]), None);

        let mut buf = [0u8; RTP_HEADER_LEN];
        RtpHeader {
            sequence: 1,
            timestamp: 960,
            ssrc: 1,
        }
        .write(&mut buf);
        buf[1] = 0x79;

        assert_eq!(RtpHeader::parse(&buf), None);
    }

    #[test]
    fn discovery_request_layout() {
        let packet = discovery_request(0xDEAD_BEEF, "127.0.0.1", 50000);

        assert_eq!(packet.len(), 74);
        assert_eq!(&packet[0..2], &[0x00, 0x01]);
        assert_eq!(&packet[2..4], &[0x00, 0x46]);
        assert_eq!(&packet[4..8], &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&packet[8..17], b"127.0.0.1");
        assert_eq!(packet[17], 0);
        assert_eq!(&packet[72..74], &50000u16.to_be_bytes());
    }

    #[test]
    fn discovery_response_round_trips() {
        let packet = discovery_response(123, "203.0.113.9", 41234);
        let (address, port) = parse_discovery_response(&packet).unwrap();

        assert_eq!(address, "203.0.113.9");
        assert_eq!(port, 41234);
    }

    #[test]
    fn discovery_response_rejects_requests_and_runts() {
        let request = discovery_request(123, "127.0.0.1", 1);
        assert!(matches!(
            parse_discovery_response(&request),
            Err(Error::IllegalDiscoveryResponse)
        ));
        assert!(matches!(
            parse_discovery_response(&[0u8; 10]),
            Err(Error::IllegalDiscoveryResponse)
        ));

        let mut unterminated = discovery_response(1, "", 1);
        for b in &mut unterminated[8..72] {
            *b = b'9';
        }
        assert!(matches!(
            parse_discovery_response(&unterminated),
            Err(Error::IllegalIp)
        ));
    }
}
