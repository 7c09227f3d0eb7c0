//! Encryption schemes supported by the platform's secure RTP negotiation.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use super::error::{Error, Result};
use super::rtp::RTP_HEADER_LEN;

/// Length of the AEAD authentication tag appended to each sealed frame.
pub const TAG_SIZE: usize = 16;

/// Length of the session secret key supplied by SESSION_DESCRIPTION.
pub const KEY_SIZE: usize = 32;

/// Width of the XChaCha20 nonce.
pub const NONCE_SIZE: usize = 24;

/// Variants of the encryption scheme negotiated over SELECT_PROTOCOL.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Mode {
    /// The RTP header is used as the source of nonce bytes for the packet:
    /// the leading 12 nonce bytes are the header, the rest stay zero.
    XChaCha20Poly1305RtpSize,
}

impl Mode {
    /// Returns the name of a mode as it will appear during negotiation.
    pub fn to_request_str(self) -> &'static str {
        match self {
            Mode::XChaCha20Poly1305RtpSize => "aead_xchacha20_poly1305_rtpsize",
        }
    }

    fn from_request_str(name: &str) -> Option<Mode> {
        match name {
            "aead_xchacha20_poly1305_rtpsize" => Some(Mode::XChaCha20Poly1305RtpSize),
            _ => None,
        }
    }

    /// Picks a mode from the server's offer.
    ///
    /// Prefers [`Mode::XChaCha20Poly1305RtpSize`]; otherwise the first
    /// offered mode we implement wins. An offer with no implementable mode
    /// fails the handshake.
    pub fn negotiate<S: AsRef<str>>(offered: &[S]) -> Result<Mode> {
        let preferred = Mode::XChaCha20Poly1305RtpSize;

        if offered.iter().any(|m| m.as_ref() == preferred.to_request_str()) {
            return Ok(preferred);
        }

        offered
            .iter()
            .find_map(|m| Mode::from_request_str(m.as_ref()))
            .ok_or(Error::CryptoModeUnavailable)
    }
}

/// A sealed-up session cipher.
///
/// Construction requires the full SESSION_DESCRIPTION: encryption must not
/// begin before the platform has supplied both key and mode.
#[derive(Clone)]
pub struct Cipher {
    inner: XChaCha20Poly1305,
    mode: Mode,
}

impl Cipher {
    pub fn new(mode: Mode, secret_key: &[u8]) -> Result<Cipher> {
        if secret_key.len() != KEY_SIZE {
            return Err(Error::CryptoInvalidKey);
        }

        Ok(Cipher {
            inner: XChaCha20Poly1305::new(Key::from_slice(secret_key)),
            mode,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    fn nonce(rtp_header: &[u8; RTP_HEADER_LEN]) -> XNonce {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..RTP_HEADER_LEN].copy_from_slice(rtp_header);

        nonce.into()
    }

    /// Seals one Opus frame under the header-derived nonce, with no
    /// associated data. The result is ciphertext plus trailing tag.
    pub fn seal(&self, rtp_header: &[u8; RTP_HEADER_LEN], frame: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .encrypt(&Self::nonce(rtp_header), frame)
            .map_err(|_| Error::CryptoFailure)
    }

    /// Reverses [`Cipher::seal`]; exercised by tests and kept alongside seal
    /// so the two halves cannot drift apart.
    pub fn open(&self, rtp_header: &[u8; RTP_HEADER_LEN], sealed: &[u8]) -> Result<Vec<u8>> {
        self.inner
            .decrypt(
                &Self::nonce(rtp_header),
                Payload {
                    msg: sealed,
                    aad: b"",
                },
            )
            .map_err(|_| Error::CryptoFailure)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("mode", &self.mode).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::rtp::RtpHeader;

    fn fixed_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        for (i, b) in key.iter_mut().enumerate() {
            *b = i as u8;
        }
        key
    }

    #[test]
    fn negotiation_prefers_rtpsize() {
        let offered = vec![
            "aead_aes256_gcm_rtpsize".to_owned(),
            "aead_xchacha20_poly1305_rtpsize".to_owned(),
        ];

        assert_eq!(Mode::negotiate(&offered).unwrap(), Mode::XChaCha20Poly1305RtpSize);
    }

    #[test]
    fn negotiation_fails_without_supported_mode() {
        let offered = vec!["aead_aes256_gcm_rtpsize".to_owned()];

        assert!(matches!(Mode::negotiate(&offered), Err(Error::CryptoModeUnavailable)));
    }

    #[test]
    fn seal_produces_spec_framing() {
        let cipher = Cipher::new(Mode::XChaCha20Poly1305RtpSize, &fixed_key()).unwrap();

        let mut header = [0u8; RTP_HEADER_LEN];
        RtpHeader {
            sequence: 1,
            timestamp: 960,
            ssrc: 0xDEAD_BEEF,
        }
        .write(&mut header);

        assert_eq!(
            header,
            [0x80, 0x78, 0x00, 0x01, 0x00, 0x00, 0x03, 0xC0, 0xDE, 0xAD, 0xBE, 0xEF]
        );

        let frame = [0xAA_u8; 20];
        let sealed = cipher.seal(&header, &frame).unwrap();

        assert_eq!(sealed.len(), frame.len() + TAG_SIZE);
        assert_eq!(cipher.open(&header, &sealed).unwrap(), frame);
    }

    #[test]
    fn tampered_packet_fails_to_open() {
        let cipher = Cipher::new(Mode::XChaCha20Poly1305RtpSize, &fixed_key()).unwrap();

        let mut header = [0u8; RTP_HEADER_LEN];
        RtpHeader {
            sequence: 7,
            timestamp: 6720,
            ssrc: 1,
        }
        .write(&mut header);

        let mut sealed = cipher.seal(&header, b"opus").unwrap();
        sealed[0] ^= 0x01;

        assert!(cipher.open(&header, &sealed).is_err());
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(
            Cipher::new(Mode::XChaCha20Poly1305RtpSize, &[0u8; 16]),
            Err(Error::CryptoInvalidKey)
        ));
    }
}
