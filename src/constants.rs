//! Constants affecting gateway and media behaviour.

use std::time::Duration;

/// The [User Agent] sent along with every REST request.
///
/// [User Agent]: https://discord.com/developers/docs/reference#user-agent
pub const USER_AGENT: &str = concat!("DiscordBot (bellbird, ", env!("CARGO_PKG_VERSION"), ")");

/// Sample rate of audio to be sent to Discord.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Number of samples in one complete frame of audio per channel.
///
/// This is equally the RTP timestamp increment between consecutive frames.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Maximum number of encoded frames buffered between the encoder and the
/// sender (one second of audio).
pub const AUDIO_CHANNEL_CAPACITY: usize = AUDIO_FRAME_RATE;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Opus silent frame, used to signal speech start and end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Number of silent frames sent to cover a speaking transition before the
/// sender lowers its speaking flag.
pub const MAX_SILENT_FRAMES: u8 = 5;

/// Delay between sends of UDP keepalive frames.
///
/// Passive monitoring of Discord itself shows that these fire every 5 seconds
/// irrespective of outgoing UDP traffic.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_millis(5_000);

/// Number of connection attempts made when dialing the control gateway.
pub const GATEWAY_DIAL_ATTEMPTS: u32 = 5;

/// Base delay of the exponential dial backoff (1s, 2s, 4s, 8s, 16s).
pub const GATEWAY_DIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Per-request timeout applied to interaction callbacks.
pub const INTERACTION_CALLBACK_TIMEOUT: Duration = Duration::from_secs(3);
