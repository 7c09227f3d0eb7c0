//! A voice-capable Discord bot engine.
//!
//! The engine maintains one long-lived control-gateway session, routes the
//! dispatch events it cares about (interactions, messages, voice updates),
//! and brings up one voice session per guild on demand: a second WebSocket
//! to the guild's voice server, a UDP media path negotiated through IP
//! discovery, and a 20 ms-paced pipeline of AEAD-sealed RTP packets carrying
//! Opus audio from an `ffmpeg` subprocess.
//!
//! # Layout
//!
//! - [`gateway`]: the control-socket state machine and the event router.
//! - [`voice`]: per-guild sessions, the voice-gateway protocol, RTP framing
//!   and encryption, and the paced transmitter.
//! - [`input`]: audio sources; the default shells out to `ffmpeg`.
//! - [`http`]: a deliberately narrow REST facade.
//! - [`model`]: wire types for the control gateway and REST bodies.
//!
//! Construction is explicit: load a [`Config`], build an [`Http`] client and
//! a voice [`Manager`], hand them to a [`Session`], and run it under a
//! cancellation token rooted in your signal handler.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod constants;
mod error;
pub mod gateway;
pub mod http;
pub mod input;
pub mod model;
pub mod voice;
pub mod ws;

pub use crate::config::{AppEnv, Config};
pub use crate::error::{Error, Result};
pub use crate::gateway::{ConnectionStage, Session, SessionHandle};
pub use crate::http::Http;
pub use crate::voice::Manager;
