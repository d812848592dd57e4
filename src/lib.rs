//! Operator console library for a speech-to-speech AI service.
//!
//! The core is a real-time streaming session engine: a WebSocket session
//! protocol state machine ([`core::session::S2sSession`]), a microphone
//! capture pipeline, a gap-free playback engine with barge-in, and the
//! transcript/usage/event-log bookkeeping reconstructed from the interleaved
//! event stream. A thin REST client ([`api::ConsoleApi`]) fetches the
//! configuration a session needs before connecting.

pub mod api;
pub mod config;
pub mod core;

pub use crate::config::{ConsoleConfig, ExchangeConfig};
pub use crate::core::audio::{AudioCapture, AudioPlayer, CaptureError, PlaybackError};
pub use crate::core::{ConnectionState, S2sSession, SessionError, SessionNotice};
