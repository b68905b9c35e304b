//! Voxdial: streaming voice-call client for a realtime speech agent
//!
//! The client captures microphone audio, streams it to the backend as small
//! opus chunks over a persistent WebSocket, and plays the agent's synthesized
//! replies back gaplessly as they arrive.
//!
//! # Module map
//!
//! - [`transport`] - wire protocol and the persistent channel
//! - [`audio`] - microphone capture, resampling, chunk encoding
//! - [`playback`] - inbound PCM decoding and cursor-scheduled output
//! - [`session`] - call lifecycle state machine (single-writer reducer)
//! - [`metrics`] - token usage, cost and latency telemetry
//! - [`client`] - the event loop tying everything together
//! - [`settings`] - persisted user configuration

pub mod audio;
pub mod client;
pub mod metrics;
pub mod playback;
pub mod session;
pub mod settings;
pub mod transport;

pub use client::{ClientError, VoiceClient};
pub use settings::AppSettings;
