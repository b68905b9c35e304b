//! Microphone capture pipeline
//!
//! Turns a live microphone stream into a steady sequence of small encoded
//! chunks handed to the transport, only while a call is active. Uses CPAL for
//! capture and audiopus for chunk encoding.

pub mod capture;
pub mod chunker;
pub mod codec;

pub use capture::{CaptureHandle, MicCapture};
pub use chunker::{AudioChunker, ChunkerConfig};
pub use codec::{select_codec, AudioCodec, ChunkEncoder, EncoderSupport, OpusSupport};

/// Errors that can occur in the capture pipeline.
#[derive(Debug, Clone)]
pub enum CaptureError {
    /// Microphone cannot be acquired (permission, hardware). Fatal to call
    /// start; never retried automatically.
    DeviceUnavailable(String),
    /// The input device offers no configuration we can stream from
    NoSupportedConfig,
    /// No acceptable chunk codec is available. Fatal to call start.
    CodecUnsupported,
    StreamCreationFailed(String),
    EncodeFailed(String),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::DeviceUnavailable(e) => {
                write!(f, "Microphone unavailable: {}", e)
            }
            CaptureError::NoSupportedConfig => {
                write!(f, "No supported audio input configuration")
            }
            CaptureError::CodecUnsupported => {
                write!(f, "No supported audio codec for streaming (opus required)")
            }
            CaptureError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
            CaptureError::EncodeFailed(e) => write!(f, "Failed to encode audio chunk: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}
