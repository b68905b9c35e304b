//! Agent audio playback
//!
//! Receives base64 PCM16 chunks from the transport and plays them back
//! gaplessly using a cursor-scheduled queue.
//!
//! # Architecture
//!
//! ```text
//! ServerEvent::AudioPlayback
//!         │
//!         ▼
//! ┌───────────────┐    ┌─────────────────────┐    ┌──────────────┐
//! │ decode (b64 → │───▶│ PlaybackScheduler   │───▶│ AudioSink    │
//! │ PCM16 → f32)  │    │ (cursor, phases)    │    │ (rodio)      │
//! └───────────────┘    └─────────────────────┘    └──────────────┘
//! ```

pub mod decode;
pub mod output;
pub mod scheduler;

pub use decode::decode_chunk;
pub use output::{RodioSink, StreamClock};
pub use scheduler::{
    AudioSink, PlaybackClock, PlaybackPhase, PlaybackScheduler, PCM_SAMPLE_RATE,
};

/// Errors that can occur in the playback path.
///
/// Per-chunk failures are logged and skipped; the stream continues with the
/// next chunk.
#[derive(Debug, Clone)]
pub enum PlaybackError {
    /// Chunk payload could not be decoded (bad base64)
    DecodeFailure(String),
    /// The output device could not be opened
    SinkUnavailable(String),
}

impl std::fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackError::DecodeFailure(e) => write!(f, "Failed to decode audio chunk: {}", e),
            PlaybackError::SinkUnavailable(e) => write!(f, "Audio output unavailable: {}", e),
        }
    }
}

impl std::error::Error for PlaybackError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playback_error_display() {
        let err = PlaybackError::DecodeFailure("invalid padding".to_string());
        assert!(err.to_string().contains("invalid padding"));

        let err = PlaybackError::SinkUnavailable("no output device".to_string());
        assert!(err.to_string().contains("no output device"));
    }
}
