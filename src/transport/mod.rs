//! Transport layer for the voice-agent backend
//!
//! This module provides the persistent WebSocket channel that carries the
//! call: encoded microphone chunks and call-control events go out, synthesized
//! PCM audio and telemetry events come back.
//!
//! # Architecture
//!
//! ```text
//! Capture Pipeline ──ClientEvent──▶ AgentChannel ──JSON──▶ backend
//!                                       │
//!                                       ▼ (reader task)
//!                              mpsc<ServerEvent> ──▶ client loop
//! ```
//!
//! # Connection Strategy
//!
//! Initial connection retries 3 times with exponential backoff (1s, 2s, 4s).
//! Mid-call disconnects are NOT retried by the client - the backend owns
//! reconnection and reports it via `stream_event`; the client just force-ends
//! the active call when the channel dies.

mod channel;
mod protocol;

pub use channel::AgentChannel;
pub use protocol::{
    ClientEvent, ServerEvent, StreamNotice, UsagePayload, DEFAULT_SERVER_URL,
};

/// Errors that can occur on the transport channel
#[derive(Debug, Clone)]
pub enum TransportError {
    /// Failed to establish the WebSocket connection
    ConnectionFailed(String),
    /// A frame could not be serialized or parsed
    ProtocolError(String),
    /// Connection was closed unexpectedly
    Disconnected(String),
    /// Failed to send an event
    SendFailed(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::ConnectionFailed(e) => {
                write!(f, "Failed to connect to voice agent backend: {}", e)
            }
            TransportError::ProtocolError(e) => {
                write!(f, "Channel protocol error: {}", e)
            }
            TransportError::Disconnected(e) => {
                write!(f, "Channel disconnected: {}", e)
            }
            TransportError::SendFailed(e) => {
                write!(f, "Failed to send event: {}", e)
            }
        }
    }
}

impl std::error::Error for TransportError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = TransportError::Disconnected("server closed".to_string());
        assert!(err.to_string().contains("server closed"));
    }
}
