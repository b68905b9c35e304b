//! Wire protocol for the voice-agent channel
//!
//! Events are JSON objects tagged by an `event` field, mirroring the named
//! channels of the backend's pub/sub surface.
//!
//! # Protocol Overview
//!
//! 1. Connect to the backend WebSocket endpoint
//! 2. Send `voice_select` / `prompt_select` to configure the agent
//! 3. Send `call_started`, then stream `audio_stream` chunks
//! 4. Receive `audio_playback` PCM chunks plus transcripts and usage telemetry
//! 5. Send `call_ended` to close the session

use serde::{Deserialize, Serialize};

/// Default backend endpoint
pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000/stream";

// ============================================================================
// Client Events (sent TO the backend)
// ============================================================================

/// Events sent from client to the voice-agent backend
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// One encoded microphone chunk
    AudioStream {
        /// Base64-encoded chunk bytes
        audio: String,
        /// Capture timestamp (RFC 3339)
        timestamp: String,
        /// Encoded size in bytes
        size: usize,
        /// Selected voice profile code
        voice: String,
        /// Codec mime tag for the chunk bytes
        mime: String,
    },

    /// A call session is starting
    CallStarted {
        timestamp: String,
        voice: String,
        prompt: String,
    },

    /// The active call session ended
    CallEnded { timestamp: String },

    /// Switch the agent prompt profile
    PromptSelect { prompt: String },

    /// Switch the synthesis voice
    VoiceSelect { voice: String },
}

impl ClientEvent {
    /// Build an `audio_stream` event from encoded chunk bytes
    pub fn audio_stream(encoded: &[u8], voice: &str, mime: &str) -> Self {
        use base64::{engine::general_purpose::STANDARD, Engine};

        Self::AudioStream {
            audio: STANDARD.encode(encoded),
            timestamp: chrono::Utc::now().to_rfc3339(),
            size: encoded.len(),
            voice: voice.to_string(),
            mime: mime.to_string(),
        }
    }

    pub fn call_started(voice: &str, prompt: &str) -> Self {
        Self::CallStarted {
            timestamp: chrono::Utc::now().to_rfc3339(),
            voice: voice.to_string(),
            prompt: prompt.to_string(),
        }
    }

    pub fn call_ended() -> Self {
        Self::CallEnded {
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

// ============================================================================
// Server Events (received FROM the backend)
// ============================================================================

/// Token/cost usage payload attached to `usage_update` events
///
/// The backend either reports an authoritative running total or per-turn
/// increments; older backend revisions use the `*TokenCount` field names.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UsagePayload {
    pub input_tokens: Option<u64>,
    pub input_token_count: Option<u64>,
    pub output_tokens: Option<u64>,
    pub output_token_count: Option<u64>,
    pub speech_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub estimated_cost_usd: Option<f64>,
    pub cost_usd: Option<f64>,
}

impl UsagePayload {
    pub fn input(&self) -> u64 {
        self.input_tokens.or(self.input_token_count).unwrap_or(0)
    }

    pub fn output(&self) -> u64 {
        self.output_tokens.or(self.output_token_count).unwrap_or(0)
    }

    pub fn speech(&self) -> u64 {
        self.speech_tokens.unwrap_or(0)
    }

    pub fn cost(&self) -> Option<f64> {
        self.estimated_cost_usd.or(self.cost_usd)
    }
}

/// Stream-health notices forwarded by the backend while it manages its own
/// upstream connection
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamNotice {
    StreamReconnecting {
        #[serde(default)]
        attempt: u32,
        #[serde(default, rename = "maxAttempts")]
        max_attempts: u32,
        #[serde(default, rename = "delaySeconds")]
        delay_seconds: f64,
    },
    StreamReconnected {
        #[serde(default)]
        attempt: u32,
    },
    StreamError {
        #[serde(default)]
        reason: String,
        #[serde(default)]
        fatal: bool,
    },
}

/// Events received from the voice-agent backend
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The agent session is configured and listening
    CallReady,

    /// One chunk of synthesized speech (base64 PCM16 mono @ 24 kHz)
    AudioPlayback { audio: String },

    /// Final transcript of a user utterance
    UserTranscript { text: String },

    /// Agent reply text
    AgentResponse { text: String },

    /// The agent started synthesizing speech
    AgentSpeaking,

    /// Token/cost telemetry
    UsageUpdate {
        #[serde(flatten)]
        usage: UsagePayload,
    },

    /// Backend connection metadata echoed after configuration
    ConnectionInfo {
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        prompt: Option<String>,
    },

    /// Backend upstream-connection health notice
    StreamEvent {
        #[serde(flatten)]
        notice: StreamNotice,
    },

    /// Backend debug line for the local log
    Debug {
        #[serde(default)]
        message: String,
    },

    /// Backend error surfaced to the user
    Error {
        #[serde(default)]
        message: String,
    },

    /// Catch-all for event types we don't handle
    /// This prevents deserialization failures for unknown types
    #[serde(other)]
    Unknown,
}
