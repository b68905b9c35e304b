//! Chunk codec selection and opus encoding
//!
//! The backend accepts opus-coded chunks tagged with a mime label. Codec
//! support is probed once at initialization, in preference order; if nothing
//! in the list is available the call cannot start.
//!
//! Chunks are packetized opus: each 20 ms packet is prefixed with a u16 (BE)
//! length so the backend demuxer can split the chunk without container
//! overhead. The mime tag travels as the codec label the backend keys on.

use audiopus::coder::Encoder as OpusEncoder;
use audiopus::{Application, Channels, SampleRate as OpusSampleRate};

use super::CaptureError;

/// Codec preference order, most reliable for streaming first.
pub const PREFERRED_CODECS: [AudioCodec; 3] =
    [AudioCodec::OggOpus, AudioCodec::WebmOpus, AudioCodec::Webm];

/// Opus frame duration in milliseconds. 20 ms is the opus sweet spot for
/// speech.
const OPUS_FRAME_MS: usize = 20;

/// Opus encoding bitrate (bits/sec), tuned for voice.
const OPUS_BITRATE: i32 = 24_000;

/// Upper bound for one encoded opus packet.
const MAX_PACKET_BYTES: usize = 4000;

/// Chunk codecs the backend understands, identified by mime tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    OggOpus,
    WebmOpus,
    Webm,
}

impl AudioCodec {
    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioCodec::OggOpus => "audio/ogg;codecs=opus",
            AudioCodec::WebmOpus => "audio/webm;codecs=opus",
            AudioCodec::Webm => "audio/webm",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

/// Capability probe for the environment's encoders.
///
/// Trait seam so codec selection is testable against synthetic environments.
pub trait EncoderSupport {
    fn is_supported(&self, codec: AudioCodec) -> bool;
}

/// Real probe backed by the opus encoder.
///
/// All three codec labels carry opus in this client, so support collapses to
/// "can we construct an opus encoder for the capture rate".
pub struct OpusSupport;

impl EncoderSupport for OpusSupport {
    fn is_supported(&self, _codec: AudioCodec) -> bool {
        OpusEncoder::new(OpusSampleRate::Hz16000, Channels::Mono, Application::Voip).is_ok()
    }
}

/// Select the first supported codec in preference order.
///
/// Probed once at initialization, not per chunk.
pub fn select_codec(support: &dyn EncoderSupport) -> Result<AudioCodec, CaptureError> {
    for codec in PREFERRED_CODECS {
        if support.is_supported(codec) {
            log::info!("Chunk codec selected: {}", codec);
            return Ok(codec);
        }
    }
    Err(CaptureError::CodecUnsupported)
}

/// Encodes fixed-cadence PCM slices into transferable chunk bytes.
pub struct ChunkEncoder {
    codec: AudioCodec,
    opus: OpusEncoder,
    /// Samples per opus frame at the capture rate
    frame_samples: usize,
}

impl ChunkEncoder {
    /// Create an encoder for 16 kHz mono capture audio.
    pub fn new(codec: AudioCodec) -> Result<Self, CaptureError> {
        let mut opus = OpusEncoder::new(OpusSampleRate::Hz16000, Channels::Mono, Application::Voip)
            .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?;
        let _ = opus.set_bitrate(audiopus::Bitrate::BitsPerSecond(OPUS_BITRATE));

        Ok(Self {
            codec,
            opus,
            frame_samples: 16_000 * OPUS_FRAME_MS / 1000,
        })
    }

    pub fn mime_type(&self) -> &'static str {
        self.codec.mime_type()
    }

    /// Encode one capture slice into a self-contained chunk.
    ///
    /// The slice is split into 20 ms opus frames; a trailing partial frame is
    /// zero-padded. Each packet is length-prefixed (u16 BE).
    pub fn encode_chunk(&mut self, pcm: &[i16]) -> Result<Vec<u8>, CaptureError> {
        let mut chunk = Vec::with_capacity(pcm.len() / 4);
        let mut packet_buf = vec![0u8; MAX_PACKET_BYTES];

        for frame in pcm.chunks(self.frame_samples) {
            let written = if frame.len() == self.frame_samples {
                self.opus
                    .encode(frame, &mut packet_buf)
                    .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?
            } else {
                // Zero-pad the final partial frame to a full opus frame.
                let mut padded = frame.to_vec();
                padded.resize(self.frame_samples, 0);
                self.opus
                    .encode(&padded, &mut packet_buf)
                    .map_err(|e| CaptureError::EncodeFailed(e.to_string()))?
            };

            chunk.extend_from_slice(&(written as u16).to_be_bytes());
            chunk.extend_from_slice(&packet_buf[..written]);
        }

        Ok(chunk)
    }
}
