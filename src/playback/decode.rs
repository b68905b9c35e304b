//! Chunk payload decoding
//!
//! Inbound audio arrives as base64-encoded raw PCM16, little-endian, mono.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use super::PlaybackError;

/// Decode a base64 chunk payload into f32 samples in [-1.0, 1.0].
///
/// An odd trailing byte (a torn frame) is dropped; whole frames before it
/// still play. Invalid base64 fails the whole chunk.
pub fn decode_chunk(payload: &str) -> Result<Vec<f32>, PlaybackError> {
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| PlaybackError::DecodeFailure(e.to_string()))?;

    if bytes.len() % 2 != 0 {
        log::debug!(
            "Audio chunk has odd byte count ({}), dropping trailing byte",
            bytes.len()
        );
    }

    let frames = bytes.len() / 2;
    let mut samples = Vec::with_capacity(frames);
    for pair in bytes.chunks_exact(2) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(value as f32 / 32768.0);
    }

    Ok(samples)
}
