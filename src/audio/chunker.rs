//! Outbound audio chunking pipeline
//!
//! Bridges the CPAL audio callback (sync) to the transport channel (async).
//! Receives raw sample batches, resamples to the backend rate, slices at a
//! fixed cadence, encodes, and hands each chunk off as a fire-and-forget
//! `audio_stream` event.
//!
//! # Architecture
//!
//! ```text
//! Audio Thread (sync)               Tokio Runtime (async)
//! ┌──────────────────┐              ┌───────────────────────┐
//! │ CPAL Callback    │──channel──▶  │ AudioChunker::run()   │
//! │ try_send(samples)│              │   ├─ resample (16kHz) │
//! └──────────────────┘              │   ├─ slice (250ms)    │
//!                                   │   └─ encode + send    │
//!                                   └───────────────────────┘
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use super::codec::ChunkEncoder;
use crate::transport::ClientEvent;

/// Minimum interval between aggregate outbound-bytes log lines.
const BYTE_REPORT_INTERVAL_MS: u128 = 900;

/// Bounds for the slice cadence. Below one opus frame the slice accumulator
/// could never shrink; above one second the latency defeats a live call.
const MIN_SLICE_MS: u32 = 20;
const MAX_SLICE_MS: u32 = 1000;

/// Configuration for the chunker
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Negotiated sample rate from CPAL (typically 44100 or 48000)
    pub source_sample_rate: u32,
    /// Capture rate the backend ingests (16000)
    pub target_sample_rate: u32,
    /// Slice cadence in milliseconds. Smaller slices trade per-chunk overhead
    /// for lower end-to-end latency.
    pub slice_ms: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            source_sample_rate: 48_000,
            target_sample_rate: 16_000,
            slice_ms: 250,
        }
    }
}

impl ChunkerConfig {
    /// Samples per slice at the target sample rate.
    ///
    /// `slice_ms` comes from the settings file and the CLI, so it is clamped
    /// into the supported range rather than trusted.
    pub fn samples_per_slice(&self) -> usize {
        let slice_ms = self.slice_ms.clamp(MIN_SLICE_MS, MAX_SLICE_MS);
        (self.target_sample_rate as u64 * slice_ms as u64 / 1000) as usize
    }
}

/// Slices captured audio into encoded chunks and forwards them while a call
/// is active.
pub struct AudioChunker {
    config: ChunkerConfig,
    rx: mpsc::Receiver<Vec<i16>>,
    encoder: ChunkEncoder,
    outbound: mpsc::Sender<ClientEvent>,
    /// Call-active flag shared with the session layer; chunks produced while
    /// inactive are discarded (stop-in-flight race).
    call_active: Arc<AtomicBool>,
    voice: String,
    /// Accumulator for building full slices
    buffer: Vec<i16>,
    samples_per_slice: usize,
    chunks_sent: u64,
    /// Bytes emitted since the last aggregate report
    bytes_window: usize,
    last_byte_report: Instant,
}

impl AudioChunker {
    pub fn new(
        config: ChunkerConfig,
        rx: mpsc::Receiver<Vec<i16>>,
        encoder: ChunkEncoder,
        outbound: mpsc::Sender<ClientEvent>,
        call_active: Arc<AtomicBool>,
        voice: String,
    ) -> Self {
        if !(MIN_SLICE_MS..=MAX_SLICE_MS).contains(&config.slice_ms) {
            log::warn!(
                "Slice cadence {}ms out of range, clamping to {}-{}ms",
                config.slice_ms,
                MIN_SLICE_MS,
                MAX_SLICE_MS
            );
        }

        let samples_per_slice = config.samples_per_slice();
        log::info!(
            "Chunker: initialized ({}Hz → {}Hz, {}ms slices = {} samples, codec {})",
            config.source_sample_rate,
            config.target_sample_rate,
            config.slice_ms,
            samples_per_slice,
            encoder.mime_type()
        );

        Self {
            config,
            rx,
            encoder,
            outbound,
            call_active,
            voice,
            buffer: Vec::with_capacity(samples_per_slice * 2),
            samples_per_slice,
            chunks_sent: 0,
            bytes_window: 0,
            last_byte_report: Instant::now(),
        }
    }

    /// Run the chunking loop until the capture channel closes.
    ///
    /// Returns the number of chunks sent.
    pub async fn run(mut self) -> u64 {
        log::info!("Chunker: starting loop");

        while let Some(samples) = self.rx.recv().await {
            if !self.call_active.load(Ordering::SeqCst) {
                // No call in progress; drop silently and flush the slice
                // accumulator so a later call starts clean.
                self.buffer.clear();
                continue;
            }
            self.process_samples(samples);
        }

        log::info!("Chunker: loop complete, {} chunks sent", self.chunks_sent);
        self.chunks_sent
    }

    fn process_samples(&mut self, samples: Vec<i16>) {
        let resampled = resample(
            &samples,
            self.config.source_sample_rate,
            self.config.target_sample_rate,
        );

        self.buffer.extend(resampled);

        while self.buffer.len() >= self.samples_per_slice {
            self.emit_slice();
        }
    }

    /// Encode and send one slice. A failed encode or a full outbound queue
    /// is a dropped chunk - lost audio, acceptable for a live stream.
    fn emit_slice(&mut self) {
        let slice: Vec<i16> = self.buffer.drain(..self.samples_per_slice).collect();

        let encoded = match self.encoder.encode_chunk(&slice) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Chunker: encode failed, dropping slice: {}", e);
                return;
            }
        };

        let size = encoded.len();
        let event = ClientEvent::audio_stream(&encoded, &self.voice, self.encoder.mime_type());

        if self.outbound.try_send(event).is_err() {
            log::debug!("Chunker: outbound queue full, dropping chunk");
            return;
        }

        self.chunks_sent += 1;
        self.bytes_window += size;

        // Rate-limited observability; must never delay the send path.
        if self.last_byte_report.elapsed().as_millis() > BYTE_REPORT_INTERVAL_MS {
            log::debug!(
                "Chunker: sent {:.2} KB ({} chunks total)",
                self.bytes_window as f64 / 1024.0,
                self.chunks_sent
            );
            self.bytes_window = 0;
            self.last_byte_report = Instant::now();
        }
    }
}

/// Resample mono i16 audio from `source_rate` to `target_rate`.
///
/// Integer ratios (48kHz → 16kHz) use block averaging; anything else falls
/// back to linear interpolation.
pub fn resample(samples: &[i16], source_rate: u32, target_rate: u32) -> Vec<i16> {
    if target_rate == 0 || source_rate == 0 {
        log::warn!(
            "Invalid sample rate (source: {}, target: {}), returning original",
            source_rate,
            target_rate
        );
        return samples.to_vec();
    }

    if source_rate == target_rate {
        return samples.to_vec();
    }

    if source_rate % target_rate == 0 {
        let ratio = (source_rate / target_rate) as usize;
        return samples
            .chunks(ratio)
            .map(|chunk| {
                // i64 to prevent overflow with large chunks
                let sum: i64 = chunk.iter().map(|&s| s as i64).sum();
                (sum / chunk.len() as i64) as i16
            })
            .collect();
    }

    resample_linear(samples, source_rate, target_rate)
}

/// Linear-interpolation resampler for non-integer ratios (44.1kHz → 16kHz).
fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = src_idx - idx0 as f64;
        let s0 = input.get(idx0).copied().unwrap_or(0) as f64;
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0 as i16) as f64;
        output.push((s0 + frac * (s1 - s0)) as i16);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::{AudioCodec, ChunkEncoder};

    #[test]
    fn test_chunker_config_default() {
        let config = ChunkerConfig::default();
        assert_eq!(config.source_sample_rate, 48_000);
        assert_eq!(config.target_sample_rate, 16_000);
        assert_eq!(config.slice_ms, 250);
        // 16000 Hz * 250ms / 1000 = 4000 samples
        assert_eq!(config.samples_per_slice(), 4000);
    }

    #[test]
    fn test_slice_ms_is_clamped() {
        // Zero would make the slice accumulator undrainable.
        let config = ChunkerConfig {
            slice_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.samples_per_slice(), 320); // one 20ms opus frame

        // Huge values must neither overflow nor stall a live call.
        let config = ChunkerConfig {
            slice_ms: u32::MAX,
            ..Default::default()
        };
        assert_eq!(config.samples_per_slice(), 16_000); // 1s cap
    }

    #[tokio::test]
    async fn test_zero_slice_ms_does_not_stall_the_loop() {
        let (cap_tx, cap_rx) = tokio::sync::mpsc::channel::<Vec<i16>>(8);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(64);

        let encoder = ChunkEncoder::new(AudioCodec::OggOpus).unwrap();
        let chunker = AudioChunker::new(
            ChunkerConfig {
                source_sample_rate: 16_000,
                slice_ms: 0,
                ..Default::default()
            },
            cap_rx,
            encoder,
            out_tx,
            Arc::new(AtomicBool::new(true)),
            "es-ES-Female".to_string(),
        );

        // 3200 samples at the clamped 20ms cadence = ten slices; an
        // unclamped zero cadence would spin here forever.
        cap_tx.send(vec![0i16; 3200]).await.unwrap();
        drop(cap_tx);

        let sent = chunker.run().await;
        assert_eq!(sent, 10);
        while let Ok(event) = out_rx.try_recv() {
            match event {
                ClientEvent::AudioStream { size, .. } => assert!(size > 0),
                other => panic!("Expected AudioStream, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_resample_3x() {
        // 48kHz → 16kHz (3:1)
        let input = vec![100i16, 200, 300, 400, 500, 600];
        let output = resample(&input, 48_000, 16_000);

        assert_eq!(output.len(), 2);
        assert_eq!(output[0], 200); // (100 + 200 + 300) / 3
        assert_eq!(output[1], 500); // (400 + 500 + 600) / 3
    }

    #[test]
    fn test_resample_same_rate() {
        let input = vec![100i16, 200, 300];
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn test_resample_non_integer_ratio() {
        // 44.1kHz → 16kHz goes through linear interpolation
        let input: Vec<i16> = (0..441).map(|i| i as i16).collect();
        let output = resample(&input, 44_100, 16_000);
        assert_eq!(output.len(), 160);
        // Ramp input stays a (coarser) ramp
        assert!(output.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_resample_zero_rate() {
        let input = vec![100i16, 200, 300];
        assert_eq!(resample(&input, 48_000, 0), input);
        assert_eq!(resample(&input, 0, 16_000), input);
    }

    #[tokio::test]
    async fn test_inactive_call_discards_chunks() {
        let (cap_tx, cap_rx) = tokio::sync::mpsc::channel::<Vec<i16>>(8);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(8);
        let active = Arc::new(AtomicBool::new(false));

        let encoder = ChunkEncoder::new(AudioCodec::OggOpus).unwrap();
        let chunker = AudioChunker::new(
            ChunkerConfig {
                source_sample_rate: 16_000,
                ..Default::default()
            },
            cap_rx,
            encoder,
            out_tx,
            active,
            "es-ES-Female".to_string(),
        );

        // Two full slices of audio while the call is inactive.
        cap_tx.send(vec![0i16; 4000]).await.unwrap();
        cap_tx.send(vec![0i16; 4000]).await.unwrap();
        drop(cap_tx);

        let sent = chunker.run().await;
        assert_eq!(sent, 0);
        assert!(out_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_active_call_emits_chunks() {
        let (cap_tx, cap_rx) = tokio::sync::mpsc::channel::<Vec<i16>>(8);
        let (out_tx, mut out_rx) = tokio::sync::mpsc::channel(8);
        let active = Arc::new(AtomicBool::new(true));

        let encoder = ChunkEncoder::new(AudioCodec::OggOpus).unwrap();
        let chunker = AudioChunker::new(
            ChunkerConfig {
                source_sample_rate: 16_000,
                ..Default::default()
            },
            cap_rx,
            encoder,
            out_tx,
            active,
            "es-ES-Female".to_string(),
        );

        // 8000 samples at 16kHz = two 250ms slices.
        cap_tx.send(vec![0i16; 8000]).await.unwrap();
        drop(cap_tx);

        let sent = chunker.run().await;
        assert_eq!(sent, 2);

        for _ in 0..2 {
            match out_rx.try_recv().unwrap() {
                ClientEvent::AudioStream { size, voice, mime, .. } => {
                    assert!(size > 0);
                    assert_eq!(voice, "es-ES-Female");
                    assert_eq!(mime, "audio/ogg;codecs=opus");
                }
                other => panic!("Expected AudioStream, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_channel_close_ends_loop() {
        let (cap_tx, cap_rx) = tokio::sync::mpsc::channel::<Vec<i16>>(1);
        let (out_tx, _out_rx) = tokio::sync::mpsc::channel(1);

        let encoder = ChunkEncoder::new(AudioCodec::OggOpus).unwrap();
        let chunker = AudioChunker::new(
            ChunkerConfig::default(),
            cap_rx,
            encoder,
            out_tx,
            Arc::new(AtomicBool::new(true)),
            "es-ES-Female".to_string(),
        );

        drop(cap_tx);
        assert_eq!(chunker.run().await, 0);
    }
}
