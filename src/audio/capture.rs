//! Microphone capture using CPAL
//!
//! Opens the default (or named) input device and forwards i16 samples to the
//! chunker over a bounded channel. The device is asked for mono 16 kHz; the
//! negotiated configuration is read back rather than assumed, and the chunker
//! downmixes/resamples when the device delivers something else. Echo
//! cancellation, noise suppression and gain control are owned by the OS input
//! pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tokio::sync::mpsc;

use super::CaptureError;

/// Sample rate we ask the device for (the backend ingests 16 kHz speech).
pub const REQUESTED_SAMPLE_RATE: u32 = 16_000;

/// List available input device names.
pub fn list_devices() -> Vec<String> {
    let host = cpal::default_host();
    let mut names = Vec::new();
    if let Ok(devices) = host.input_devices() {
        for dev in devices {
            if let Ok(name) = dev.name() {
                names.push(name);
            }
        }
    }
    names
}

/// Handle to an active capture stream.
///
/// Stopping is idempotent; dropping the handle tears down the CPAL stream.
pub struct CaptureHandle {
    _stream: Stream,
    running: Arc<AtomicBool>,
}

impl CaptureHandle {
    /// Stop forwarding samples. Safe to call more than once.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Capture stopped");
        }
    }
}

/// Microphone capture bound to one resolved input device.
pub struct MicCapture {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl MicCapture {
    /// Resolve the input device and read back its negotiated configuration.
    ///
    /// `device_name` of `None` uses the system default input.
    pub fn new(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.input_devices()
                .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| {
                    CaptureError::DeviceUnavailable(format!("input device not found: {name}"))
                })?
        } else {
            host.default_input_device()
                .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".into()))?
        };

        log::info!("Using audio input device: {:?}", device.name());

        let supported_config = device
            .default_input_config()
            .map_err(|_| CaptureError::NoSupportedConfig)?;

        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();

        // What we requested vs. what the platform negotiated. The chunker
        // adapts to the negotiated values.
        log::info!(
            "Audio config: requested {} Hz mono, negotiated {} Hz, {} channel(s), {:?}",
            REQUESTED_SAMPLE_RATE,
            config.sample_rate.0,
            config.channels,
            sample_format
        );

        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    /// Negotiated (sample_rate, channels) of the resolved device.
    pub fn negotiated(&self) -> (u32, u16) {
        (self.config.sample_rate.0, self.config.channels)
    }

    /// Start capturing. Mono-downmixed i16 sample batches are pushed to `tx`
    /// with `try_send`; a full queue drops the batch rather than blocking the
    /// audio callback.
    pub fn start(&self, tx: mpsc::Sender<Vec<i16>>) -> Result<CaptureHandle, CaptureError> {
        let running = Arc::new(AtomicBool::new(true));

        let stream = self.build_stream(tx, running.clone())?;

        stream.play().map_err(|e| {
            CaptureError::StreamCreationFailed(format!("Failed to start stream: {}", e))
        })?;

        log::info!("Capture started");

        Ok(CaptureHandle {
            _stream: stream,
            running,
        })
    }

    fn build_stream(
        &self,
        tx: mpsc::Sender<Vec<i16>>,
        running: Arc<AtomicBool>,
    ) -> Result<Stream, CaptureError> {
        let err_fn = |err| log::error!("Audio stream error: {}", err);

        match self.sample_format {
            SampleFormat::I16 => self.build_stream_typed::<i16>(tx, running, err_fn),
            SampleFormat::U16 => self.build_stream_typed::<u16>(tx, running, err_fn),
            SampleFormat::F32 => self.build_stream_typed::<f32>(tx, running, err_fn),
            _ => Err(CaptureError::NoSupportedConfig),
        }
    }

    fn build_stream_typed<T>(
        &self,
        tx: mpsc::Sender<Vec<i16>>,
        running: Arc<AtomicBool>,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static,
    ) -> Result<Stream, CaptureError>
    where
        T: cpal::Sample<Float = f32> + cpal::SizedSample + Send + 'static,
    {
        let config = self.config.clone();
        let channels = config.channels;

        let stream = self
            .device
            .build_input_stream(
                &config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }

                    let mono = downmix_to_i16(data, channels);

                    // Never block the audio callback; a full queue means the
                    // chunker fell behind and this batch is lost audio.
                    if tx.try_send(mono).is_err() {
                        log::debug!("Capture queue full, dropping batch");
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| CaptureError::StreamCreationFailed(e.to_string()))?;

        Ok(stream)
    }
}

/// Down-mix interleaved frames to mono and convert to i16.
fn downmix_to_i16<T: cpal::Sample<Float = f32>>(data: &[T], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return data.iter().map(|&s| sample_to_i16(s)).collect();
    }
    let ch = channels as usize;
    data.chunks_exact(ch)
        .map(|frame| {
            let sum: f32 = frame
                .iter()
                .map(|&s| {
                    let f: f32 = s.to_float_sample();
                    f
                })
                .sum();
            float_to_i16(sum / ch as f32)
        })
        .collect()
}

/// Convert any sample type to i16.
fn sample_to_i16<T: cpal::Sample<Float = f32>>(sample: T) -> i16 {
    let f32_sample: f32 = sample.to_float_sample();
    float_to_i16(f32_sample)
}

fn float_to_i16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    (clamped * i16::MAX as f32) as i16
}
