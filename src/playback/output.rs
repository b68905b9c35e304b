//! Real clock and sink implementations backing the scheduler
//!
//! The rodio sink plays queued buffers back to back, which is exactly the
//! gapless contract the scheduler needs; the cursor tracks where that queue
//! ends on the wall clock.

use std::time::Instant;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};

use super::scheduler::{AudioSink, PlaybackClock, PCM_SAMPLE_RATE};
use super::PlaybackError;

/// Monotonic clock anchored at construction time.
pub struct StreamClock {
    origin: Instant,
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for StreamClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Speaker output via rodio.
///
/// Holds the output stream handle for the life of the sink; dropping it tears
/// down the device.
pub struct RodioSink {
    // Must outlive the sink or playback stops.
    _stream: OutputStream,
    handle: OutputStreamHandle,
    sink: Sink,
}

impl RodioSink {
    /// Open the default output device.
    pub fn new() -> Result<Self, PlaybackError> {
        let (stream, handle) =
            OutputStream::try_default().map_err(|e| PlaybackError::SinkUnavailable(e.to_string()))?;
        let sink =
            Sink::try_new(&handle).map_err(|e| PlaybackError::SinkUnavailable(e.to_string()))?;

        log::info!("Audio output opened ({}Hz mono playback)", PCM_SAMPLE_RATE);

        Ok(Self {
            _stream: stream,
            handle,
            sink,
        })
    }
}

impl AudioSink for RodioSink {
    fn enqueue(&mut self, samples: Vec<f32>) {
        self.sink
            .append(SamplesBuffer::new(1, PCM_SAMPLE_RATE, samples));
        // No-op when already playing; resumes after a stop().
        self.sink.play();
    }

    fn clear(&mut self) {
        // stop() drops everything queued. Rebuild the sink so the next
        // enqueue starts clean.
        self.sink.stop();
        match Sink::try_new(&self.handle) {
            Ok(sink) => self.sink = sink,
            Err(e) => log::warn!("Failed to rebuild audio sink after clear: {}", e),
        }
    }
}
