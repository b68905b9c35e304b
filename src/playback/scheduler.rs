//! Gapless cursor-based playback scheduling
//!
//! Chunks arrive faster or slower than real time; the scheduler keeps a
//! monotonic cursor of where the queued audio ends and places each new chunk
//! exactly there. While the stream keeps up, consecutive chunks butt against
//! each other with no gaps. When the stream falls behind (the cursor slips
//! into the past), the cursor snaps forward to "now" and playback resumes
//! immediately instead of accelerating to catch up.
//!
//! The scheduler is generic over a clock and a sink so the timing logic is
//! testable without an audio device.

use std::time::Duration;

use super::PlaybackError;

/// Sample rate of inbound agent audio (fixed by the backend)
pub const PCM_SAMPLE_RATE: u32 = 24_000;

/// Slack when deciding the queue has drained. Within this many seconds of the
/// cursor we consider the tail to be playing out.
const DRAIN_SLACK_SECS: f64 = 0.05;

/// How long the queue must stay drained before we call the response complete.
/// Absorbs the gap between sentences of one response.
const COMPLETE_DEBOUNCE: Duration = Duration::from_millis(600);

/// Minimum interval between per-chunk log lines
const CHUNK_LOG_INTERVAL_SECS: f64 = 0.25;

/// Monotonic time source for scheduling decisions.
pub trait PlaybackClock {
    /// Seconds since an arbitrary fixed origin
    fn now(&self) -> f64;
}

/// Where scheduled audio actually goes.
pub trait AudioSink {
    /// Queue samples to play immediately after everything already queued
    fn enqueue(&mut self, samples: Vec<f32>);
    /// Drop all queued audio
    fn clear(&mut self);
}

/// Playback lifecycle within one agent response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    /// Nothing queued, nothing playing
    Idle,
    /// First chunk of a response received, queue building
    Priming,
    /// Audio flowing
    Streaming,
    /// No new chunks, queued tail playing out
    Draining,
}

/// Placement of one chunk on the timeline, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledChunk {
    /// Start time on the clock's timeline (seconds)
    pub start: f64,
    /// Chunk duration in seconds
    pub duration: f64,
}

/// Cursor-based chunk scheduler.
pub struct PlaybackScheduler<C: PlaybackClock, S: AudioSink> {
    clock: C,
    sink: S,
    /// End time of the last queued chunk. NaN until the first chunk of a
    /// response arrives.
    cursor: f64,
    phase: PlaybackPhase,
    /// When the queue was first observed drained (for the completion
    /// debounce), in clock seconds
    drained_since: Option<f64>,
    last_chunk_log_at: f64,
    chunks_scheduled: u64,
}

impl<C: PlaybackClock, S: AudioSink> PlaybackScheduler<C, S> {
    pub fn new(clock: C, sink: S) -> Self {
        Self {
            clock,
            sink,
            cursor: f64::NAN,
            phase: PlaybackPhase::Idle,
            drained_since: None,
            last_chunk_log_at: f64::NEG_INFINITY,
            chunks_scheduled: 0,
        }
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.phase
    }

    /// Decode and schedule one inbound chunk.
    ///
    /// Returns the chunk's placement, or `None` for a zero-frame chunk (a
    /// keepalive; it must not disturb the cursor).
    pub fn handle_chunk(&mut self, payload: &str) -> Result<Option<ScheduledChunk>, PlaybackError> {
        let samples = super::decode_chunk(payload)?;
        if samples.is_empty() {
            return Ok(None);
        }

        let now = self.clock.now();
        let duration = samples.len() as f64 / PCM_SAMPLE_RATE as f64;

        // Catch up when starting fresh or when the stream fell behind
        // real time. Never reschedule already-queued audio.
        if !self.cursor.is_finite() || self.cursor < now {
            if self.cursor.is_finite() {
                log::debug!(
                    "Playback cursor behind by {:.0}ms, catching up",
                    (now - self.cursor) * 1000.0
                );
            }
            self.cursor = now;
        }

        let start = self.cursor;
        self.sink.enqueue(samples);
        self.cursor += duration;
        self.chunks_scheduled += 1;
        self.drained_since = None;

        self.phase = match self.phase {
            PlaybackPhase::Idle => PlaybackPhase::Priming,
            _ => PlaybackPhase::Streaming,
        };

        // Rate-limited; long chunks always log.
        if now - self.last_chunk_log_at >= CHUNK_LOG_INTERVAL_SECS || duration > 1.0 {
            log::debug!(
                "Scheduled chunk #{}: {:.0}ms at t={:.3} (queue ends t={:.3})",
                self.chunks_scheduled,
                duration * 1000.0,
                start,
                self.cursor
            );
            self.last_chunk_log_at = now;
        }

        Ok(Some(ScheduledChunk { start, duration }))
    }

    /// Poll for response completion. Call periodically (the client loop runs
    /// this on a 100ms tick).
    ///
    /// Returns `true` exactly once per response, after the queue has stayed
    /// drained for the debounce window.
    pub fn check_idle(&mut self) -> bool {
        if self.phase == PlaybackPhase::Idle {
            return false;
        }

        let now = self.clock.now();

        if !self.cursor.is_finite() || now < self.cursor - DRAIN_SLACK_SECS {
            // Queue still has audio ahead of now.
            self.drained_since = None;
            return false;
        }

        self.phase = PlaybackPhase::Draining;

        match self.drained_since {
            None => {
                self.drained_since = Some(now);
                false
            }
            Some(since) if now - since >= COMPLETE_DEBOUNCE.as_secs_f64() => {
                log::info!(
                    "Playback complete ({} chunks this response)",
                    self.chunks_scheduled
                );
                self.phase = PlaybackPhase::Idle;
                self.cursor = f64::NAN;
                self.drained_since = None;
                self.chunks_scheduled = 0;
                true
            }
            Some(_) => false,
        }
    }

    /// Discard everything queued and return to idle. Used on call end and on
    /// fatal stream errors.
    pub fn reset(&mut self) {
        self.sink.clear();
        self.cursor = f64::NAN;
        self.phase = PlaybackPhase::Idle;
        self.drained_since = None;
        self.chunks_scheduled = 0;
        log::debug!("Playback reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Clock whose time is set explicitly by the test
    #[derive(Clone)]
    struct MockClock(Rc<Cell<f64>>);

    impl MockClock {
        fn new() -> Self {
            MockClock(Rc::new(Cell::new(0.0)))
        }

        fn set(&self, t: f64) {
            self.0.set(t);
        }
    }

    impl PlaybackClock for MockClock {
        fn now(&self) -> f64 {
            self.0.get()
        }
    }

    /// Sink that records enqueue/clear calls
    #[derive(Default)]
    struct RecordingSink {
        enqueued: Vec<usize>,
        cleared: u32,
    }

    impl AudioSink for RecordingSink {
        fn enqueue(&mut self, samples: Vec<f32>) {
            self.enqueued.push(samples.len());
        }

        fn clear(&mut self) {
            self.cleared += 1;
        }
    }

    /// Base64 payload of `ms` milliseconds of silence at 24kHz
    fn chunk_ms(ms: u32) -> String {
        let frames = (PCM_SAMPLE_RATE * ms / 1000) as usize;
        BASE64.encode(vec![0u8; frames * 2])
    }

    fn scheduler(clock: MockClock) -> PlaybackScheduler<MockClock, RecordingSink> {
        PlaybackScheduler::new(clock, RecordingSink::default())
    }

    #[test]
    fn test_back_to_back_chunks_are_gapless() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        // Three 100ms chunks arrive instantly at t=0.
        let c1 = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();
        let c2 = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();
        let c3 = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();

        assert_eq!(c1.start, 0.0);
        assert!((c2.start - 0.1).abs() < 1e-9);
        assert!((c3.start - 0.2).abs() < 1e-9);
        // Each chunk starts exactly where the previous ends.
        assert!((c2.start - (c1.start + c1.duration)).abs() < 1e-9);
        assert!((c3.start - (c2.start + c2.duration)).abs() < 1e-9);
    }

    #[test]
    fn test_late_chunk_catches_up_to_now() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        let c1 = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();
        assert_eq!(c1.start, 0.0);

        // Queue drains at t=0.1; next chunk arrives at t=0.15.
        clock.set(0.15);
        let c2 = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();
        assert!((c2.start - 0.15).abs() < 1e-9);
        assert!((c2.start + c2.duration - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_first_chunk_starts_at_now() {
        let clock = MockClock::new();
        clock.set(42.5);
        let mut sched = scheduler(clock.clone());

        let c = sched.handle_chunk(&chunk_ms(50)).unwrap().unwrap();
        assert!((c.start - 42.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_frame_chunk_is_noop() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        assert!(sched.handle_chunk("").unwrap().is_none());
        assert_eq!(sched.phase(), PlaybackPhase::Idle);

        // Cursor untouched: the next real chunk starts at now.
        clock.set(1.0);
        let c = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();
        assert!((c.start - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_phase_transitions() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        assert_eq!(sched.phase(), PlaybackPhase::Idle);

        sched.handle_chunk(&chunk_ms(100)).unwrap();
        assert_eq!(sched.phase(), PlaybackPhase::Priming);

        sched.handle_chunk(&chunk_ms(100)).unwrap();
        assert_eq!(sched.phase(), PlaybackPhase::Streaming);
    }

    #[test]
    fn test_completion_is_debounced() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        sched.handle_chunk(&chunk_ms(100)).unwrap();

        // Still playing: no completion.
        clock.set(0.02);
        assert!(!sched.check_idle());

        // Drained, but debounce window not yet elapsed.
        clock.set(0.12);
        assert!(!sched.check_idle());
        assert_eq!(sched.phase(), PlaybackPhase::Draining);

        clock.set(0.5);
        assert!(!sched.check_idle());

        // Past the 600ms debounce from first drained observation (t=0.12).
        clock.set(0.75);
        assert!(sched.check_idle());
        assert_eq!(sched.phase(), PlaybackPhase::Idle);

        // Fires exactly once.
        clock.set(1.0);
        assert!(!sched.check_idle());
    }

    #[test]
    fn test_new_chunk_cancels_pending_completion() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        sched.handle_chunk(&chunk_ms(100)).unwrap();

        // Drained at t=0.2, debounce running.
        clock.set(0.2);
        assert!(!sched.check_idle());

        // Next sentence of the same response arrives before the debounce
        // elapses.
        clock.set(0.4);
        sched.handle_chunk(&chunk_ms(100)).unwrap();

        // Old drain observation must not count.
        clock.set(0.45);
        assert!(!sched.check_idle());

        clock.set(0.55);
        assert!(!sched.check_idle());
        clock.set(1.2);
        assert!(sched.check_idle());
    }

    #[test]
    fn test_reset_clears_sink_and_cursor() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        sched.handle_chunk(&chunk_ms(100)).unwrap();
        sched.handle_chunk(&chunk_ms(100)).unwrap();
        sched.reset();

        assert_eq!(sched.phase(), PlaybackPhase::Idle);
        assert_eq!(sched.sink.cleared, 1);

        // After reset the cursor restarts at now, not at the old queue end.
        clock.set(0.01);
        let c = sched.handle_chunk(&chunk_ms(100)).unwrap().unwrap();
        assert!((c.start - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_idle_scheduler_never_reports_complete() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock.clone());

        for t in [0.0, 1.0, 10.0] {
            clock.set(t);
            assert!(!sched.check_idle());
        }
    }

    #[test]
    fn test_decode_error_propagates() {
        let clock = MockClock::new();
        let mut sched = scheduler(clock);

        let result = sched.handle_chunk("!!not base64!!");
        assert!(matches!(result, Err(PlaybackError::DecodeFailure(_))));
        // Failed chunk leaves the timeline untouched.
        assert_eq!(sched.phase(), PlaybackPhase::Idle);
    }
}
