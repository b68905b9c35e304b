//! Client orchestration
//!
//! Owns the single-writer event loop: server events, capture reports and user
//! input all become [`CallEvent`]s, the reducer decides the transition, and
//! this module executes the resulting effects. Nothing outside this loop
//! mutates call state.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────────────────┐
//!  ctrl-c ───────▶│                            │───▶ effects: capture,
//!  server events ▶│  event loop  +  reduce()   │     playback, transport,
//!  capture ──────▶│                            │     metrics, status line
//!                 └────────────────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{
    select_codec, AudioChunker, CaptureError, CaptureHandle, ChunkEncoder, ChunkerConfig,
    MicCapture, OpusSupport,
};
use crate::metrics::UsageTracker;
use crate::playback::{PlaybackScheduler, RodioSink, StreamClock};
use crate::session::{reduce, CallEffect, CallEvent, CallState};
use crate::settings::AppSettings;
use crate::transport::{
    AgentChannel, ClientEvent, ServerEvent, StreamNotice, TransportError,
};

/// Queue depth between the chunker and the channel writer
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Queue depth between the audio callback and the chunker
const CAPTURE_QUEUE_DEPTH: usize = 32;

/// Cadence of the playback idle check and status refresh
const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum interval between inbound-chunk log lines
const INBOUND_LOG_INTERVAL: Duration = Duration::from_millis(600);

/// Top-level client errors. Anything here ends the process; recoverable
/// problems are logged and absorbed inside the loop.
#[derive(Debug)]
pub enum ClientError {
    Transport(TransportError),
    Capture(CaptureError),
    /// The session reached a state it cannot leave without user action
    Fatal(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "{}", e),
            ClientError::Capture(e) => write!(f, "{}", e),
            ClientError::Fatal(msg) => write!(f, "Call failed: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Transport(e)
    }
}

impl From<CaptureError> for ClientError {
    fn from(e: CaptureError) -> Self {
        ClientError::Capture(e)
    }
}

/// One transcript line, kept in arrival order for the session.
#[derive(Debug, Clone)]
struct TranscriptLine {
    at: chrono::DateTime<chrono::Utc>,
    speaker: &'static str,
    text: String,
}

/// One voice call, start to hang-up.
pub struct VoiceClient {
    settings: AppSettings,
}

impl VoiceClient {
    pub fn new(settings: AppSettings) -> Self {
        Self { settings }
    }

    /// Connect, run one call until ctrl-c or a fatal error, then tear down.
    pub async fn run(self) -> Result<(), ClientError> {
        let settings = self.settings;

        // Codec and device problems are fatal before anything is sent.
        let codec = select_codec(&OpusSupport)?;
        let capture = MicCapture::new(settings.input_device.as_deref())?;
        let (source_rate, channels) = capture.negotiated();
        log::info!(
            "Capture pipeline ready: {}Hz, {} channel(s), codec {}",
            source_rate,
            channels,
            codec
        );

        let mut channel = AgentChannel::connect(&settings.server_url).await?;
        let mut incoming = channel
            .take_incoming()
            .ok_or_else(|| TransportError::Disconnected("no incoming receiver".to_string()))?;

        // Configure the agent before the call starts.
        channel
            .send(&ClientEvent::VoiceSelect {
                voice: settings.voice.clone(),
            })
            .await?;
        if let Some(prompt) = &settings.prompt {
            channel
                .send(&ClientEvent::PromptSelect {
                    prompt: prompt.clone(),
                })
                .await?;
        }

        let call_active = Arc::new(AtomicBool::new(false));
        let (cap_tx, cap_rx) = mpsc::channel::<Vec<i16>>(CAPTURE_QUEUE_DEPTH);
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_QUEUE_DEPTH);

        let chunker = AudioChunker::new(
            ChunkerConfig {
                source_sample_rate: source_rate,
                target_sample_rate: 16_000,
                slice_ms: settings.capture_slice_ms,
            },
            cap_rx,
            ChunkEncoder::new(codec)?,
            out_tx,
            call_active.clone(),
            settings.voice.clone(),
        );
        let chunker_task = tokio::spawn(chunker.run());

        let mut loop_state = LoopState {
            state: CallState::default(),
            metrics: UsageTracker::new(),
            playback: None,
            capture_handle: None,
            capture: &capture,
            cap_tx,
            call_active,
            channel: &mut channel,
            settings: &settings,
            inbound_chunks: 0,
            last_inbound_log: Instant::now(),
            transcript: Vec::new(),
        };

        loop_state.dispatch(CallEvent::StartCall).await;
        if let CallState::Failed { message } = &loop_state.state {
            // Nothing was announced yet; dropping the channel closes the
            // socket.
            return Err(ClientError::Fatal(message.clone()));
        }

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let result = loop {
            tokio::select! {
                event = incoming.recv() => match event {
                    Some(event) => {
                        loop_state.handle_server_event(event).await;
                        if let CallState::Failed { message } = &loop_state.state {
                            break Err(ClientError::Fatal(message.clone()));
                        }
                    }
                    None => {
                        log::warn!("Connection to backend lost");
                        loop_state.dispatch(CallEvent::TransportDown).await;
                        break Err(ClientError::Transport(TransportError::Disconnected(
                            "channel closed".to_string(),
                        )));
                    }
                },

                Some(event) = out_rx.recv() => {
                    if let Err(e) = loop_state.channel.send(&event).await {
                        // A dropped chunk, not a fatal error; a dead socket
                        // also closes the read side and ends the loop there.
                        log::warn!("Failed to send outbound event: {}", e);
                    }
                }

                _ = tick.tick() => {
                    loop_state.on_tick().await;
                }

                _ = tokio::signal::ctrl_c() => {
                    log::info!("Hang-up requested");
                    loop_state.dispatch(CallEvent::EndCall).await;
                    break Ok(());
                }
            }
        };

        let transcript = std::mem::take(&mut loop_state.transcript);
        drop(loop_state);
        drop(out_rx);
        channel.disconnect().await;

        if !transcript.is_empty() {
            log::info!("Session transcript ({} lines):", transcript.len());
            for line in &transcript {
                log::info!("  [{}] {}: {}", line.at.to_rfc3339(), line.speaker, line.text);
            }
        }

        match chunker_task.await {
            Ok(chunks) => log::info!("Session closed ({} chunks streamed)", chunks),
            Err(e) => log::warn!("Chunker task failed: {}", e),
        }

        result
    }
}

/// Mutable state owned by the event loop.
struct LoopState<'a> {
    state: CallState,
    metrics: UsageTracker,
    /// Created on the first playback chunk; the output device stays closed
    /// until the agent actually speaks.
    playback: Option<PlaybackScheduler<StreamClock, RodioSink>>,
    capture_handle: Option<CaptureHandle>,
    capture: &'a MicCapture,
    cap_tx: mpsc::Sender<Vec<i16>>,
    call_active: Arc<AtomicBool>,
    channel: &'a mut AgentChannel,
    settings: &'a AppSettings,
    inbound_chunks: u64,
    last_inbound_log: Instant,
    /// Session transcript in arrival order
    transcript: Vec<TranscriptLine>,
}

impl LoopState<'_> {
    /// Run one event through the reducer, then execute effects. Effects may
    /// produce follow-up events (capture start reports back immediately), so
    /// this drains a queue rather than recursing.
    async fn dispatch(&mut self, event: CallEvent) {
        let mut pending = VecDeque::from([event]);

        while let Some(event) = pending.pop_front() {
            log::debug!("Call event: {:?}", event);

            let old_discriminant = std::mem::discriminant(&self.state);
            let (next, effects) = reduce(&self.state, event);
            let new_discriminant = std::mem::discriminant(&next);

            if old_discriminant != new_discriminant {
                log::info!("Call state: {:?} -> {:?}", self.state, next);
            }
            self.state = next;

            for effect in effects {
                if let Some(follow_up) = self.execute(effect).await {
                    pending.push_back(follow_up);
                }
            }
        }
    }

    async fn execute(&mut self, effect: CallEffect) -> Option<CallEvent> {
        match effect {
            CallEffect::StartCapture { id } => Some(self.start_capture(id)),
            CallEffect::StopCapture { id } => {
                self.call_active.store(false, Ordering::SeqCst);
                if let Some(handle) = self.capture_handle.take() {
                    handle.stop();
                    log::debug!("Capture torn down for call {}", id);
                }
                None
            }
            CallEffect::SendCallStarted { id } => {
                self.call_active.store(true, Ordering::SeqCst);
                self.metrics.call_started();
                let prompt = self.settings.prompt.as_deref().unwrap_or("default");
                let event = ClientEvent::call_started(&self.settings.voice, prompt);
                if let Err(e) = self.channel.send(&event).await {
                    log::warn!("Failed to announce call {}: {}", id, e);
                }
                None
            }
            CallEffect::SendCallEnded => {
                self.metrics.call_ended();
                if let Err(e) = self.channel.send(&ClientEvent::call_ended()).await {
                    log::warn!("Failed to announce call end: {}", e);
                }
                None
            }
            CallEffect::ResetPlayback => {
                if let Some(playback) = &mut self.playback {
                    playback.reset();
                }
                None
            }
            CallEffect::ResetMetrics => {
                self.metrics.reset();
                None
            }
            CallEffect::EmitStatus => {
                self.render_status();
                None
            }
        }
    }

    /// Bring up the microphone stream; reports success or failure back to the
    /// reducer as an event.
    fn start_capture(&mut self, id: Uuid) -> CallEvent {
        match self.capture.start(self.cap_tx.clone()) {
            Ok(handle) => {
                self.capture_handle = Some(handle);
                CallEvent::CaptureReady { id }
            }
            Err(e) => CallEvent::CaptureFailed {
                id,
                err: e.to_string(),
            },
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::CallReady => {
                log::info!("Backend ready");
                self.dispatch(CallEvent::CallReady).await;
            }

            ServerEvent::AudioPlayback { audio } => {
                self.handle_playback_chunk(&audio);
            }

            ServerEvent::UserTranscript { text } => {
                self.metrics.note_user_transcript();
                println!("you: {}", text);
                self.transcript.push(TranscriptLine {
                    at: chrono::Utc::now(),
                    speaker: "you",
                    text,
                });
            }

            ServerEvent::AgentResponse { text } => {
                if let Some(latency) = self.metrics.note_agent_response() {
                    log::info!("Response latency: {}ms", latency.as_millis());
                }
                println!("agent: {}", text);
                self.transcript.push(TranscriptLine {
                    at: chrono::Utc::now(),
                    speaker: "agent",
                    text,
                });
            }

            ServerEvent::AgentSpeaking => {
                log::debug!("Agent speaking");
            }

            ServerEvent::UsageUpdate { usage } => {
                self.metrics.apply(&usage);
                self.render_status();
            }

            ServerEvent::ConnectionInfo {
                model,
                region,
                voice,
                prompt,
            } => {
                log::info!(
                    "Backend session: model={} region={} voice={} prompt={}",
                    model.as_deref().unwrap_or("?"),
                    region.as_deref().unwrap_or("?"),
                    voice.as_deref().unwrap_or("?"),
                    prompt.as_deref().unwrap_or("?"),
                );
            }

            ServerEvent::StreamEvent { notice } => {
                self.handle_stream_notice(notice).await;
            }

            ServerEvent::Debug { message } => {
                log::debug!("Backend: {}", message);
            }

            ServerEvent::Error { message } => {
                log::error!("Backend error: {}", message);
            }

            ServerEvent::Unknown => {
                log::debug!("Ignoring unknown server event");
            }
        }
    }

    async fn handle_stream_notice(&mut self, notice: StreamNotice) {
        match notice {
            StreamNotice::StreamReconnecting {
                attempt,
                max_attempts,
                delay_seconds,
            } => {
                log::warn!(
                    "Backend reconnecting to upstream (attempt {}/{}, retry in {:.1}s)",
                    attempt,
                    max_attempts,
                    delay_seconds
                );
            }
            StreamNotice::StreamReconnected { attempt } => {
                log::info!("Backend upstream restored (attempt {})", attempt);
            }
            StreamNotice::StreamError { reason, fatal } => {
                if fatal {
                    log::error!("Fatal stream error: {}", reason);
                    self.dispatch(CallEvent::FatalStreamError { reason }).await;
                } else {
                    log::warn!("Stream error (recoverable): {}", reason);
                }
            }
        }
    }

    /// Decode and schedule one inbound audio chunk. A bad chunk is skipped;
    /// the next one plays.
    fn handle_playback_chunk(&mut self, audio: &str) {
        if self.playback.is_none() {
            match RodioSink::new() {
                Ok(sink) => {
                    self.playback = Some(PlaybackScheduler::new(StreamClock::new(), sink));
                }
                Err(e) => {
                    log::error!("Cannot play agent audio: {}", e);
                    return;
                }
            }
        }

        let playback = match &mut self.playback {
            Some(p) => p,
            None => return,
        };
        match playback.handle_chunk(audio) {
            Ok(Some(_)) => {
                self.inbound_chunks += 1;
                if self.last_inbound_log.elapsed() > INBOUND_LOG_INTERVAL {
                    log::debug!("Inbound audio: {} chunks scheduled", self.inbound_chunks);
                    self.last_inbound_log = Instant::now();
                }
            }
            Ok(None) => {}
            Err(e) => log::warn!("Skipping bad audio chunk: {}", e),
        }
    }

    async fn on_tick(&mut self) {
        if let Some(playback) = &mut self.playback {
            if playback.check_idle() {
                log::info!("Agent finished speaking");
            }
        }

        if matches!(self.state, CallState::InCall { .. }) && self.metrics.should_render() {
            self.render_status();
        }
    }

    fn render_status(&self) {
        let label = match &self.state {
            CallState::Idle => "idle",
            CallState::Arming { .. } => "connecting",
            CallState::InCall { .. } => "in call",
            CallState::Failed { .. } => "failed",
        };
        log::info!("[{}] {}", label, self.metrics.status_line());
    }
}
