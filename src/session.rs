//! Call session state machine
//!
//! Single-writer pattern: all call lifecycle transitions go through the
//! `reduce()` function, which returns the next state and a list of effects
//! for the client loop to execute. Capture, transport and playback report
//! back as events; they never touch the state directly.

use std::time::Instant;
use uuid::Uuid;

/// Authoritative call state. All transitions go through the reducer.
#[derive(Debug, Clone)]
pub enum CallState {
    Idle,
    /// Start requested; waiting for the capture pipeline to come up
    Arming {
        call_id: Uuid,
    },
    InCall {
        call_id: Uuid,
        started_at: Instant,
    },
    /// A fatal setup or stream failure. Requires an explicit StartCall to
    /// leave.
    Failed {
        message: String,
    },
}

impl Default for CallState {
    fn default() -> Self {
        CallState::Idle
    }
}

/// Events that can trigger call transitions. Sent from the CLI, the capture
/// pipeline and the transport reader.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// User requested a call start
    StartCall,
    /// User requested hang-up
    EndCall,

    // Capture events (carry the call id to reject stale reports)
    CaptureReady {
        id: Uuid,
    },
    CaptureFailed {
        id: Uuid,
        err: String,
    },

    // Transport events
    /// Backend acknowledged the call
    CallReady,
    /// Backend reported an unrecoverable stream error
    FatalStreamError {
        reason: String,
    },
    /// The channel to the backend closed
    TransportDown,
}

/// Effects for the client loop to execute after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEffect {
    StartCapture { id: Uuid },
    StopCapture { id: Uuid },
    /// Announce the call to the backend
    SendCallStarted { id: Uuid },
    SendCallEnded,
    /// Flush any queued agent audio
    ResetPlayback,
    ResetMetrics,
    /// Re-render the status line
    EmitStatus,
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale call IDs
/// - Always emit EmitStatus after state changes
pub fn reduce(state: &CallState, event: CallEvent) -> (CallState, Vec<CallEffect>) {
    use CallEffect::*;
    use CallEvent::*;
    use CallState::*;

    let current_id: Option<Uuid> = match state {
        Idle => None,
        Arming { call_id } => Some(*call_id),
        InCall { call_id, .. } => Some(*call_id),
        Failed { .. } => None,
    };

    let is_stale = |eid: Uuid| Some(eid) != current_id;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, StartCall) => {
            let id = Uuid::new_v4();
            (
                Arming { call_id: id },
                vec![StartCapture { id }, EmitStatus],
            )
        }
        // Hang-up with no call in progress is a no-op, not an error.
        (Idle, EndCall) => (Idle, vec![]),

        // -----------------
        // Arming
        // -----------------
        (Arming { call_id }, CaptureReady { id }) if *call_id == id => (
            InCall {
                call_id: *call_id,
                started_at: Instant::now(),
            },
            vec![
                ResetMetrics,
                ResetPlayback,
                SendCallStarted { id },
                EmitStatus,
            ],
        ),
        (Arming { call_id }, CaptureFailed { id, err }) if *call_id == id => {
            (Failed { message: err }, vec![EmitStatus])
        }
        (Arming { call_id }, EndCall) => (
            Idle,
            // Stop capture in case it came up between the hang-up and
            // CaptureReady.
            vec![StopCapture { id: *call_id }, EmitStatus],
        ),
        (Arming { .. }, TransportDown) => (
            Failed {
                message: "Connection lost before call started".to_string(),
            },
            vec![EmitStatus],
        ),

        // -----------------
        // InCall
        // -----------------
        (InCall { call_id, .. }, EndCall) => (
            Idle,
            vec![
                StopCapture { id: *call_id },
                SendCallEnded,
                ResetPlayback,
                EmitStatus,
            ],
        ),
        (InCall { call_id, .. }, FatalStreamError { reason }) => (
            Failed { message: reason },
            vec![
                StopCapture { id: *call_id },
                SendCallEnded,
                ResetPlayback,
                EmitStatus,
            ],
        ),
        // The channel is gone; there is nobody to send call_ended to.
        (InCall { call_id, .. }, TransportDown) => (
            Idle,
            vec![StopCapture { id: *call_id }, ResetPlayback, EmitStatus],
        ),
        // Backend acknowledged the session; nothing to change, refresh the
        // status line.
        (InCall { .. }, CallReady) => (state.clone(), vec![EmitStatus]),

        // -----------------
        // Failed
        // -----------------
        // Mic/codec failures need operator attention; call initiation stays
        // blocked until the process is restarted.
        (Failed { .. }, StartCall) => (state.clone(), vec![EmitStatus]),

        // -----------------
        // Stale events (drop silently)
        // -----------------
        (_, CaptureReady { id }) if is_stale(id) => (state.clone(), vec![]),
        (_, CaptureFailed { id, .. }) if is_stale(id) => (state.clone(), vec![]),

        // -----------------
        // Unhandled: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}
