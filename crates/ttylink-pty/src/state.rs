//! Shared session state.
//!
//! Three independent locks, never held across blocking I/O:
//! - the state lock guards the phase and its bookkeeping,
//! - the queue lock guards the drain buffer,
//! - the write lock serializes descriptor writes, so a cancel write never
//!   races an in-flight command write.
//!
//! The reader thread and the caller share only these locks plus the liveness
//! flag; the master descriptor itself is read by the reader and written by
//! the caller.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Session lifecycle phase.
///
/// `Stopped → Starting → Running ⇄ WaitingInput → Cancelling → (Running |
/// Stopped)`; any phase moves to `Stopped` on explicit stop or detected child
/// exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Stopped,
    Starting,
    Running,
    WaitingInput,
    Cancelling,
}

impl Phase {
    /// A live session in any phase other than `Stopped`.
    pub fn is_active(&self) -> bool {
        !matches!(self, Phase::Stopped)
    }

    /// Phases in which silence from the agent counts toward a stall. An
    /// agent idling at an input prompt is quiet by design, not stalled.
    pub fn expects_output(&self) -> bool {
        matches!(self, Phase::Starting | Phase::Running | Phase::Cancelling)
    }
}

/// Reader-thread health, computed on demand from the last-activity clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReaderHealth {
    Healthy,
    /// No data and no end-of-stream within the stall threshold; a restart
    /// decision is up to the caller.
    Stalled,
    /// The reader has exited (session stopped or child gone).
    Ended,
}

/// One cleaned fragment of agent output, consumed by `drain()`.
#[derive(Debug, Clone, Serialize)]
pub struct OutputChunk {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Caller input on its way to the descriptor.
#[derive(Debug, Clone)]
pub struct PendingInput {
    pub text: String,
    pub awaiting: bool,
}

/// Structured status for the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: Phase,
    pub reader: ReaderHealth,
    /// Seconds since start, while the session is active.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    /// Exit code of the last child once the phase reached `Stopped`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Fields guarded by the state lock.
pub(crate) struct StateInner {
    pub phase: Phase,
    pub started_at: Option<Instant>,
    pub last_activity: Option<Instant>,
    pub exit_code: Option<i32>,
    pub pending_input: Option<PendingInput>,
    /// Set by `cancel()`; the reader commits the `Cancelling` phase when the
    /// child's first post-interrupt output arrives.
    pub pending_cancel: bool,
}

impl StateInner {
    fn new() -> Self {
        Self {
            phase: Phase::Stopped,
            started_at: None,
            last_activity: None,
            exit_code: None,
            pending_input: None,
            pending_cancel: false,
        }
    }
}

/// State shared between the engine and the reader thread.
pub(crate) struct SharedState {
    /// State lock.
    pub state: RwLock<StateInner>,
    /// Queue lock.
    pub output: Mutex<VecDeque<OutputChunk>>,
    /// Write lock.
    pub writer: Mutex<Option<Box<dyn Write + Send>>>,
    /// Reader liveness; cleared by `stop()` so the reader exits within one
    /// poll interval.
    pub live: AtomicBool,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StateInner::new()),
            output: Mutex::new(VecDeque::new()),
            writer: Mutex::new(None),
            live: AtomicBool::new(false),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state.read().phase
    }

    pub fn set_phase(&self, to: Phase) {
        let mut state = self.state.write();
        transition(&mut state, to);
    }

    pub fn push_chunk(&self, chunk: OutputChunk) {
        self.output.lock().push_back(chunk);
    }

    pub fn drain_chunks(&self) -> Vec<OutputChunk> {
        let mut queue = self.output.lock();
        queue.drain(..).collect()
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn status(&self, stall_threshold: Duration) -> SessionStatus {
        let state = self.state.read();
        let reader = if !state.phase.is_active() {
            ReaderHealth::Ended
        } else if state.phase.expects_output()
            && state
                .last_activity
                .map(|t| t.elapsed() > stall_threshold)
                .unwrap_or(false)
        {
            ReaderHealth::Stalled
        } else {
            ReaderHealth::Healthy
        };

        SessionStatus {
            phase: state.phase,
            reader,
            uptime_secs: state
                .phase
                .is_active()
                .then(|| state.started_at.map(|t| t.elapsed().as_secs()))
                .flatten(),
            exit_code: state.exit_code,
        }
    }
}

/// Apply a phase change under an already-held state lock.
pub(crate) fn transition(state: &mut StateInner, to: Phase) {
    if state.phase == to {
        return;
    }
    debug!(from = ?state.phase, to = ?to, "phase transition");
    state.phase = to;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_clears_and_preserves_order() {
        let shared = SharedState::new();
        for text in ["one", "two", "three"] {
            shared.push_chunk(OutputChunk {
                text: text.to_string(),
                timestamp: Utc::now(),
            });
        }
        let chunks = shared.drain_chunks();
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
        assert!(shared.drain_chunks().is_empty(), "drain clears the queue");
    }

    #[test]
    fn test_status_reports_stall_only_in_output_phases() {
        let shared = SharedState::new();
        {
            let mut state = shared.state.write();
            state.phase = Phase::Running;
            state.started_at = Some(Instant::now());
            state.last_activity = Some(Instant::now() - Duration::from_secs(120));
        }
        let status = shared.status(Duration::from_secs(60));
        assert_eq!(status.reader, ReaderHealth::Stalled);

        shared.state.write().phase = Phase::WaitingInput;
        let status = shared.status(Duration::from_secs(60));
        assert_eq!(
            status.reader,
            ReaderHealth::Healthy,
            "idling at a prompt is not a stall"
        );
    }

    #[test]
    fn test_status_when_stopped() {
        let shared = SharedState::new();
        shared.state.write().exit_code = Some(2);
        let status = shared.status(Duration::from_secs(60));
        assert_eq!(status.phase, Phase::Stopped);
        assert_eq!(status.reader, ReaderHealth::Ended);
        assert_eq!(status.exit_code, Some(2));
        assert!(status.uptime_secs.is_none());
    }
}
