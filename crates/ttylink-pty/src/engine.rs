//! Session engine: the complete surface the chat-transport layer consumes.
//!
//! One engine drives at most one live agent session. All configuration is
//! injected at construction as pure data (`SessionConfig`); the engine owns a
//! `tracing` span as its logging context, so nothing here touches process-wide
//! state.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portable_pty::{Child, MasterPty};
use serde::Serialize;
use tracing::{info, info_span, warn, Span};
use ttylink_terminal::{AnsiStripper, NoiseFilter, NoiseRules};
use uuid::Uuid;

use crate::error::{LaunchError, SessionError};
use crate::launch::launch;
use crate::profile::AgentProfile;
use crate::prompt::PromptDetector;
use crate::reader::{spawn_reader, ReaderContext};
use crate::reaper::{reap_tree, ReaperConfig};
use crate::state::{transition, OutputChunk, PendingInput, Phase, SessionStatus, SharedState};

/// Default bounded-timeout for the reader's poll.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Default silence threshold before the reader is flagged stalled.
const DEFAULT_STALL_THRESHOLD: Duration = Duration::from_secs(60);

/// Everything an engine needs, resolved before construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub profile: AgentProfile,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub poll_interval: Duration,
    pub stall_threshold: Duration,
    pub reaper: ReaperConfig,
}

impl SessionConfig {
    pub fn new(profile: AgentProfile, cwd: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            cwd: cwd.into(),
            cols: 120,
            rows: 30,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stall_threshold: DEFAULT_STALL_THRESHOLD,
            reaper: ReaperConfig::default(),
        }
    }
}

/// Identity of a live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

/// PTY session engine bridging a chat transport and one CLI agent.
pub struct SessionEngine {
    config: SessionConfig,
    shared: Arc<SharedState>,
    child: Arc<Mutex<Option<Box<dyn Child + Send>>>>,
    /// Kept alive until the reader is joined; the reader polls its
    /// descriptor.
    master: Option<Box<dyn MasterPty + Send>>,
    reader_handle: Option<JoinHandle<()>>,
    info: Option<SessionInfo>,
    span: Span,
}

impl SessionEngine {
    pub fn new(config: SessionConfig) -> Self {
        let span = info_span!("pty_session", agent = %config.profile.key);
        Self {
            config,
            shared: Arc::new(SharedState::new()),
            child: Arc::new(Mutex::new(None)),
            master: None,
            reader_handle: None,
            info: None,
            span,
        }
    }

    /// Start the agent session. Fails if one is already active; on failure no
    /// process or descriptor is left behind.
    pub fn start(&mut self) -> Result<SessionInfo, LaunchError> {
        if self.shared.phase().is_active() {
            return Err(LaunchError::AlreadyActive);
        }

        let _guard = self.span.clone().entered();

        // Compile the injected patterns before touching the OS, so a bad
        // profile cannot leak a half-started session.
        let detector = PromptDetector::new(&self.config.profile.prompt_patterns)
            .map_err(|e| LaunchError::Config(e.to_string()))?;
        let filter = NoiseFilter::new(&NoiseRules {
            banner_patterns: self.config.profile.banner_patterns.clone(),
            dedup_window: self.config.profile.dedup_window,
        })
        .map_err(|e| LaunchError::Config(e.to_string()))?;

        let launched = launch(
            &self.config.profile.launch,
            &self.config.cwd,
            self.config.cols,
            self.config.rows,
        )?;

        let info = SessionInfo {
            id: Uuid::new_v4(),
            pid: launched.pid,
            started_at: Utc::now(),
        };

        *self.shared.writer.lock() = Some(launched.writer);
        *self.child.lock() = Some(launched.child);
        self.master = Some(launched.master);
        // Output left over from a previous run must not leak into this one.
        self.shared.output.lock().clear();
        {
            let mut state = self.shared.state.write();
            state.started_at = Some(Instant::now());
            state.last_activity = Some(Instant::now());
            state.exit_code = None;
            state.pending_input = None;
            state.pending_cancel = false;
            transition(&mut state, Phase::Starting);
        }
        self.shared
            .live
            .store(true, std::sync::atomic::Ordering::SeqCst);

        self.reader_handle = Some(spawn_reader(ReaderContext {
            shared: Arc::clone(&self.shared),
            child: Arc::clone(&self.child),
            reader: launched.reader,
            raw_fd: launched.raw_fd,
            stripper: AnsiStripper::new(),
            filter,
            detector,
            poll_interval: self.config.poll_interval,
            span: self.span.clone(),
        }));

        info!(id = %info.id, pid = info.pid, "session started");
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Send caller text to the agent.
    ///
    /// While the agent waits at a prompt the text goes through raw (plus the
    /// line terminator) and the phase returns to `Running`; otherwise it is
    /// wrapped with the profile's command tokens.
    pub fn send(&self, text: &str) -> Result<(), SessionError> {
        let profile = &self.config.profile;

        let raw = {
            let mut state = self.shared.state.write();
            if !state.phase.is_active() {
                return Err(SessionError::NotRunning);
            }
            state.pending_input = Some(PendingInput {
                text: text.to_string(),
                awaiting: true,
            });
            state.phase == Phase::WaitingInput
        };

        let payload = if raw {
            format!("{text}{}", profile.line_terminator)
        } else {
            format!(
                "{}{text}{}{}",
                profile.command_prefix, profile.command_suffix, profile.line_terminator
            )
        };

        let written = self.write_bytes(payload.as_bytes());

        {
            let mut state = self.shared.state.write();
            state.pending_input = None;
            if written.is_ok() && raw && state.phase == Phase::WaitingInput {
                transition(&mut state, Phase::Running);
            }
        }

        written
    }

    /// Write the configured interrupt byte straight to the descriptor,
    /// whatever the phase. The phase is not touched here; the child's
    /// reaction surfaces through subsequent output.
    pub fn cancel(&self) -> Result<(), SessionError> {
        if !self.shared.phase().is_active() {
            return Err(SessionError::NotRunning);
        }
        self.write_bytes(&[self.config.profile.interrupt_byte])?;
        self.shared.state.write().pending_cancel = true;
        Ok(())
    }

    /// Write a bare line terminator, dismissing "press enter to continue"
    /// style prompts.
    pub fn acknowledge(&self) -> Result<(), SessionError> {
        if !self.shared.phase().is_active() {
            return Err(SessionError::NotRunning);
        }
        self.write_bytes(self.config.profile.line_terminator.as_bytes())?;
        let mut state = self.shared.state.write();
        if state.phase == Phase::WaitingInput {
            transition(&mut state, Phase::Running);
        }
        Ok(())
    }

    /// Non-blocking: return and clear the fragments accumulated since the
    /// previous call, in descriptor read order.
    pub fn drain(&self) -> Vec<OutputChunk> {
        self.shared.drain_chunks()
    }

    /// Stop the session: reap the process tree, join the reader, close the
    /// descriptors. Idempotent; never errors.
    pub fn stop(&mut self) {
        let _guard = self.span.clone().entered();

        let had_child = self.child.lock().is_some();
        if had_child {
            if let Some(info) = &self.info {
                let summary = reap_tree(info.pid, &self.config.reaper);
                info!(
                    pid = info.pid,
                    signaled = summary.signaled,
                    killed = summary.killed,
                    "process tree reaped"
                );
            }
        }

        self.shared
            .live
            .store(false, std::sync::atomic::Ordering::SeqCst);
        *self.shared.writer.lock() = None;

        if let Some(handle) = self.reader_handle.take() {
            if handle.join().is_err() {
                warn!("reader thread panicked during shutdown");
            }
        }

        // Collect the exit code if the reader did not get there first.
        if let Some(mut child) = self.child.lock().take() {
            if let Ok(Some(status)) = child.try_wait() {
                let mut state = self.shared.state.write();
                if state.exit_code.is_none() {
                    state.exit_code = Some(status.exit_code() as i32);
                }
            }
        }
        self.master = None;

        {
            let mut state = self.shared.state.write();
            state.pending_input = None;
            state.pending_cancel = false;
            transition(&mut state, Phase::Stopped);
        }
        if had_child {
            info!("session stopped");
        }
    }

    /// Stop and start again with the same configuration — the restart path a
    /// watchdog owner takes after observing a stalled reader.
    pub fn restart(&mut self) -> Result<SessionInfo, LaunchError> {
        self.stop();
        self.start()
    }

    /// Current phase, reader health, uptime and last exit code.
    pub fn status(&self) -> SessionStatus {
        self.shared.status(self.config.stall_threshold)
    }

    /// Identity of the current session, while one is active.
    pub fn info(&self) -> Option<&SessionInfo> {
        self.info.as_ref()
    }

    /// Caller input currently on its way to the descriptor, if any.
    pub fn pending_input(&self) -> Option<PendingInput> {
        self.shared.state.read().pending_input.clone()
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.shared.writer.lock();
        let writer = writer.as_mut().ok_or(SessionError::NotRunning)?;
        writer.write_all(bytes).map_err(SessionError::Write)?;
        writer.flush().map_err(SessionError::Write)
    }
}

impl Drop for SessionEngine {
    fn drop(&mut self) {
        if self.shared.phase().is_active() || self.child.lock().is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::LaunchSpec;

    fn engine_for(program: &str) -> SessionEngine {
        let profile = AgentProfile::generic(LaunchSpec::new(program));
        SessionEngine::new(SessionConfig::new(profile, "/"))
    }

    #[test]
    fn test_send_on_stopped_engine_fails() {
        let engine = engine_for("/bin/sh");
        assert!(matches!(engine.send("hi"), Err(SessionError::NotRunning)));
    }

    #[test]
    fn test_cancel_on_stopped_engine_fails() {
        let engine = engine_for("/bin/sh");
        assert!(matches!(engine.cancel(), Err(SessionError::NotRunning)));
    }

    #[test]
    fn test_drain_on_fresh_engine_is_empty() {
        let engine = engine_for("/bin/sh");
        assert!(engine.drain().is_empty());
        assert_eq!(engine.status().phase, Phase::Stopped);
    }

    #[test]
    fn test_bad_prompt_pattern_is_a_config_error() {
        let mut profile = AgentProfile::generic(LaunchSpec::new("true"));
        profile.prompt_patterns = vec!["[unclosed".to_string()];
        let mut engine = SessionEngine::new(SessionConfig::new(profile, "/"));
        assert!(matches!(engine.start(), Err(LaunchError::Config(_))));
        assert_eq!(engine.status().phase, Phase::Stopped);
    }
}
