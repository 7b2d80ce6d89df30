//! Error taxonomy for the session engine.
//!
//! Only conditions that require caller action surface as errors. A child
//! exiting is a terminal phase with a recorded exit code; a stalled reader is
//! reported through `status()`; reaper failures are logged and swallowed.
//! Every variant renders as a single human-readable line without descriptor
//! or signal detail.

use thiserror::Error;

/// Failures starting a session. Fatal to `start()`; no session is created
/// and no resources are left behind.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("agent executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("a session is already active")]
    AlreadyActive,

    #[error("invalid session configuration: {0}")]
    Config(String),

    #[error("failed to allocate a terminal for the agent")]
    Pty(#[source] anyhow::Error),

    #[error("failed to start the agent process")]
    Spawn(#[source] anyhow::Error),
}

/// Failures on an established session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no agent session is running")]
    NotRunning,

    #[error("failed to send input to the agent")]
    Write(#[source] std::io::Error),
}
