//! Process launching.
//!
//! Allocates a PTY pair, spawns the agent with the slave side as its
//! controlling terminal, and hands everything the session needs back to the
//! engine. The slave side is closed in the parent before returning, so the
//! reader observes end-of-stream as soon as the child (and its descendants)
//! let go of the terminal.

use std::os::fd::RawFd;
use std::path::Path;

use anyhow::anyhow;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::info;

use crate::error::LaunchError;
use crate::profile::LaunchSpec;

/// Everything produced by a successful launch.
pub(crate) struct LaunchedSession {
    pub child: Box<dyn Child + Send>,
    pub master: Box<dyn MasterPty + Send>,
    pub writer: Box<dyn std::io::Write + Send>,
    pub reader: Box<dyn std::io::Read + Send>,
    /// Master-side descriptor for bounded-timeout polling. Valid while
    /// `master` is alive.
    pub raw_fd: RawFd,
    pub pid: u32,
}

impl std::fmt::Debug for LaunchedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedSession")
            .field("raw_fd", &self.raw_fd)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Spawn the agent on a fresh PTY.
///
/// On failure nothing is left behind: the executable check runs before any
/// allocation, and the PTY pair drops (closing both sides) if the spawn
/// itself fails.
pub(crate) fn launch(
    spec: &LaunchSpec,
    cwd: &Path,
    cols: u16,
    rows: u16,
) -> Result<LaunchedSession, LaunchError> {
    let program = which::which(&spec.program)
        .map_err(|_| LaunchError::ExecutableNotFound(spec.program.clone()))?;

    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(LaunchError::Pty)?;

    let mut cmd = CommandBuilder::new(&program);
    cmd.args(&spec.args);
    cmd.cwd(cwd);
    cmd.env("TERM", "xterm-256color");
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let child = pair.slave.spawn_command(cmd).map_err(LaunchError::Spawn)?;
    // Close the slave side in the parent; the child holds its own copy.
    drop(pair.slave);

    let pid = child.process_id().unwrap_or(0);

    let writer = pair.master.take_writer().map_err(LaunchError::Pty)?;
    let reader = pair.master.try_clone_reader().map_err(LaunchError::Pty)?;
    let raw_fd = pair
        .master
        .as_raw_fd()
        .ok_or_else(|| LaunchError::Pty(anyhow!("pty master exposes no descriptor")))?;

    info!(
        program = %program.display(),
        pid,
        cwd = %cwd.display(),
        "agent process spawned"
    );

    Ok(LaunchedSession {
        child,
        master: pair.master,
        writer,
        reader,
        raw_fd,
        pid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::LaunchSpec;

    #[test]
    fn test_missing_executable_fails_before_allocation() {
        let spec = LaunchSpec::new("ttylink-test-no-such-binary");
        let err = launch(&spec, Path::new("/"), 80, 24).unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound(_)));
    }

    #[test]
    fn test_spawn_true_succeeds() {
        let spec = LaunchSpec::new("true");
        let launched = launch(&spec, Path::new("/"), 80, 24).expect("spawn /bin/true");
        assert!(launched.pid > 0);
    }
}
