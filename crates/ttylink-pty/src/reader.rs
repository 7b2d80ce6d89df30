//! Output reader thread.
//!
//! One dedicated thread per session drains the master descriptor. The only
//! blocking point is a bounded-timeout poll, so shutdown is observed within
//! one interval. Data flows raw bytes → escape stripping → noise filtering →
//! prompt detection → drain queue; the phase commit always lands before the
//! fragment becomes visible to `drain()`, so a caller that polls before
//! acting never sees a stale phase.

use std::io::Read;
use std::os::fd::{BorrowedFd, RawFd};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use parking_lot::Mutex;
use portable_pty::Child;
use std::sync::Arc;
use tracing::{debug, info, warn, Span};
use ttylink_terminal::{AnsiStripper, NoiseFilter};

use crate::prompt::PromptDetector;
use crate::state::{transition, OutputChunk, Phase, SharedState};

pub(crate) const READ_BUFFER_SIZE: usize = 4096;

/// Everything the reader thread owns or shares.
pub(crate) struct ReaderContext {
    pub shared: Arc<SharedState>,
    pub child: Arc<Mutex<Option<Box<dyn Child + Send>>>>,
    pub reader: Box<dyn Read + Send>,
    pub raw_fd: RawFd,
    pub stripper: AnsiStripper,
    pub filter: NoiseFilter,
    pub detector: PromptDetector,
    pub poll_interval: Duration,
    pub span: Span,
}

pub(crate) fn spawn_reader(ctx: ReaderContext) -> JoinHandle<()> {
    std::thread::spawn(move || run(ctx))
}

fn run(mut ctx: ReaderContext) {
    let _guard = ctx.span.clone().entered();
    debug!("reader started");

    let mut buf = [0u8; READ_BUFFER_SIZE];
    let timeout_ms = ctx.poll_interval.as_millis().min(u128::from(u16::MAX)) as u16;
    let timeout = PollTimeout::from(timeout_ms);

    loop {
        if !ctx.shared.is_live() {
            debug!("liveness flag cleared, reader exiting");
            return;
        }

        // SAFETY: the engine keeps the master alive until this thread is
        // joined, so the descriptor outlives every borrow here.
        let fd = unsafe { BorrowedFd::borrow_raw(ctx.raw_fd) };
        let mut poll_fds = [PollFd::new(fd, PollFlags::POLLIN)];
        match poll(&mut poll_fds, timeout) {
            Ok(0) => {
                // Quiet interval: output has settled, surface any
                // unterminated line (this is how a bare prompt such as
                // "ready> " reaches the caller).
                if ctx.filter.has_partial() {
                    let settled = ctx.filter.flush_partial();
                    deliver(&ctx.shared, &mut ctx.detector, settled);
                }
                continue;
            }
            Ok(_) => {}
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                warn!(%errno, "poll on pty master failed");
                end_of_stream(&mut ctx);
                return;
            }
        }

        match ctx.reader.read(&mut buf) {
            Ok(0) => {
                end_of_stream(&mut ctx);
                return;
            }
            Ok(n) => {
                let text = ctx.stripper.push(&buf[..n]);
                on_data(&ctx.shared);
                let cleaned = ctx.filter.push(&text);
                deliver(&ctx.shared, &mut ctx.detector, cleaned);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "pty read ended");
                end_of_stream(&mut ctx);
                return;
            }
        }
    }
}

/// Bookkeeping for a data arrival: activity clock plus the phase edges that
/// depend on output rather than on prompt content.
fn on_data(shared: &SharedState) {
    let mut state = shared.state.write();
    state.last_activity = Some(Instant::now());
    if state.pending_cancel {
        // First output after the interrupt byte is the child's
        // acknowledgement.
        state.pending_cancel = false;
        transition(&mut state, Phase::Cancelling);
    } else {
        match state.phase {
            Phase::Starting | Phase::Cancelling => transition(&mut state, Phase::Running),
            _ => {}
        }
    }
}

/// Run prompt detection and publish a cleaned fragment.
///
/// The phase update commits first, the fragment second: a caller seeing the
/// prompt text in `drain()` is guaranteed to observe `WaitingInput`.
fn deliver(shared: &SharedState, detector: &mut PromptDetector, fragment: String) {
    if fragment.is_empty() {
        return;
    }

    if let Some(index) = detector.observe(&fragment) {
        let mut state = shared.state.write();
        if matches!(state.phase, Phase::Running | Phase::Cancelling) {
            debug!(pattern = index, "prompt detected");
            transition(&mut state, Phase::WaitingInput);
        }
    }

    shared.push_chunk(OutputChunk {
        text: fragment,
        timestamp: Utc::now(),
    });
}

/// Child is gone (or the descriptor broke): record the exit code, flush what
/// remains, and park the session in `Stopped`.
fn end_of_stream(ctx: &mut ReaderContext) {
    let remainder = ctx.stripper.flush();
    let mut cleaned = ctx.filter.push(&remainder);
    cleaned.push_str(&ctx.filter.flush_partial());
    if !cleaned.is_empty() {
        ctx.shared.push_chunk(OutputChunk {
            text: cleaned,
            timestamp: Utc::now(),
        });
    }

    let exit_code = {
        let mut child = ctx.child.lock();
        child
            .as_mut()
            .and_then(|c| c.wait().ok())
            .map(|status| status.exit_code() as i32)
    };

    {
        let mut state = ctx.shared.state.write();
        if state.exit_code.is_none() {
            state.exit_code = exit_code;
        }
        state.pending_input = None;
        state.pending_cancel = false;
        transition(&mut state, Phase::Stopped);
    }

    info!(?exit_code, "agent session ended");
}
