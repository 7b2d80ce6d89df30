//! Process-tree termination.
//!
//! Agents spawn helpers (shells, language servers, build tools); killing the
//! direct child is not enough. The reaper walks `/proc` parent links to
//! collect the whole descendant tree, asks everything to terminate, then
//! force-kills whatever outlives the grace period. Failures here are logged
//! and swallowed: cleanup must never block shutdown.

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use serde::Serialize;
use tracing::{debug, warn};

/// Reaper timing, injected as configuration.
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How long terminated processes get to exit before SIGKILL.
    pub grace_period: Duration,
    /// Liveness re-check cadence during the grace period.
    pub poll_interval: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// What happened during a reap, for logging and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReapSummary {
    /// Processes that received SIGTERM.
    pub signaled: usize,
    /// Processes that needed SIGKILL after the grace period.
    pub killed: usize,
    /// Processes still alive afterwards (partial failure, logged only).
    pub survivors: usize,
}

/// Terminate `root` and every transitive descendant.
pub fn reap_tree(root: u32, config: &ReaperConfig) -> ReapSummary {
    let mut summary = ReapSummary::default();

    let targets = collect_tree(root);
    if targets.is_empty() {
        debug!(root, "nothing to reap");
        return summary;
    }

    for &pid in &targets {
        if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
            summary.signaled += 1;
        }
    }
    debug!(root, signaled = summary.signaled, "sent SIGTERM to process tree");

    // Poll the tree down during the grace period.
    let deadline = std::time::Instant::now() + config.grace_period;
    let mut remaining: Vec<u32> = targets.iter().copied().filter(|&p| is_alive(p)).collect();
    while !remaining.is_empty() && std::time::Instant::now() < deadline {
        std::thread::sleep(config.poll_interval.min(config.grace_period));
        remaining.retain(|&p| is_alive(p));
    }

    for &pid in &remaining {
        if kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() {
            summary.killed += 1;
        }
    }

    if !remaining.is_empty() {
        // Give SIGKILL a moment to land before the final count.
        std::thread::sleep(Duration::from_millis(100));
        summary.survivors = remaining.iter().filter(|&&p| is_alive(p)).count();
    }

    if summary.survivors > 0 {
        warn!(
            root,
            survivors = summary.survivors,
            "process tree not fully terminated"
        );
    }

    summary
}

/// Whether a pid still exists (zombies count as gone for reaping purposes —
/// there is nothing left to signal).
fn is_alive(pid: u32) -> bool {
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    !matches!(proc_state(pid), Some('Z') | Some('X'))
}

/// Root plus all transitive descendants, root first.
fn collect_tree(root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    if let Ok(entries) = fs::read_dir("/proc") {
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            let stat_path = format!("/proc/{pid}/stat");
            let Ok(stat) = fs::read_to_string(stat_path) else {
                continue;
            };
            if let Some(ppid) = parse_stat_ppid(&stat) {
                children.entry(ppid).or_default().push(pid);
            }
        }
    }

    let mut tree = Vec::new();
    let mut queue = vec![root];
    while let Some(pid) = queue.pop() {
        tree.push(pid);
        if let Some(kids) = children.get(&pid) {
            queue.extend(kids.iter().copied());
        }
    }
    tree.retain(|&p| is_alive(p));
    tree
}

/// Parse the parent pid from `/proc/<pid>/stat`.
///
/// The second field (comm) is parenthesized and may itself contain spaces or
/// parentheses, so fields are taken after the last `)`.
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let after_comm = stat.get(stat.rfind(')')? + 1..)?;
    let mut fields = after_comm.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

/// Process state letter from `/proc/<pid>/stat`.
fn proc_state(pid: u32) -> Option<char> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = stat.get(stat.rfind(')')? + 1..)?;
    after_comm.split_whitespace().next()?.chars().next()
}
