//! ttylink-pty: PTY session engine for chat-to-agent bridging.
//!
//! A chat transport (Telegram, Slack, whatever) needs a way to hold an
//! interactive CLI agent open, feed it text, and get back something readable.
//! This crate owns exactly that middle layer:
//!
//! - [`SessionEngine`] — the complete surface a transport consumes:
//!   `start / send / cancel / drain / stop / restart / status`
//! - [`AgentProfile`] / [`ProfileRegistry`] — per-agent capability records
//!   (launch spec, prompt patterns, noise rules), pure data so new agent
//!   types need no engine changes
//! - a dedicated reader thread per session doing bounded-timeout polls on the
//!   PTY master, with escape stripping and noise filtering from
//!   `ttylink-terminal` applied before anything reaches the caller
//! - a `/proc`-walking reaper that takes the whole descendant tree down on
//!   stop
//!
//! Transport integration, authorization and transcript persistence live in
//! the consumers, not here.

mod engine;
mod error;
mod launch;
mod profile;
mod prompt;
mod reader;
mod reaper;
mod state;

pub use engine::{SessionConfig, SessionEngine, SessionInfo};
pub use error::{LaunchError, SessionError};
pub use profile::{AgentProfile, LaunchSpec, ProfileRegistry};
pub use prompt::PromptDetector;
pub use reaper::{reap_tree, ReapSummary, ReaperConfig};
pub use state::{OutputChunk, PendingInput, Phase, ReaderHealth, SessionStatus};
