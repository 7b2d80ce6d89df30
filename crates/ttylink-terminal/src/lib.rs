//! ttylink-terminal: terminal output cleaning library
//!
//! This crate provides:
//! - `AnsiStripper`: Stateful filter that removes ANSI/VT escape sequences and
//!   non-printing control bytes from raw PTY output, handling sequences and
//!   UTF-8 characters split across chunks
//! - `NoiseFilter`: Line-oriented cleaner that drops banner/border lines and
//!   suppresses recently repeated lines through a bounded duplicate window
//! - `NoiseRules`: Pure-data configuration for `NoiseFilter`
//!
//! # Usage
//!
//! ```rust
//! use ttylink_terminal::{AnsiStripper, NoiseFilter, NoiseRules};
//!
//! let mut stripper = AnsiStripper::new();
//! let text = stripper.push(b"\x1b[1;31mhello\x1b[0m\r\n");
//! assert_eq!(text, "hello\n");
//!
//! let mut filter = NoiseFilter::new(&NoiseRules::default()).unwrap();
//! let cleaned = filter.push(&text);
//! assert_eq!(cleaned, "hello\n");
//! ```

mod ansi;
mod noise;

pub use ansi::AnsiStripper;
pub use noise::{NoiseFilter, NoiseRules};
