//! Agent capability records.
//!
//! Agent variants differ only in data: how to launch them, which lines are
//! decorative, what their input prompts look like, how commands are wrapped.
//! A profile captures all of that; the engine never branches on agent type.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How to start an agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Program name or path, resolved on PATH at start.
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables layered over the defaults.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

/// Capability record for one agent type: launch spec, filter rules, prompt
/// patterns and input conventions, all pure data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Registry key ("cline", "generic", ...).
    pub key: String,
    pub launch: LaunchSpec,
    /// Ordered prompt patterns; earlier entries win when several match.
    #[serde(default)]
    pub prompt_patterns: Vec<String>,
    /// Lines matching any of these are dropped as banner/border noise.
    #[serde(default)]
    pub banner_patterns: Vec<String>,
    /// Capacity of the duplicate-suppression window.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
    /// Byte written by `cancel()` (ETX / Ctrl-C unless the agent differs).
    #[serde(default = "default_interrupt_byte")]
    pub interrupt_byte: u8,
    /// Terminator appended to everything sent to the agent.
    #[serde(default = "default_line_terminator")]
    pub line_terminator: String,
    /// Control tokens wrapped around command-mode sends (mode-switch markers
    /// and similar). Raw input while the agent waits is never wrapped.
    #[serde(default)]
    pub command_prefix: String,
    #[serde(default)]
    pub command_suffix: String,
}

fn default_dedup_window() -> usize {
    10
}

fn default_interrupt_byte() -> u8 {
    0x03
}

fn default_line_terminator() -> String {
    "\n".to_string()
}

impl AgentProfile {
    /// A minimal profile around a launch spec: no prompt knowledge, no
    /// banner rules, plain newline input.
    pub fn generic(launch: LaunchSpec) -> Self {
        Self {
            key: "generic".to_string(),
            launch,
            prompt_patterns: Vec::new(),
            banner_patterns: Vec::new(),
            dedup_window: default_dedup_window(),
            interrupt_byte: default_interrupt_byte(),
            line_terminator: default_line_terminator(),
            command_prefix: String::new(),
            command_suffix: String::new(),
        }
    }

    /// Profile for the cline CLI agent.
    pub fn cline() -> Self {
        Self {
            key: "cline".to_string(),
            launch: LaunchSpec::new("cline"),
            prompt_patterns: vec![
                r"\[y/N\]\s*$".to_string(),
                r"\[Y/n\]\s*$".to_string(),
                r"\(y/n\)\s*$".to_string(),
                r"(?i)continue\?\s*$".to_string(),
                r"(?i)proceed\?\s*$".to_string(),
                r"(?i)are you sure\?\s*$".to_string(),
                r"(?i)press enter to continue\s*$".to_string(),
                r"(?i)enter .*:\s*$".to_string(),
            ],
            banner_patterns: vec![
                // Box-drawing borders around the input area
                r"^[\s│┃╭╰╮╯─━]+$".to_string(),
                r"(?i)cline cli preview".to_string(),
                // Keyboard hint footer
                r"(?i)(alt\+enter|enter submit|new line|open editor)".to_string(),
                // Per-request token/cost telemetry
                r"(?i)## api request completed".to_string(),
                r"(?i)tokens:.*prompt:".to_string(),
                r"(?i)cost:.*\$".to_string(),
            ],
            dedup_window: default_dedup_window(),
            interrupt_byte: default_interrupt_byte(),
            line_terminator: "\n".to_string(),
            command_prefix: String::new(),
            command_suffix: String::new(),
        }
    }
}

/// Map from agent-type key to capability record, resolved once at startup.
#[derive(Debug, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, AgentProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin profiles.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(AgentProfile::cline());
        registry
    }

    pub fn insert(&mut self, profile: AgentProfile) {
        self.profiles.insert(profile.key.clone(), profile);
    }

    pub fn get(&self, key: &str) -> Option<&AgentProfile> {
        self.profiles.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Load additional profiles from a JSON array.
    pub fn load_json(&mut self, json: &str) -> Result<usize, serde_json::Error> {
        let profiles: Vec<AgentProfile> = serde_json::from_str(json)?;
        let count = profiles.len();
        for profile in profiles {
            self.insert(profile);
        }
        Ok(count)
    }
}
