//! Interactive-prompt detection.
//!
//! The detector watches the tail of the cleaned output stream for patterns
//! that mean "the agent is waiting for input". Patterns come from the agent
//! profile as an ordered list; the first match by list order wins. Authors
//! write them end-anchored (`\[y/N\]\s*$`) so partially printed prompts never
//! trigger.

use regex::Regex;

/// Upper bound on the retained tail, in bytes.
const MAX_TAIL: usize = 1024;

/// Pattern-based recognizer of waiting-for-input states.
pub struct PromptDetector {
    patterns: Vec<Regex>,
    tail: String,
}

impl PromptDetector {
    /// Compile an ordered pattern set. An empty set yields a detector that
    /// never matches.
    pub fn new(patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            tail: String::new(),
        })
    }

    /// Feed a cleaned fragment; returns the index of the first matching
    /// pattern, if any.
    ///
    /// The tail is cleared on a match, so one raw prompt instance produces at
    /// most one hit; the next occurrence must be printed again to trigger
    /// again.
    pub fn observe(&mut self, fragment: &str) -> Option<usize> {
        self.append_tail(fragment);
        for (index, pattern) in self.patterns.iter().enumerate() {
            if pattern.is_match(&self.tail) {
                self.tail.clear();
                return Some(index);
            }
        }
        None
    }

    /// Forget the accumulated tail (called when the caller answers a prompt,
    /// so stale text cannot re-trigger).
    pub fn reset(&mut self) {
        self.tail.clear();
    }

    fn append_tail(&mut self, fragment: &str) {
        self.tail.push_str(fragment);
        if self.tail.len() > MAX_TAIL {
            let mut cut = self.tail.len() - MAX_TAIL;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
    }
}
