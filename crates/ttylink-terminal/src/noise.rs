//! Noise filtering for cleaned terminal output.
//!
//! Interactive agents redraw banners, borders and spinners constantly. After
//! escape stripping those show up as repeated or decorative text lines. This
//! filter works line by line: configured banner patterns drop a line outright,
//! and a bounded window of recent line hashes suppresses repeats.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashSet, VecDeque};
use std::hash::{Hash, Hasher};

use regex::Regex;

/// Default capacity of the duplicate-suppression window.
const DEFAULT_DEDUP_WINDOW: usize = 10;

/// Pure-data filter configuration, supplied per agent type.
#[derive(Debug, Clone)]
pub struct NoiseRules {
    /// Lines matching any of these patterns are dropped.
    pub banner_patterns: Vec<String>,
    /// Capacity of the recent-line hash window.
    pub dedup_window: usize,
}

impl Default for NoiseRules {
    fn default() -> Self {
        Self {
            banner_patterns: Vec::new(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

/// Bounded FIFO of recently emitted line hashes, oldest evicted first.
struct RecentHashSet {
    capacity: usize,
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl RecentHashSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Insert a hash; returns false if it was already present.
    fn insert(&mut self, hash: u64) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(&hash) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(hash);
        self.seen.insert(hash);
        true
    }
}

/// Line-oriented noise filter with duplicate suppression.
///
/// Input text is expected to be escape-stripped already. Complete lines get
/// the full treatment (banner drop + dedup); an unterminated trailing line is
/// carried until it completes, or until the caller decides output has settled
/// and calls [`NoiseFilter::flush_partial`] — that path is how an interactive
/// prompt with no newline ever reaches the consumer.
pub struct NoiseFilter {
    banners: Vec<Regex>,
    recent: RecentHashSet,
    partial: String,
}

impl NoiseFilter {
    pub fn new(rules: &NoiseRules) -> Result<Self, regex::Error> {
        let banners = rules
            .banner_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            banners,
            recent: RecentHashSet::new(rules.dedup_window),
            partial: String::new(),
        })
    }

    /// Process a fragment of cleaned text, returning the lines that survive.
    pub fn push(&mut self, text: &str) -> String {
        self.partial.push_str(text);

        let mut out = String::new();
        while let Some(pos) = self.partial.find('\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.pop(); // trailing '\n'

            if self.keep_complete_line(&line) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        out
    }

    /// Take the carried unterminated line, if any survives the banner rules.
    ///
    /// Duplicate suppression is not applied here: the line is incomplete, so
    /// its hash would not match the eventual complete form anyway.
    pub fn flush_partial(&mut self) -> String {
        if self.partial.is_empty() {
            return String::new();
        }
        let line = std::mem::take(&mut self.partial);
        if self.is_banner(&line) {
            return String::new();
        }
        line
    }

    /// Whether an unterminated line is currently carried.
    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }

    fn keep_complete_line(&mut self, line: &str) -> bool {
        if self.is_banner(line) {
            return false;
        }
        // Whitespace-only lines are passed through without hashing so that
        // paragraph breaks survive the dedup window.
        if line.trim().is_empty() {
            return true;
        }
        self.recent.insert(line_hash(line))
    }

    fn is_banner(&self, line: &str) -> bool {
        self.banners.iter().any(|re| re.is_match(line))
    }
}

fn line_hash(line: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    line.hash(&mut hasher);
    hasher.finish()
}
