//! Accumulated shell output with tail-only prompt search.
//!
//! Prompts are only looked for in the last `search_depth` bytes, so reading
//! a long `system host-list` or `kubectl get pods -A` costs time linear in
//! its length rather than quadratic.

use std::ops::Range;

use regex::bytes::Regex;

/// Default number of trailing bytes searched for prompts.
pub const DEFAULT_SEARCH_DEPTH: usize = 1000;

/// Output read from a shell since the last command was written.
#[derive(Debug)]
pub struct PatternBuffer {
    data: Vec<u8>,
    search_depth: usize,
}

impl PatternBuffer {
    pub fn new(search_depth: usize) -> Self {
        Self {
            data: Vec::with_capacity(4096),
            search_depth: search_depth.max(1),
        }
    }

    /// Append a chunk read from the channel, with ANSI escapes removed.
    pub fn extend(&mut self, chunk: &[u8]) {
        let cleaned = strip_ansi_escapes::strip(chunk);
        self.data.extend_from_slice(&cleaned);
    }

    /// Find `pattern` in the tail; the range is absolute.
    pub fn find_tail(&self, pattern: &Regex) -> Option<Range<usize>> {
        let start = self.tail_start();
        pattern
            .find(&self.data[start..])
            .map(|m| (start + m.start())..(start + m.end()))
    }

    /// Find whichever of `patterns` matches closest to the end of the output.
    ///
    /// A password question printed after an echoed prompt wins over the
    /// prompt, since it is what the shell is waiting on now.
    pub fn find_tail_any(&self, patterns: &[&Regex]) -> Option<(usize, Range<usize>)> {
        patterns
            .iter()
            .enumerate()
            .filter_map(|(idx, pattern)| self.find_tail(pattern).map(|range| (idx, range)))
            .max_by_key(|(_, range)| range.end)
    }

    /// Remove and return everything up to `end`, keeping what follows.
    pub fn take_through(&mut self, end: usize) -> Vec<u8> {
        let end = end.min(self.data.len());
        let rest = self.data.split_off(end);
        std::mem::replace(&mut self.data, rest)
    }

    /// Remove and return everything.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    fn tail_start(&self) -> usize {
        self.data.len().saturating_sub(self.search_depth)
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DEPTH)
    }
}
