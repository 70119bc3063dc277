use std::sync::LazyLock;

use regex::Regex;

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\S+\s+").expect("word pattern is valid"));

/// Re-chunks model text deltas on word boundaries.
///
/// Text is released as soon as a whole word plus its trailing whitespace is
/// buffered. Whatever remains is returned by [`flush`](Self::flush). The
/// concatenation of all output always equals the concatenation of input.
#[derive(Debug, Default)]
pub struct WordSmoother {
    enabled: bool,
    buffer: String,
}

impl WordSmoother {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            buffer: String::new(),
        }
    }

    pub fn push(&mut self, delta: &str) -> Vec<String> {
        if !self.enabled {
            return if delta.is_empty() { Vec::new() } else { vec![delta.to_string()] };
        }
        self.buffer.push_str(delta);

        let mut chunks = Vec::new();
        let mut consumed = 0;
        while let Some(m) = WORD.find(&self.buffer[consumed..]) {
            chunks.push(m.as_str().to_string());
            consumed += m.end();
        }
        self.buffer.drain(..consumed);
        chunks
    }

    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
