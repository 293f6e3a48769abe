//! Bounded output tails.
//!
//! The build tool can print megabytes; only the end of each stream matters
//! for diagnosis, so readers keep a sliding window of the last bytes seen.

use std::collections::VecDeque;

/// Longest UTF-8 encoding of a single char.
const MAX_UTF8_WIDTH: usize = 4;

/// Sliding byte window sized to hold at least `max_chars` characters.
#[derive(Debug)]
pub struct TailBuffer {
    max_chars: usize,
    byte_cap: usize,
    buf: VecDeque<u8>,
    dropped: usize,
}

impl TailBuffer {
    pub fn new(max_chars: usize) -> Self {
        let byte_cap = max_chars.saturating_mul(MAX_UTF8_WIDTH);
        Self {
            max_chars,
            byte_cap,
            buf: VecDeque::with_capacity(byte_cap.min(64 * 1024)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        if self.byte_cap == 0 {
            self.dropped += bytes.len();
            return;
        }
        let bytes = if bytes.len() > self.byte_cap {
            let skip = bytes.len() - self.byte_cap;
            self.dropped += skip;
            &bytes[skip..]
        } else {
            bytes
        };
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.byte_cap);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow;
        }
        self.buf.extend(bytes);
    }

    /// Bytes discarded from the front so far.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped
    }

    /// Decode lossily and keep the last `max_chars` characters.
    pub fn into_string(self) -> String {
        let max_chars = self.max_chars;
        let bytes: Vec<u8> = self.buf.into_iter().collect();
        tail_chars(&String::from_utf8_lossy(&bytes), max_chars)
    }
}

/// Last `max_chars` characters of `text`.
pub fn tail_chars(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}
