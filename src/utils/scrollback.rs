// Byte-bounded terminal scrollback, grounded on the VecDeque-backed
// eviction shape of `LimitQueue<T>` but bounded by total byte count rather
// than item count, per the terminal's replay/overflow contract.
use crate::utils::constants::{SCROLLBACK_LOW_WATER, SCROLLBACK_HIGH_WATER};
use std::collections::VecDeque;

/// Scrollback buffer for a single terminal. Appending past the high-water
/// mark drops leading bytes down to the low-water mark, so late-joining
/// subscribers still get a useful chunk of history without the buffer
/// growing unbounded for long-lived terminals (combined logs, main shell).
#[derive(Debug, Default)]
pub struct ScrollbackBuffer {
    data: VecDeque<u8>,
}

impl ScrollbackBuffer {
    pub fn new() -> Self {
        Self {
            data: VecDeque::new(),
        }
    }

    /// Append bytes, trimming from the front if the high-water mark is
    /// crossed.
    pub fn push(&mut self, chunk: &[u8]) {
        self.data.extend(chunk);
        if self.data.len() > SCROLLBACK_HIGH_WATER {
            let excess = self.data.len() - SCROLLBACK_LOW_WATER;
            self.data.drain(0..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.data.iter().copied().collect()
    }

    /// Replay contents as a UTF-8 string, substituting the replacement
    /// character for any invalid byte sequence straddling the trim point.
    pub fn as_string(&self) -> String {
        String::from_utf8_lossy(&self.as_bytes()).into_owned()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_under_watermark_keeps_everything() {
        let mut buf = ScrollbackBuffer::new();
        buf.push(b"hello ");
        buf.push(b"world");
        assert_eq!(buf.as_string(), "hello world");
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn overflow_trims_to_low_water_mark() {
        let mut buf = ScrollbackBuffer::new();
        // Push well past the high-water mark in one go.
        let chunk = vec![b'x'; SCROLLBACK_HIGH_WATER + 100];
        buf.push(&chunk);
        assert_eq!(buf.len(), SCROLLBACK_LOW_WATER);
    }

    #[test]
    fn overflow_keeps_a_suffix_of_written_bytes() {
        let mut buf = ScrollbackBuffer::new();
        // Write a distinguishable, ever-increasing byte sequence well past
        // the watermark so we can check the tail survived verbatim.
        let mut written = Vec::new();
        for i in 0..(SCROLLBACK_HIGH_WATER / 8 + 20) {
            let line = format!("{:08}", i % 100_000_000);
            written.extend(line.as_bytes());
            buf.push(line.as_bytes());
        }

        assert_eq!(buf.len(), SCROLLBACK_LOW_WATER);
        let suffix = &written[written.len() - buf.len()..];
        assert_eq!(buf.as_bytes(), suffix);
    }

    #[test]
    fn incremental_small_pushes_still_converge_on_low_water() {
        let mut buf = ScrollbackBuffer::new();
        for _ in 0..(SCROLLBACK_HIGH_WATER + 5000) {
            buf.push(b"a");
        }
        assert!(buf.len() <= SCROLLBACK_HIGH_WATER);
        assert!(buf.len() >= SCROLLBACK_LOW_WATER);
    }
}
