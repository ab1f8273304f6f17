//! The output buffer (C3): a fixed-capacity tail store for a process's
//! concatenated stdout+stderr.
//!
//! `OutputBuffer` is a plain value type, not a service: the engine owns one
//! per record and serializes access to it with its own lock (`tokio::sync`),
//! so this type needs no internal synchronization and is trivial to unit
//! test without async machinery.

use std::collections::VecDeque;

/// Advisory UI hint. Purely informational: nothing in this crate reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Live,
    Filtering,
}

/// Result of a `tail` read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRead {
    pub bytes: Vec<u8>,
}

/// Result of a `read` from an absolute offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetRead {
    pub bytes: Vec<u8>,
    /// True if `fromOffset` fell before the retained window, meaning the
    /// caller missed bytes that were already dropped from the head.
    pub truncated_start: bool,
    /// Absolute offset one past the last byte returned; pass this back in
    /// as `from_offset` on the next call to read only new bytes.
    pub next_offset: u64,
}

/// Bounded ring buffer over everything a process has written so far.
///
/// Internally a `VecDeque<u8>` with a `window_start` marking the absolute
/// offset of its first retained byte. Once capacity is exceeded, bytes are
/// dropped from the head and `truncated` becomes permanently `true`.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    data: VecDeque<u8>,
    capacity: usize,
    /// Absolute offset (since the process started) of `data[0]`.
    window_start: u64,
    /// Absolute offset one past the last byte ever appended.
    end: u64,
    truncated: bool,
    phase: Phase,
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::new(),
            capacity: capacity.max(1),
            window_start: 0,
            end: 0,
            truncated: false,
            phase: Phase::Live,
        }
    }

    /// Appends `chunk` in order, dropping from the head by whole bytes if
    /// the retained total now exceeds capacity. Once any head drop occurs,
    /// `truncated` stays `true` for the buffer's lifetime.
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend(chunk.iter().copied());
        self.end += chunk.len() as u64;
        while self.data.len() > self.capacity {
            self.data.pop_front();
            self.window_start += 1;
            self.truncated = true;
        }
    }

    /// Returns the last `min(n_bytes, stored)` bytes. Cheap: no offset
    /// bookkeeping, just a tail slice.
    pub fn tail(&self, n_bytes: usize) -> TailRead {
        let take = n_bytes.min(self.data.len());
        let skip = self.data.len() - take;
        TailRead {
            bytes: self.data.iter().skip(skip).copied().collect(),
        }
    }

    /// Returns bytes from `from_offset` (absolute, since process start) to
    /// the current end. If `from_offset` precedes the retained window, the
    /// entire window is returned with `truncated_start=true` so the caller
    /// knows it missed intervening bytes.
    pub fn read(&self, from_offset: u64) -> OffsetRead {
        if from_offset < self.window_start {
            return OffsetRead {
                bytes: self.data.iter().copied().collect(),
                truncated_start: true,
                next_offset: self.end,
            };
        }
        let skip = (from_offset - self.window_start) as usize;
        let bytes = self.data.iter().skip(skip).copied().collect();
        OffsetRead {
            bytes,
            truncated_start: false,
            next_offset: self.end,
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Absolute offset one past the last byte ever appended.
    pub fn end_offset(&self) -> u64 {
        self.end
    }

    /// Absolute offset of the oldest retained byte.
    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_tail_roundtrip() {
        let mut buf = OutputBuffer::new(1024);
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.tail(5).bytes, b"world");
        assert_eq!(buf.tail(100).bytes, b"hello world");
        assert!(!buf.truncated());
    }

    #[test]
    fn head_drops_once_capacity_exceeded() {
        let mut buf = OutputBuffer::new(5);
        buf.append(b"abcdefgh");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.tail(5).bytes, b"defgh");
        assert!(buf.truncated());
    }

    #[test]
    fn truncated_stays_true_after_further_appends_within_budget() {
        let mut buf = OutputBuffer::new(4);
        buf.append(b"12345");
        assert!(buf.truncated());
        // Further small appends keep it within budget but truncated is sticky.
        buf.append(b"6");
        assert!(buf.truncated());
    }

    #[test]
    fn read_from_offset_within_window_returns_suffix() {
        let mut buf = OutputBuffer::new(1024);
        buf.append(b"0123456789");
        let r = buf.read(4);
        assert_eq!(r.bytes, b"456789");
        assert!(!r.truncated_start);
        assert_eq!(r.next_offset, 10);
    }

    #[test]
    fn read_from_offset_before_window_returns_whole_window_and_flags_truncation() {
        let mut buf = OutputBuffer::new(5);
        buf.append(b"0123456789"); // window becomes "56789", window_start=5
        let r = buf.read(0);
        assert!(r.truncated_start);
        assert_eq!(r.bytes, b"56789");
        assert_eq!(r.next_offset, 10);
    }

    #[test]
    fn read_at_exact_end_returns_empty_with_same_next_offset() {
        let mut buf = OutputBuffer::new(1024);
        buf.append(b"abc");
        let r = buf.read(3);
        assert!(r.bytes.is_empty());
        assert!(!r.truncated_start);
        assert_eq!(r.next_offset, 3);
    }

    #[test]
    fn tail_on_empty_buffer_is_empty() {
        let buf = OutputBuffer::new(16);
        assert!(buf.tail(10).bytes.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn phase_hint_is_purely_advisory_state() {
        let mut buf = OutputBuffer::new(16);
        assert_eq!(buf.phase(), Phase::Live);
        buf.set_phase(Phase::Filtering);
        assert_eq!(buf.phase(), Phase::Filtering);
    }
}
