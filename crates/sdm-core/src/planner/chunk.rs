//! Chunk type and range math.

use std::fmt;

/// `end` of a chunk whose length is unknown (a stream read until EOF).
pub const OPEN_END: u64 = u64::MAX;

/// A byte range `[start, end)` (half-open) plus the number of failed attempts
/// already spent on it. Chunks are values: re-splitting or retrying derives a
/// new chunk instead of mutating this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Start offset (inclusive).
    pub start: u64,
    /// End offset (exclusive). `OPEN_END` for streams of unknown length.
    pub end: u64,
    pub attempt: u32,
}

impl Chunk {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end, attempt: 0 }
    }

    /// Chunk covering everything from `start` to the end of the stream.
    pub fn open_ended(start: u64) -> Self {
        Self::new(start, OPEN_END)
    }

    pub fn is_open_ended(&self) -> bool {
        self.end == OPEN_END
    }

    /// Length in bytes (saturating; meaningless for open-ended chunks).
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// The unwritten part after `written` bytes have been flushed from `start`.
    /// Keeps the attempt counter. `None` when nothing is left.
    pub fn remainder(&self, written: u64) -> Option<Chunk> {
        let start = self.start.saturating_add(written);
        (start < self.end).then_some(Chunk { start, ..*self })
    }

    /// Splits at `mid` into `[start, mid)` and `[mid, end)`. Both halves keep
    /// the attempt counter. `None` unless `start < mid < end`.
    pub fn split_at(&self, mid: u64) -> Option<(Chunk, Chunk)> {
        if mid <= self.start || mid >= self.end {
            return None;
        }
        Some((
            Chunk { end: mid, ..*self },
            Chunk { start: mid, ..*self },
        ))
    }

    /// Same range with the attempt counter bumped.
    pub fn next_attempt(&self) -> Chunk {
        Chunk {
            attempt: self.attempt.saturating_add(1),
            ..*self
        }
    }

    /// HTTP Range header value (inclusive end): `bytes=start-(end-1)`, or
    /// `bytes=start-` for open-ended chunks.
    pub fn range_header_value(&self) -> String {
        format!("bytes={}", self.curl_range())
    }

    /// Range in the form curl's `CURLOPT_RANGE` expects (no `bytes=` prefix).
    pub fn curl_range(&self) -> String {
        if self.is_open_ended() {
            format!("{}-", self.start)
        } else if self.is_empty() {
            format!("{}-{}", self.start, self.start)
        } else {
            format!("{}-{}", self.start, self.end - 1)
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{}, EOF)", self.start)
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

/// Round `v` up to a multiple of `align` (an `align` of 0 is treated as 1).
pub fn align_up(v: u64, align: u64) -> u64 {
    let align = align.max(1);
    v.div_ceil(align).saturating_mul(align)
}

/// Round `v` down to a multiple of `align` (an `align` of 0 is treated as 1).
pub fn align_down(v: u64, align: u64) -> u64 {
    let align = align.max(1);
    v - v % align
}
