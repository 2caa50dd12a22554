//! Per-direction record of which capture timestamp carried which bytes.
//!
//! Each direction's reassembly buffer has a companion [`SegmentLog`]: an
//! ordered list of (length, timestamp) pairs, one per appended TCP payload.
//! The sum of the recorded lengths always equals the buffer length, so an
//! offset into the buffer can be mapped back to the timestamp of the packet
//! that delivered that byte.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct Segment {
    len: usize,
    ts: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SegmentLog {
    segments: VecDeque<Segment>,
}

impl SegmentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one appended payload. Zero-length appends are not recorded;
    /// a retained empty segment would break offset mapping.
    pub fn push(&mut self, len: usize, ts: DateTime<Utc>) {
        if len == 0 {
            return;
        }
        self.segments.push_back(Segment { len, ts });
    }

    /// Timestamp of the segment that carried the byte at `offset`, or the
    /// Unix epoch when `offset` is past the recorded bytes.
    pub fn timestamp_at(&self, offset: usize) -> DateTime<Utc> {
        let mut end = 0usize;
        for segment in &self.segments {
            end += segment.len;
            if offset < end {
                return segment.ts;
            }
        }
        DateTime::UNIX_EPOCH
    }

    /// Advances past `count` consumed bytes, dropping whole segments and
    /// shrinking a partially consumed one in place.
    pub fn consume(&mut self, mut count: usize) {
        while count > 0 {
            let Some(front) = self.segments.front_mut() else {
                return;
            };
            if front.len > count {
                front.len -= count;
                return;
            }
            count -= front.len;
            self.segments.pop_front();
        }
    }

    /// Total recorded bytes; mirrors the owning buffer's length.
    pub fn total_len(&self) -> usize {
        self.segments.iter().map(|segment| segment.len).sum()
    }
}
