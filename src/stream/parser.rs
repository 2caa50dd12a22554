use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::message::{is_ascii_type, ClientMessage, LENGTH_ONLY_TAG};
use super::segments::SegmentLog;

/// Declared frame lengths above this are treated as stream corruption
/// rather than allocated. Random or encrypted payloads misread as a length
/// field would otherwise ask for gigabytes.
pub const MAX_FRAME_LEN: usize = 10 * 1024 * 1024;

/// One complete PostgreSQL v3 frame cut from the front of a direction's
/// reassembly buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// ASCII type byte, or [`LENGTH_ONLY_TAG`] for length-only frames.
    pub tag: u8,
    /// Declared length field.
    pub len: u32,
    /// Capture timestamp of the frame's first on-wire byte.
    pub first_ts: DateTime<Utc>,
    /// Capture timestamp of the frame's last on-wire byte.
    pub last_ts: DateTime<Utc>,
    /// Frame body; empty when the parser does not capture payloads.
    pub payload: Bytes,
}

impl From<Frame> for ClientMessage {
    fn from(frame: Frame) -> Self {
        ClientMessage {
            first_ts: frame.first_ts,
            last_ts: frame.last_ts,
            command_complete_ts: None,
            ready_for_query_ts: None,
            tag: frame.tag,
            len: frame.len,
            payload: frame.payload,
        }
    }
}

/// Reassembles one direction of a TCP conversation and cuts complete
/// frames from it.
///
/// Appends never block and extraction never waits: `extract_frames`
/// returns whatever the buffer currently holds in full. The client-side
/// parser clones frame payloads out of the buffer; the server-side parser
/// only reports frame positions and timestamps.
#[derive(Debug)]
pub struct DirectionParser {
    buf: Vec<u8>,
    segments: SegmentLog,
    capture_payload: bool,
    corrupt: bool,
}

impl DirectionParser {
    pub fn client() -> Self {
        Self::new(true)
    }

    pub fn server() -> Self {
        Self::new(false)
    }

    fn new(capture_payload: bool) -> Self {
        Self {
            buf: Vec::new(),
            segments: SegmentLog::new(),
            capture_payload,
            corrupt: false,
        }
    }

    /// Appends one captured payload and records its timestamp.
    pub fn append(&mut self, payload: &[u8], ts: DateTime<Utc>) {
        if payload.is_empty() {
            return;
        }
        self.buf.extend_from_slice(payload);
        self.segments.push(payload.len(), ts);
    }

    /// Cuts as many complete frames as the buffer holds.
    ///
    /// A declared length that cannot be a whole frame (under 4) or above
    /// [`MAX_FRAME_LEN`] marks the direction corrupt: nothing further is
    /// ever emitted, the buffer is left untouched, and frames emitted
    /// earlier remain valid.
    pub fn extract_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.corrupt {
            return frames;
        }
        loop {
            if self.buf.len() < 4 {
                break;
            }
            let first = self.buf[0];
            let (tag, declared, body_start) = if is_ascii_type(first) {
                if self.buf.len() < 5 {
                    break;
                }
                let declared =
                    u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
                (first, declared, 5usize)
            } else {
                let declared =
                    u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                (LENGTH_ONLY_TAG, declared, 4usize)
            };

            // The length field counts itself, so anything under 4 can
            // never be a whole frame.
            if declared < 4 || declared as usize > MAX_FRAME_LEN {
                warn!(
                    declared_len = declared,
                    buffered = self.buf.len(),
                    "invalid frame length, halting this direction"
                );
                self.corrupt = true;
                break;
            }

            let total = if tag == LENGTH_ONLY_TAG {
                declared as usize
            } else {
                1 + declared as usize
            };
            if self.buf.len() < total {
                break;
            }

            let payload = if self.capture_payload {
                Bytes::copy_from_slice(&self.buf[body_start..total])
            } else {
                Bytes::new()
            };
            frames.push(Frame {
                tag,
                len: declared,
                first_ts: self.segments.timestamp_at(0),
                last_ts: self.segments.timestamp_at(total - 1),
                payload,
            });

            self.buf.drain(..total);
            self.segments.consume(total);
        }
        frames
    }

    /// Bytes currently buffered and not yet framed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// True once an invalid length permanently stopped this direction.
    pub fn is_corrupt(&self) -> bool {
        self.corrupt
    }

    #[cfg(test)]
    pub(crate) fn segment_total(&self) -> usize {
        self.segments.total_len()
    }
}
