//! Decoder stream instructions and their sender (RFC 9204 Section 4.4).
//!
//! Decoder stream instructions:
//! - Section Acknowledgement
//! - Stream Cancellation
//! - Insert Count Increment

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::prefix_int::encode_int;

/// Decoder stream instruction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderInstruction {
    /// Section Acknowledgement.
    /// Pattern: 1xxxxxxx (stream ID with 7-bit prefix)
    SectionAck { stream_id: u64 },

    /// Stream Cancellation.
    /// Pattern: 01xxxxxx (stream ID with 6-bit prefix)
    StreamCancel { stream_id: u64 },

    /// Insert Count Increment.
    /// Pattern: 00xxxxxx (increment with 6-bit prefix)
    InsertCountIncrement { increment: u64 },
}

impl DecoderInstruction {
    /// Appends the wire encoding to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match *self {
            DecoderInstruction::SectionAck { stream_id } => encode_int(stream_id, 7, 0x80, buf),
            DecoderInstruction::StreamCancel { stream_id } => encode_int(stream_id, 6, 0x40, buf),
            DecoderInstruction::InsertCountIncrement { increment } => {
                encode_int(increment, 6, 0x00, buf)
            }
        }
    }
}

/// Buffers decoder stream instructions until the connection flushes them.
#[derive(Debug, Default)]
pub struct DecoderStreamSender {
    buffer: BytesMut,
    known_received_count: u64,
}

impl DecoderStreamSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last insert count the peer has been told about, by any instruction.
    pub fn known_received_count(&self) -> u64 {
        self.known_received_count
    }

    /// Acknowledges a fully decoded header block.
    pub fn send_header_acknowledgement(&mut self, stream_id: u64, required_insert_count: u64) {
        debug!(stream_id, required_insert_count, "sending section acknowledgement");
        self.push(DecoderInstruction::SectionAck { stream_id });
        self.known_received_count = self.known_received_count.max(required_insert_count);
    }

    /// Tells the peer a header block was abandoned before completion.
    pub fn send_stream_cancellation(&mut self, stream_id: u64) {
        debug!(stream_id, "sending stream cancellation");
        self.push(DecoderInstruction::StreamCancel { stream_id });
    }

    /// Emits an Insert Count Increment if the peer is behind `insert_count`.
    ///
    /// Returns true if an instruction was emitted.
    pub fn maybe_send_insert_count_increment(&mut self, insert_count: u64) -> bool {
        if insert_count <= self.known_received_count {
            return false;
        }
        let increment = insert_count - self.known_received_count;
        debug!(increment, insert_count, "sending insert count increment");
        self.push(DecoderInstruction::InsertCountIncrement { increment });
        self.known_received_count = insert_count;
        true
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Takes every buffered byte.
    pub fn flush(&mut self) -> Bytes {
        self.buffer.split().freeze()
    }

    fn push(&mut self, instruction: DecoderInstruction) {
        instruction.encode(&mut self.buffer);
    }
}
