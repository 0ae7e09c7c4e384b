//! Connection-level QPACK decoder.
//!
//! [`QpackDecoder`] owns everything one HTTP/3 connection needs on the
//! decoding side: the dynamic table, the encoder stream receiver, the
//! decoder stream sender and one [`ProgressiveDecoder`] per header block in
//! flight. Header blocks are addressed by stream ID. The dynamic table's
//! wait list holds only those IDs, so dropping a block can never leave a
//! dangling wake-up behind.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::config::DecoderConfig;
use crate::decoder_stream::DecoderStreamSender;
use crate::dynamic_table::DynamicTable;
use crate::encoder_stream::EncoderStreamReceiver;
use crate::error::{DecodingErrorKind, EncoderStreamErrorKind, Error};
use crate::progressive::{HeadersHandler, Outcome, ProgressiveDecoder};

/// Receives the single, connection-fatal encoder stream error.
pub trait EncoderStreamErrorDelegate {
    fn on_encoder_stream_error(&mut self, kind: EncoderStreamErrorKind, detail: &str);
}

/// State shared by every header block of the connection.
struct Connection {
    config: DecoderConfig,
    table: DynamicTable,
    decoder_stream: DecoderStreamSender,
    blocks: HashMap<u64, ProgressiveDecoder>,
}

impl Connection {
    /// Resumes, oldest first, every block the current insert count unblocks.
    fn resume_unblocked(&mut self) {
        let max_entries = self.config.max_entries();
        for stream_id in self.table.take_unblocked() {
            let Some(block) = self.blocks.get_mut(&stream_id) else {
                continue;
            };
            let outcome = block.resume(&self.table, max_entries);
            self.handle_outcome(stream_id, outcome, true);
        }
    }

    fn handle_outcome(&mut self, stream_id: u64, outcome: Outcome, resumed: bool) {
        match outcome {
            Outcome::Pending => {}
            Outcome::Blocked {
                required_insert_count,
            } => {
                // A resumed block was already counted against the limit.
                if !resumed && self.table.blocked_count() as u64 >= self.config.max_blocked_streams
                {
                    warn!(
                        stream_id,
                        blocked = self.table.blocked_count(),
                        limit = self.config.max_blocked_streams,
                        "blocked streams limit exceeded"
                    );
                    if let Some(mut block) = self.blocks.remove(&stream_id) {
                        block.fail(DecodingErrorKind::TooManyBlockedStreams);
                    }
                    return;
                }
                self.table
                    .register_blocked(stream_id, required_insert_count);
            }
            Outcome::Completed {
                required_insert_count,
            } => {
                self.blocks.remove(&stream_id);
                if required_insert_count > 0 {
                    self.decoder_stream
                        .send_header_acknowledgement(stream_id, required_insert_count);
                }
            }
            Outcome::Failed => {
                self.blocks.remove(&stream_id);
                self.table.unregister_blocked(stream_id);
            }
        }
    }
}

/// QPACK decoder for one connection.
pub struct QpackDecoder {
    receiver: EncoderStreamReceiver,
    connection: Connection,
    error_delegate: Box<dyn EncoderStreamErrorDelegate>,
}

impl QpackDecoder {
    /// Creates a decoder enforcing the settings this endpoint advertised.
    ///
    /// Settings that fail [`DecoderConfig::validate`] are logged. A table
    /// capacity beyond `usize::MAX` is clamped to `usize::MAX`.
    pub fn new(config: DecoderConfig, error_delegate: Box<dyn EncoderStreamErrorDelegate>) -> Self {
        for problem in config.validate() {
            warn!(%problem, "invalid decoder configuration");
        }
        let max_capacity = usize::try_from(config.max_table_capacity).unwrap_or(usize::MAX);
        Self {
            receiver: EncoderStreamReceiver::new(),
            connection: Connection {
                config,
                table: DynamicTable::new(max_capacity),
                decoder_stream: DecoderStreamSender::new(),
                blocks: HashMap::new(),
            },
            error_delegate,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.connection.config
    }

    pub fn dynamic_table(&self) -> &DynamicTable {
        &self.connection.table
    }

    /// Number of header blocks waiting for dynamic table insertions.
    pub fn blocked_stream_count(&self) -> usize {
        self.connection.table.blocked_count()
    }

    /// Returns true once the encoder stream has been found corrupt.
    pub fn encoder_stream_error_detected(&self) -> bool {
        self.receiver.error_detected()
    }

    /// Feeds bytes received on the peer's encoder stream.
    ///
    /// Blocks unblocked by an instruction are resumed before the next
    /// instruction is applied. A malformed or inapplicable instruction is
    /// reported once to the error delegate; the rest of the stream is then
    /// ignored.
    pub fn decode_encoder_stream(&mut self, data: &[u8]) {
        let Self {
            receiver,
            connection,
            error_delegate,
        } = self;

        let result = receiver.decode(data, |instruction| {
            instruction.apply(&mut connection.table)?;
            connection.resume_unblocked();
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(Error::EncoderStream { kind, detail }) => {
                error_delegate.on_encoder_stream_error(kind, &detail)
            }
            Err(error) => warn!(%error, "unexpected error on encoder stream"),
        }
    }

    /// Starts a header block on `stream_id`. Any unfinished block on the
    /// same stream is discarded without callbacks.
    pub fn begin_header_block(&mut self, stream_id: u64, handler: Box<dyn HeadersHandler>) {
        let connection = &mut self.connection;
        if connection.blocks.remove(&stream_id).is_some() {
            debug!(stream_id, "replacing unfinished header block");
            connection.table.unregister_blocked(stream_id);
        }
        connection
            .blocks
            .insert(stream_id, ProgressiveDecoder::new(stream_id, handler));
    }

    /// Feeds the next fragment of the header block on `stream_id`.
    pub fn decode_header_block(&mut self, stream_id: u64, data: &[u8]) {
        let connection = &mut self.connection;
        let max_entries = connection.config.max_entries();
        let Some(block) = connection.blocks.get_mut(&stream_id) else {
            debug!(stream_id, len = data.len(), "no header block in progress");
            return;
        };
        let outcome = block.decode(data, &connection.table, max_entries);
        connection.handle_outcome(stream_id, outcome, false);
    }

    /// Signals that the header block on `stream_id` has been fully fed.
    pub fn end_header_block(&mut self, stream_id: u64) {
        let connection = &mut self.connection;
        let Some(block) = connection.blocks.get_mut(&stream_id) else {
            debug!(stream_id, "no header block in progress");
            return;
        };
        let outcome = block.end_header_block(&connection.table);
        connection.handle_outcome(stream_id, outcome, false);
    }

    /// Abandons the header block on `stream_id`, typically because the
    /// stream was reset. No callback is delivered for it afterwards.
    pub fn cancel_stream(&mut self, stream_id: u64) {
        let connection = &mut self.connection;
        if connection.blocks.remove(&stream_id).is_none() {
            return;
        }
        connection.table.unregister_blocked(stream_id);
        if connection.config.max_table_capacity > 0 {
            connection.decoder_stream.send_stream_cancellation(stream_id);
        }
    }

    /// Returns every byte pending on the decoder stream, preceded by an
    /// Insert Count Increment if the peer has not heard of all insertions.
    pub fn flush_decoder_stream(&mut self) -> Bytes {
        let connection = &mut self.connection;
        connection
            .decoder_stream
            .maybe_send_insert_count_increment(connection.table.insert_count());
        connection.decoder_stream.flush()
    }
}
