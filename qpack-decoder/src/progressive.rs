//! Progressive decoding of one header block.
//!
//! A header block (RFC 9204 Section 4.5) starts with a two-field prefix
//! giving the Required Insert Count and Base, followed by field line
//! representations. Bytes may arrive in arbitrary fragments. When a field
//! line references a dynamic entry that has not been inserted yet, the
//! decoder parks itself: the unresolved field line and all later bytes are
//! buffered until the connection resumes it after more insertions.
//!
//! Decoded fields are held back and delivered, in wire order, only once
//! the whole block has been decoded.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use crate::dynamic_table::{DynamicTable, TableError};
use crate::error::{DecodingErrorKind, Error};
use crate::field_line::FieldLine;
use crate::instruction::{
    Decoded, FieldLineOp, InstructionDecoder, PrefixOp, FIELD_LINE_LANGUAGE, PREFIX_LANGUAGE,
};
use crate::static_table;

/// Receives the result of decoding one header block.
pub trait HeadersHandler {
    /// Called once per field, in wire order, when decoding completes.
    fn on_header_decoded(&mut self, name: Bytes, value: Bytes);

    /// Called after the last field has been delivered.
    fn on_decoding_completed(&mut self);

    /// Called instead of any other callback if the block is malformed.
    fn on_decoding_error_detected(&mut self, kind: DecodingErrorKind, detail: &str);
}

/// Reconstructs the Required Insert Count from its encoded form
/// (RFC 9204 Section 4.5.1.1).
///
/// The encoding is only unique within a window of `2 * max_entries` values
/// around `total_inserts`, the decoder's own insert count, so that count
/// must be supplied. Returns `None` if no consistent value exists.
pub fn decode_required_insert_count(
    encoded: u64,
    max_entries: u64,
    total_inserts: u64,
) -> Option<u64> {
    if encoded == 0 {
        return Some(0);
    }

    let full_range = max_entries.checked_mul(2)?;
    if encoded > full_range {
        return None;
    }

    let max_value = total_inserts.checked_add(max_entries)?;
    let max_wrapped = (max_value / full_range) * full_range;
    let mut required_insert_count = max_wrapped + encoded - 1;

    if required_insert_count > max_value {
        if required_insert_count <= full_range {
            return None;
        }
        required_insert_count -= full_range;
    }

    if required_insert_count == 0 {
        return None;
    }
    Some(required_insert_count)
}

/// Computes Base from the Required Insert Count, sign bit and Delta Base.
pub fn compute_base(required_insert_count: u64, sign: bool, delta_base: u64) -> Option<u64> {
    if sign {
        delta_base
            .checked_add(1)
            .and_then(|d| required_insert_count.checked_sub(d))
    } else {
        required_insert_count.checked_add(delta_base)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ParsingPrefix,
    ParsingInstructions,
    Blocked,
    Complete,
    Errored,
}

/// What the owning connection must do after a call into the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Waiting for more bytes, still parked, or already finished.
    Pending,
    /// Newly parked; resume once the insert count reaches the threshold.
    Blocked { required_insert_count: u64 },
    /// All fields and the completion callback were delivered.
    Completed { required_insert_count: u64 },
    /// The error callback was delivered.
    Failed,
}

/// Result of resolving one field line.
enum Resolution {
    Resolved(FieldLine),
    Blocked { required_insert_count: u64 },
}

/// Decoder for a single header block.
pub struct ProgressiveDecoder {
    stream_id: u64,
    state: State,
    prefix_parser: InstructionDecoder<PrefixOp>,
    field_parser: InstructionDecoder<FieldLineOp>,
    /// Bytes received while blocked.
    buffer: BytesMut,
    /// Field line that blocked, retried first on resumption.
    pending: Option<Decoded<FieldLineOp>>,
    required_insert_count: u64,
    base: u64,
    /// One more than the largest absolute index referenced so far.
    required_insert_count_so_far: u64,
    headers: Vec<FieldLine>,
    end_of_block: bool,
    handler: Box<dyn HeadersHandler>,
}

impl ProgressiveDecoder {
    pub fn new(stream_id: u64, handler: Box<dyn HeadersHandler>) -> Self {
        Self {
            stream_id,
            state: State::ParsingPrefix,
            prefix_parser: InstructionDecoder::new(&PREFIX_LANGUAGE),
            field_parser: InstructionDecoder::new(&FIELD_LINE_LANGUAGE),
            buffer: BytesMut::new(),
            pending: None,
            required_insert_count: 0,
            base: 0,
            required_insert_count_so_far: 0,
            headers: Vec::new(),
            end_of_block: false,
            handler,
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.state == State::Blocked
    }

    /// Feeds the next fragment of the block.
    pub(crate) fn decode(&mut self, data: &[u8], table: &DynamicTable, max_entries: u64) -> Outcome {
        match self.state {
            State::Blocked => {
                self.buffer.extend_from_slice(data);
                Outcome::Pending
            }
            State::ParsingPrefix | State::ParsingInstructions => {
                self.process(data, table, max_entries)
            }
            State::Complete | State::Errored => Outcome::Pending,
        }
    }

    /// Signals that every byte of the block has been fed.
    pub(crate) fn end_header_block(&mut self, table: &DynamicTable) -> Outcome {
        self.end_of_block = true;
        match self.state {
            State::ParsingPrefix => self.fail(DecodingErrorKind::IncompletePrefix),
            State::ParsingInstructions => self.finish(table),
            State::Blocked | State::Complete | State::Errored => Outcome::Pending,
        }
    }

    /// Continues after the insert count reached the blocking threshold.
    pub(crate) fn resume(&mut self, table: &DynamicTable, max_entries: u64) -> Outcome {
        if self.state != State::Blocked {
            return Outcome::Pending;
        }
        debug!(
            stream_id = self.stream_id,
            insert_count = table.insert_count(),
            "header block unblocked"
        );
        self.state = State::ParsingInstructions;

        if let Some(field_line) = self.pending.take() {
            match self.resolve(&field_line, table) {
                Ok(Resolution::Resolved(field)) => self.headers.push(field),
                Ok(Resolution::Blocked {
                    required_insert_count,
                }) => {
                    self.pending = Some(field_line);
                    self.state = State::Blocked;
                    return Outcome::Blocked {
                        required_insert_count,
                    };
                }
                Err(kind) => return self.fail(kind),
            }
        }

        let buffered = std::mem::take(&mut self.buffer).freeze();
        match self.process(&buffered, table, max_entries) {
            Outcome::Pending if self.end_of_block => self.end_header_block(table),
            outcome => outcome,
        }
    }

    /// Reports `kind` to the handler and makes the decoder inert.
    pub(crate) fn fail(&mut self, kind: DecodingErrorKind) -> Outcome {
        if matches!(self.state, State::Complete | State::Errored) {
            return Outcome::Pending;
        }
        let error = Error::decompression(kind);
        debug!(stream_id = self.stream_id, %error, "header block decoding failed");
        self.state = State::Errored;
        self.headers.clear();
        self.buffer.clear();
        self.pending = None;
        self.handler
            .on_decoding_error_detected(kind, kind.detail());
        Outcome::Failed
    }

    fn process(&mut self, mut data: &[u8], table: &DynamicTable, max_entries: u64) -> Outcome {
        if self.state == State::ParsingPrefix {
            match self.prefix_parser.next(&mut data) {
                Ok(Some(prefix)) => {
                    if let Err(kind) = self.on_prefix(&prefix, table, max_entries) {
                        return self.fail(kind);
                    }
                }
                Ok(None) => return Outcome::Pending,
                Err(e) => return self.fail(e.into()),
            }
        }

        loop {
            let field_line = match self.field_parser.next(&mut data) {
                Ok(Some(field_line)) => field_line,
                Ok(None) => return Outcome::Pending,
                Err(e) => return self.fail(e.into()),
            };
            match self.resolve(&field_line, table) {
                Ok(Resolution::Resolved(field)) => self.headers.push(field),
                Ok(Resolution::Blocked {
                    required_insert_count,
                }) => {
                    debug!(
                        stream_id = self.stream_id,
                        required_insert_count,
                        insert_count = table.insert_count(),
                        "header block blocked"
                    );
                    self.pending = Some(field_line);
                    self.buffer.extend_from_slice(data);
                    self.state = State::Blocked;
                    return Outcome::Blocked {
                        required_insert_count,
                    };
                }
                Err(kind) => return self.fail(kind),
            }
        }
    }

    fn on_prefix(
        &mut self,
        prefix: &Decoded<PrefixOp>,
        table: &DynamicTable,
        max_entries: u64,
    ) -> Result<(), DecodingErrorKind> {
        self.required_insert_count =
            decode_required_insert_count(prefix.varint, max_entries, table.insert_count())
                .ok_or(DecodingErrorKind::InvalidRequiredInsertCount)?;
        self.base = compute_base(self.required_insert_count, prefix.s_bit, prefix.varint2)
            .ok_or(DecodingErrorKind::NegativeBase)?;
        self.state = State::ParsingInstructions;
        trace!(
            stream_id = self.stream_id,
            required_insert_count = self.required_insert_count,
            base = self.base,
            "header block prefix decoded"
        );
        Ok(())
    }

    fn finish(&mut self, table: &DynamicTable) -> Outcome {
        if !self.field_parser.is_idle() {
            return self.fail(DecodingErrorKind::IncompleteBlock);
        }
        if self.required_insert_count != self.required_insert_count_so_far {
            return self.fail(DecodingErrorKind::RequiredInsertCountTooLarge);
        }

        trace!(
            stream_id = self.stream_id,
            fields = self.headers.len(),
            insert_count = table.insert_count(),
            "header block decoded"
        );
        self.state = State::Complete;
        for field in self.headers.drain(..) {
            self.handler.on_header_decoded(field.name, field.value);
        }
        self.handler.on_decoding_completed();
        Outcome::Completed {
            required_insert_count: self.required_insert_count,
        }
    }

    fn resolve(
        &mut self,
        field_line: &Decoded<FieldLineOp>,
        table: &DynamicTable,
    ) -> Result<Resolution, DecodingErrorKind> {
        let index = field_line.varint;
        match field_line.tag {
            FieldLineOp::Indexed if field_line.s_bit => Ok(Resolution::Resolved(
                static_entry(index)?.to_field_line(),
            )),
            FieldLineOp::Indexed => {
                let absolute_index = self.relative_to_absolute(index)?;
                self.with_dynamic_entry(absolute_index, table, |entry| entry.clone())
            }
            FieldLineOp::IndexedPostBase => {
                let absolute_index = self.post_base_to_absolute(index)?;
                self.with_dynamic_entry(absolute_index, table, |entry| entry.clone())
            }
            FieldLineOp::LiteralWithNameRef if field_line.s_bit => {
                let name = Bytes::from_static(static_entry(index)?.name);
                Ok(Resolution::Resolved(FieldLine::new(
                    name,
                    field_line.value.clone(),
                )))
            }
            FieldLineOp::LiteralWithNameRef => {
                let absolute_index = self.relative_to_absolute(index)?;
                self.with_dynamic_entry(absolute_index, table, |entry| {
                    FieldLine::new(entry.name.clone(), field_line.value.clone())
                })
            }
            FieldLineOp::LiteralWithPostBaseNameRef => {
                let absolute_index = self.post_base_to_absolute(index)?;
                self.with_dynamic_entry(absolute_index, table, |entry| {
                    FieldLine::new(entry.name.clone(), field_line.value.clone())
                })
            }
            FieldLineOp::LiteralWithLiteralName => Ok(Resolution::Resolved(FieldLine::new(
                field_line.name.clone(),
                field_line.value.clone(),
            ))),
        }
    }

    fn relative_to_absolute(&self, relative_index: u64) -> Result<u64, DecodingErrorKind> {
        relative_index
            .checked_add(1)
            .and_then(|r| self.base.checked_sub(r))
            .ok_or(DecodingErrorKind::InvalidRelativeIndex)
    }

    fn post_base_to_absolute(&self, post_base_index: u64) -> Result<u64, DecodingErrorKind> {
        self.base
            .checked_add(post_base_index)
            .ok_or(DecodingErrorKind::InvalidPostBaseIndex)
    }

    /// Looks up a dynamic entry, or reports the threshold to block on.
    fn with_dynamic_entry<F>(
        &mut self,
        absolute_index: u64,
        table: &DynamicTable,
        build: F,
    ) -> Result<Resolution, DecodingErrorKind>
    where
        F: FnOnce(&FieldLine) -> FieldLine,
    {
        if absolute_index >= self.required_insert_count {
            return Err(DecodingErrorKind::IndexNotBelowRequiredInsertCount);
        }
        self.required_insert_count_so_far =
            self.required_insert_count_so_far.max(absolute_index + 1);

        match table.lookup(absolute_index) {
            Ok(entry) => Ok(Resolution::Resolved(build(entry))),
            Err(TableError::NotYetInserted(_)) => Ok(Resolution::Blocked {
                required_insert_count: absolute_index + 1,
            }),
            Err(_) => Err(DecodingErrorKind::EntryEvicted),
        }
    }
}

fn static_entry(index: u64) -> Result<&'static static_table::StaticEntry, DecodingErrorKind> {
    static_table::get(index).ok_or(DecodingErrorKind::StaticEntryNotFound)
}
