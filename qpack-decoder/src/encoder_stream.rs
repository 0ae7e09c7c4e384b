//! Encoder stream receiver.
//!
//! Parses the peer's encoder stream (RFC 9204 Section 4.3) into
//! [`EncoderInstruction`]s and applies them to the dynamic table. Any
//! failure is connection-fatal: it is reported once and every later byte
//! on the stream is ignored.

use bytes::Bytes;
use tracing::{trace, warn};

use crate::dynamic_table::{DynamicTable, TableError};
use crate::error::{EncoderStreamErrorKind, Error, Result};
use crate::field_line::FieldLine;
use crate::instruction::{
    Decoded, EncoderStreamOp, InstructionDecoder, ENCODER_STREAM_LANGUAGE,
};
use crate::static_table;

/// Encoder stream instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderInstruction {
    /// Set Dynamic Table Capacity.
    /// Pattern: 001xxxxx (capacity with 5-bit prefix)
    SetCapacity { capacity: u64 },

    /// Insert With Name Reference.
    /// Pattern: 1Txxxxxx (T=1 static, T=0 dynamic relative, 6-bit prefix)
    InsertWithNameRef {
        is_static: bool,
        name_index: u64,
        value: Bytes,
    },

    /// Insert With Literal Name.
    /// Pattern: 01Hxxxxx (H=Huffman flag, name length with 5-bit prefix)
    InsertWithoutNameRef { name: Bytes, value: Bytes },

    /// Duplicate existing dynamic table entry.
    /// Pattern: 000xxxxx (relative index with 5-bit prefix)
    Duplicate { index: u64 },
}

impl From<Decoded<EncoderStreamOp>> for EncoderInstruction {
    fn from(decoded: Decoded<EncoderStreamOp>) -> Self {
        match decoded.tag {
            EncoderStreamOp::SetCapacity => EncoderInstruction::SetCapacity {
                capacity: decoded.varint,
            },
            EncoderStreamOp::InsertWithNameRef => EncoderInstruction::InsertWithNameRef {
                is_static: decoded.s_bit,
                name_index: decoded.varint,
                value: decoded.value,
            },
            EncoderStreamOp::InsertWithoutNameRef => EncoderInstruction::InsertWithoutNameRef {
                name: decoded.name,
                value: decoded.value,
            },
            EncoderStreamOp::Duplicate => EncoderInstruction::Duplicate {
                index: decoded.varint,
            },
        }
    }
}

impl EncoderInstruction {
    /// Applies the instruction to `table` as one indivisible step.
    pub fn apply(self, table: &mut DynamicTable) -> Result<()> {
        use EncoderStreamErrorKind as Kind;

        match self {
            EncoderInstruction::SetCapacity { capacity } => {
                table
                    .set_capacity(capacity)
                    .map_err(|_| Error::encoder_stream(Kind::SetCapacityFailed))?;
            }
            EncoderInstruction::InsertWithNameRef {
                is_static,
                name_index,
                value,
            } => {
                let name = if is_static {
                    static_table::get(name_index)
                        .map(|e| Bytes::from_static(e.name))
                        .ok_or_else(|| Error::encoder_stream(Kind::InvalidStaticIndex))?
                } else {
                    table
                        .get_relative(name_index)
                        .map(|e| e.name.clone())
                        .map_err(lookup_error)?
                };
                table
                    .insert(FieldLine::new(name, value))
                    .map_err(|_| Error::encoder_stream(Kind::InsertWithNameRefFailed))?;
            }
            EncoderInstruction::InsertWithoutNameRef { name, value } => {
                table
                    .insert(FieldLine::new(name, value))
                    .map_err(|_| Error::encoder_stream(Kind::InsertLiteralFailed))?;
            }
            EncoderInstruction::Duplicate { index } => {
                table.duplicate(index).map_err(|e| match e {
                    TableError::InvalidRelativeIndex(_) | TableError::Evicted(_) => lookup_error(e),
                    _ => Error::encoder_stream(Kind::DuplicateFailed),
                })?;
            }
        }
        Ok(())
    }
}

fn lookup_error(e: TableError) -> Error {
    match e {
        TableError::Evicted(_) => Error::encoder_stream(EncoderStreamErrorKind::EntryNotFound),
        _ => Error::encoder_stream(EncoderStreamErrorKind::InvalidRelativeIndex),
    }
}

/// Receives the peer's encoder stream.
pub struct EncoderStreamReceiver {
    parser: InstructionDecoder<EncoderStreamOp>,
    error_detected: bool,
}

impl Default for EncoderStreamReceiver {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderStreamReceiver {
    pub fn new() -> Self {
        Self {
            parser: InstructionDecoder::new(&ENCODER_STREAM_LANGUAGE),
            error_detected: false,
        }
    }

    /// Returns true once the stream has been found corrupt.
    pub fn error_detected(&self) -> bool {
        self.error_detected
    }

    /// Parses `data`, handing each complete instruction to `on_instruction`
    /// in wire order.
    ///
    /// The first error, from parsing or from `on_instruction`, is returned
    /// and stops processing for good: later calls consume nothing and
    /// return `Ok(())`.
    pub fn decode<F>(&mut self, mut data: &[u8], mut on_instruction: F) -> Result<()>
    where
        F: FnMut(EncoderInstruction) -> Result<()>,
    {
        if self.error_detected {
            trace!(len = data.len(), "ignoring encoder stream data after error");
            return Ok(());
        }

        loop {
            let decoded = match self.parser.next(&mut data) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => return Ok(()),
                Err(e) => return Err(self.fail(Error::encoder_stream(e.into()))),
            };
            let instruction = EncoderInstruction::from(decoded);
            trace!(?instruction, "encoder stream instruction");
            if let Err(e) = on_instruction(instruction) {
                return Err(self.fail(e));
            }
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        warn!(%error, "encoder stream error");
        self.error_detected = true;
        error
    }
}
