//! Declarative QPACK instruction languages and a generic, resumable parser.
//!
//! Every instruction on the encoder stream and every field line
//! representation inside a header block (RFC 9204 Section 4) is a first
//! byte matched against an opcode pattern followed by a fixed sequence of
//! typed fields. Each instruction set is described once as data and
//! driven by a single [`InstructionDecoder`], so prefix widths, Huffman
//! handling and the string length limit are enforced in one place.
//!
//! The parser consumes input incrementally: it may stop between any two
//! bytes and continues when more bytes arrive.

use bytes::Bytes;

use crate::error::{ParseError, MAX_STRING_LITERAL_LEN};
use crate::huffman;
use crate::prefix_int::IntegerDecoder;

/// One typed field of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Single flag bit of the current byte, selected by mask. Consumes nothing.
    SBit(u8),
    /// Prefixed integer with the given prefix width.
    Varint(u8),
    /// Second prefixed integer, stored separately from [`Field::Varint`].
    Varint2(u8),
    /// Name string: Huffman flag just above a length prefix of this width.
    Name(u8),
    /// Value string: Huffman flag just above a length prefix of this width.
    Value(u8),
}

impl Field {
    fn prefix_bits(self) -> u8 {
        match self {
            Field::SBit(_) => 0,
            Field::Varint(n) | Field::Varint2(n) | Field::Name(n) | Field::Value(n) => n,
        }
    }

    fn is_string(self) -> bool {
        matches!(self, Field::Name(_) | Field::Value(_))
    }
}

/// Bit pattern selecting an instruction from its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub value: u8,
    pub mask: u8,
}

impl Opcode {
    const fn new(value: u8, mask: u8) -> Self {
        Self { value, mask }
    }

    fn matches(self, byte: u8) -> bool {
        byte & self.mask == self.value
    }
}

/// The shape of one instruction.
#[derive(Debug)]
pub struct Instruction<T: 'static> {
    pub tag: T,
    pub opcode: Opcode,
    pub fields: &'static [Field],
}

/// Encoder stream instructions (RFC 9204 Section 4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderStreamOp {
    SetCapacity,
    InsertWithNameRef,
    InsertWithoutNameRef,
    Duplicate,
}

/// Field line representations (RFC 9204 Section 4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLineOp {
    Indexed,
    IndexedPostBase,
    LiteralWithNameRef,
    LiteralWithPostBaseNameRef,
    LiteralWithLiteralName,
}

/// The encoded field section prefix (RFC 9204 Section 4.5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Prefix,
}

pub static ENCODER_STREAM_LANGUAGE: [Instruction<EncoderStreamOp>; 4] = [
    // 1Txxxxxx
    Instruction {
        tag: EncoderStreamOp::InsertWithNameRef,
        opcode: Opcode::new(0x80, 0x80),
        fields: &[Field::SBit(0x40), Field::Varint(6), Field::Value(7)],
    },
    // 01Hxxxxx
    Instruction {
        tag: EncoderStreamOp::InsertWithoutNameRef,
        opcode: Opcode::new(0x40, 0xC0),
        fields: &[Field::Name(5), Field::Value(7)],
    },
    // 001xxxxx
    Instruction {
        tag: EncoderStreamOp::SetCapacity,
        opcode: Opcode::new(0x20, 0xE0),
        fields: &[Field::Varint(5)],
    },
    // 000xxxxx
    Instruction {
        tag: EncoderStreamOp::Duplicate,
        opcode: Opcode::new(0x00, 0xE0),
        fields: &[Field::Varint(5)],
    },
];

pub static FIELD_LINE_LANGUAGE: [Instruction<FieldLineOp>; 5] = [
    // 1Txxxxxx
    Instruction {
        tag: FieldLineOp::Indexed,
        opcode: Opcode::new(0x80, 0x80),
        fields: &[Field::SBit(0x40), Field::Varint(6)],
    },
    // 01NTxxxx
    Instruction {
        tag: FieldLineOp::LiteralWithNameRef,
        opcode: Opcode::new(0x40, 0xC0),
        fields: &[Field::SBit(0x10), Field::Varint(4), Field::Value(7)],
    },
    // 001NHxxx
    Instruction {
        tag: FieldLineOp::LiteralWithLiteralName,
        opcode: Opcode::new(0x20, 0xE0),
        fields: &[Field::Name(3), Field::Value(7)],
    },
    // 0001xxxx
    Instruction {
        tag: FieldLineOp::IndexedPostBase,
        opcode: Opcode::new(0x10, 0xF0),
        fields: &[Field::Varint(4)],
    },
    // 0000Nxxx
    Instruction {
        tag: FieldLineOp::LiteralWithPostBaseNameRef,
        opcode: Opcode::new(0x00, 0xF0),
        fields: &[Field::Varint(3), Field::Value(7)],
    },
];

/// Encoded Required Insert Count, then sign bit and Delta Base.
pub static PREFIX_LANGUAGE: [Instruction<PrefixOp>; 1] = [Instruction {
    tag: PrefixOp::Prefix,
    opcode: Opcode::new(0x00, 0x00),
    fields: &[Field::Varint(8), Field::SBit(0x80), Field::Varint2(7)],
}];

/// A fully parsed instruction. Fields the instruction does not carry keep
/// their default values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded<T> {
    pub tag: T,
    pub s_bit: bool,
    pub varint: u64,
    pub varint2: u64,
    pub name: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    StartInstruction,
    StartField,
    VarintStart,
    VarintResume,
    ReadString,
}

/// Generic resumable parser driven by an instruction language.
pub struct InstructionDecoder<T: Copy + 'static> {
    language: &'static [Instruction<T>],
    state: State,
    instruction: Option<&'static Instruction<T>>,
    field_index: usize,
    integer: IntegerDecoder,
    s_bit: bool,
    varint: u64,
    varint2: u64,
    is_huffman: bool,
    string_length: usize,
    string: Vec<u8>,
    name: Bytes,
    value: Bytes,
}

impl<T: Copy + 'static> InstructionDecoder<T> {
    pub fn new(language: &'static [Instruction<T>]) -> Self {
        Self {
            language,
            state: State::StartInstruction,
            instruction: None,
            field_index: 0,
            integer: IntegerDecoder::new(),
            s_bit: false,
            varint: 0,
            varint2: 0,
            is_huffman: false,
            string_length: 0,
            string: Vec::new(),
            name: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// Returns true if no instruction is partially parsed.
    pub fn is_idle(&self) -> bool {
        self.state == State::StartInstruction
    }

    /// Parses at most one instruction from the front of `data`, advancing
    /// the slice past every consumed byte.
    ///
    /// Returns `Ok(None)` once `data` is exhausted without completing an
    /// instruction; the partial state is kept for the next call. After an
    /// error the parser must not be used again.
    pub fn next(&mut self, data: &mut &[u8]) -> Result<Option<Decoded<T>>, ParseError> {
        loop {
            match self.state {
                State::StartInstruction => {
                    let Some(&byte) = data.first() else {
                        return Ok(None);
                    };
                    self.begin_instruction(byte);
                }
                State::StartField => {
                    let Some(instruction) = self.instruction else {
                        // Empty language: nothing can be parsed.
                        self.state = State::StartInstruction;
                        return Ok(None);
                    };
                    let Some(&field) = instruction.fields.get(self.field_index) else {
                        self.state = State::StartInstruction;
                        return Ok(Some(self.take_decoded(instruction.tag)));
                    };
                    match field {
                        Field::SBit(mask) => {
                            let Some(&byte) = data.first() else {
                                return Ok(None);
                            };
                            self.s_bit = byte & mask != 0;
                            self.field_index += 1;
                        }
                        _ => self.state = State::VarintStart,
                    }
                }
                State::VarintStart => {
                    let Some((&byte, rest)) = data.split_first() else {
                        return Ok(None);
                    };
                    *data = rest;
                    let field = self.current_field();
                    if field.is_string() {
                        self.is_huffman = byte & (1 << field.prefix_bits()) != 0;
                    }
                    match self.integer.start(field.prefix_bits(), byte) {
                        Some(value) => self.on_varint_done(value)?,
                        None => self.state = State::VarintResume,
                    }
                }
                State::VarintResume => {
                    if data.is_empty() {
                        return Ok(None);
                    }
                    let (consumed, value) = self.integer.resume(data)?;
                    *data = &data[consumed..];
                    match value {
                        Some(value) => self.on_varint_done(value)?,
                        None => return Ok(None),
                    }
                }
                State::ReadString => {
                    let wanted = self.string_length - self.string.len();
                    let available = wanted.min(data.len());
                    self.string.extend_from_slice(&data[..available]);
                    *data = &data[available..];
                    if self.string.len() < self.string_length {
                        return Ok(None);
                    }
                    self.on_string_done()?;
                }
            }
        }
    }

    fn begin_instruction(&mut self, byte: u8) {
        // Longest matching pattern wins; every language covers all first bytes.
        let instruction = self
            .language
            .iter()
            .filter(|i| i.opcode.matches(byte))
            .max_by_key(|i| i.opcode.mask.count_ones())
            .or_else(|| self.language.last());
        debug_assert!(
            self.language.iter().any(|i| i.opcode.matches(byte)),
            "no opcode matches {byte:#04x}"
        );
        self.instruction = instruction;
        self.field_index = 0;
        self.s_bit = false;
        self.varint = 0;
        self.varint2 = 0;
        self.name = Bytes::new();
        self.value = Bytes::new();
        self.state = State::StartField;
    }

    fn current_field(&self) -> Field {
        self.instruction
            .and_then(|i| i.fields.get(self.field_index).copied())
            .unwrap_or(Field::Varint(8))
    }

    fn on_varint_done(&mut self, value: u64) -> Result<(), ParseError> {
        match self.current_field() {
            Field::Varint(_) => self.varint = value,
            Field::Varint2(_) => self.varint2 = value,
            Field::Name(_) | Field::Value(_) => {
                let length = usize::try_from(value)
                    .ok()
                    .filter(|len| *len <= MAX_STRING_LITERAL_LEN)
                    .ok_or(ParseError::StringLiteralTooLong)?;
                self.string_length = length;
                self.string = Vec::with_capacity(length.min(16 * 1024));
                self.state = State::ReadString;
                return Ok(());
            }
            Field::SBit(_) => {}
        }
        self.field_index += 1;
        self.state = State::StartField;
        Ok(())
    }

    fn on_string_done(&mut self) -> Result<(), ParseError> {
        let raw = std::mem::take(&mut self.string);
        let decoded = if self.is_huffman {
            let mut out = Vec::with_capacity(raw.len() * 8 / 5);
            huffman::decode(&raw, &mut out).map_err(|_| ParseError::Huffman)?;
            if out.len() > MAX_STRING_LITERAL_LEN {
                return Err(ParseError::StringLiteralTooLong);
            }
            out
        } else {
            raw
        };

        match self.current_field() {
            Field::Name(_) => self.name = Bytes::from(decoded),
            _ => self.value = Bytes::from(decoded),
        }
        self.field_index += 1;
        self.state = State::StartField;
        Ok(())
    }

    fn take_decoded(&mut self, tag: T) -> Decoded<T> {
        Decoded {
            tag,
            s_bit: self.s_bit,
            varint: self.varint,
            varint2: self.varint2,
            name: std::mem::take(&mut self.name),
            value: std::mem::take(&mut self.value),
        }
    }
}
