//! Error types for QPACK decoding.
//!
//! Two independent channels exist, mirroring the HTTP/3 error codes of
//! RFC 9204 Section 6:
//!
//! - header block errors are scoped to a single request stream and map to
//!   `QPACK_DECOMPRESSION_FAILED` (0x0200);
//! - encoder stream errors are fatal for the whole connection and map to
//!   `QPACK_ENCODER_STREAM_ERROR` (0x0201).
//!
//! Every error carries a closed, machine-checkable kind plus a fixed
//! human-readable detail string.

use std::fmt;

use thiserror::Error;

/// Result type for QPACK operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Maximum length of a string literal, before and after Huffman decoding.
pub const MAX_STRING_LITERAL_LEN: usize = 1024 * 1024;

/// Errors detected while decoding a header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodingErrorKind {
    /// A prefixed integer does not fit in 62 bits.
    IntegerTooLarge,
    /// A string literal exceeds [`MAX_STRING_LITERAL_LEN`].
    StringLiteralTooLong,
    /// Huffman data contains EOS or has invalid padding.
    HuffmanError,
    /// The block ended before both prefix fields were read.
    IncompletePrefix,
    /// The block ended in the middle of a field line.
    IncompleteBlock,
    /// A relative index points below absolute index zero.
    InvalidRelativeIndex,
    /// A post-base index overflows.
    InvalidPostBaseIndex,
    /// The referenced dynamic entry has been evicted.
    EntryEvicted,
    /// The Required Insert Count is larger than the block needed.
    RequiredInsertCountTooLarge,
    /// A reference is not below the Required Insert Count.
    IndexNotBelowRequiredInsertCount,
    /// The encoded Required Insert Count has no consistent value.
    InvalidRequiredInsertCount,
    /// Base computes to a negative value.
    NegativeBase,
    /// Static table index out of range.
    StaticEntryNotFound,
    /// Blocking this block would exceed the blocked streams limit.
    TooManyBlockedStreams,
}

impl DecodingErrorKind {
    /// Fixed detail string reported alongside this kind.
    pub fn detail(self) -> &'static str {
        match self {
            Self::IntegerTooLarge => "Encoded integer too large.",
            Self::StringLiteralTooLong => "String literal too long.",
            Self::HuffmanError => "Error in Huffman-encoded string.",
            Self::IncompletePrefix => "Incomplete header data prefix.",
            Self::IncompleteBlock => "Incomplete header block.",
            Self::InvalidRelativeIndex => "Invalid relative index.",
            Self::InvalidPostBaseIndex => "Invalid post-base index.",
            Self::EntryEvicted => "Dynamic table entry already evicted.",
            Self::RequiredInsertCountTooLarge => "Required Insert Count too large.",
            Self::IndexNotBelowRequiredInsertCount => {
                "Absolute Index must be smaller than Required Insert Count."
            }
            Self::InvalidRequiredInsertCount => "Error decoding Required Insert Count.",
            Self::NegativeBase => "Error calculating Base.",
            Self::StaticEntryNotFound => "Static table entry not found.",
            Self::TooManyBlockedStreams => "Limit on number of blocked streams exceeded.",
        }
    }
}

impl fmt::Display for DecodingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.detail())
    }
}

/// Errors detected on the encoder stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderStreamErrorKind {
    IntegerTooLarge,
    StringLiteralTooLong,
    HuffmanError,
    /// Insert With Name Reference names a missing static entry.
    InvalidStaticIndex,
    /// A relative index is not below the current insert count.
    InvalidRelativeIndex,
    /// A relative index refers to an evicted entry.
    EntryNotFound,
    /// The entry referencing an existing name does not fit.
    InsertWithNameRefFailed,
    /// The literal entry does not fit.
    InsertLiteralFailed,
    /// The duplicated entry does not fit.
    DuplicateFailed,
    /// The new capacity exceeds the negotiated maximum.
    SetCapacityFailed,
}

impl EncoderStreamErrorKind {
    /// Fixed detail string reported alongside this kind.
    pub fn detail(self) -> &'static str {
        match self {
            Self::IntegerTooLarge => "Encoded integer too large.",
            Self::StringLiteralTooLong => "String literal too long.",
            Self::HuffmanError => "Error in Huffman-encoded string.",
            Self::InvalidStaticIndex => "Invalid static table entry.",
            Self::InvalidRelativeIndex => "Invalid relative index.",
            Self::EntryNotFound => "Dynamic table entry not found.",
            Self::InsertWithNameRefFailed => "Error inserting entry with name reference.",
            Self::InsertLiteralFailed => "Error inserting literal entry.",
            Self::DuplicateFailed => "Error duplicating dynamic table entry.",
            Self::SetCapacityFailed => "Error updating dynamic table capacity.",
        }
    }
}

impl fmt::Display for EncoderStreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.detail())
    }
}

/// Errors that can occur during QPACK decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Decoding of a header block failed.
    ///
    /// Maps to HTTP/3 error code `QPACK_DECOMPRESSION_FAILED` (0x0200).
    /// The affected stream should be closed.
    #[error("decompression failed: {detail}")]
    Decompression {
        kind: DecodingErrorKind,
        detail: String,
    },

    /// The encoder stream is corrupt.
    ///
    /// Maps to HTTP/3 error code `QPACK_ENCODER_STREAM_ERROR` (0x0201).
    /// The connection should be closed.
    #[error("encoder stream error: {detail}")]
    EncoderStream {
        kind: EncoderStreamErrorKind,
        detail: String,
    },
}

impl Error {
    /// Header block error with the kind's fixed detail.
    pub fn decompression(kind: DecodingErrorKind) -> Self {
        Error::Decompression {
            kind,
            detail: kind.detail().to_owned(),
        }
    }

    /// Encoder stream error with the kind's fixed detail.
    pub fn encoder_stream(kind: EncoderStreamErrorKind) -> Self {
        Error::EncoderStream {
            kind,
            detail: kind.detail().to_owned(),
        }
    }

    /// Returns the HTTP/3 error code for this error.
    pub fn error_code(&self) -> u64 {
        match self {
            Error::Decompression { .. } => 0x0200,
            Error::EncoderStream { .. } => 0x0201,
        }
    }

    /// Returns the human-readable detail.
    pub fn detail(&self) -> &str {
        match self {
            Error::Decompression { detail, .. } | Error::EncoderStream { detail, .. } => detail,
        }
    }

    /// Returns true if the whole connection must be closed.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Error::EncoderStream { .. })
    }
}

/// Failure of the generic instruction parser, before it is attributed to a
/// particular stream.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("integer too large")]
    IntegerTooLarge,
    #[error("string literal too long")]
    StringLiteralTooLong,
    #[error("invalid huffman string")]
    Huffman,
}

impl From<ParseError> for DecodingErrorKind {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::IntegerTooLarge => DecodingErrorKind::IntegerTooLarge,
            ParseError::StringLiteralTooLong => DecodingErrorKind::StringLiteralTooLong,
            ParseError::Huffman => DecodingErrorKind::HuffmanError,
        }
    }
}

impl From<ParseError> for EncoderStreamErrorKind {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::IntegerTooLarge => EncoderStreamErrorKind::IntegerTooLarge,
            ParseError::StringLiteralTooLong => EncoderStreamErrorKind::StringLiteralTooLong,
            ParseError::Huffman => EncoderStreamErrorKind::HuffmanError,
        }
    }
}
