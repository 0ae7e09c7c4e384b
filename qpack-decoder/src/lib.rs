//! QPACK header block decoder for HTTP/3 (RFC 9204).
//!
//! This crate implements the decoding half of QPACK:
//!
//! - **Encoder stream**: Set Dynamic Table Capacity, Insert With Name
//!   Reference, Insert With Literal Name and Duplicate, applied to the
//!   dynamic table as they arrive.
//! - **Header blocks**: progressive decoding of arbitrarily fragmented
//!   blocks, including blocks that reference entries not yet inserted.
//!   Such blocks are parked and resumed, oldest first, once the entries
//!   arrive.
//! - **Decoder stream**: Section Acknowledgement, Stream Cancellation and
//!   batched Insert Count Increment instructions for the peer's encoder.
//!
//! Everything is single-threaded and synchronous. The caller moves bytes
//! between the network and the decoder; results are delivered through
//! [`HeadersHandler`] and [`EncoderStreamErrorDelegate`].
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use qpack_decoder::{
//!     DecoderConfig, DecodingErrorKind, EncoderStreamErrorDelegate, EncoderStreamErrorKind,
//!     HeadersHandler, QpackDecoder,
//! };
//!
//! struct Print;
//!
//! impl HeadersHandler for Print {
//!     fn on_header_decoded(&mut self, name: Bytes, value: Bytes) {
//!         println!("{:?}: {:?}", name, value);
//!     }
//!     fn on_decoding_completed(&mut self) {}
//!     fn on_decoding_error_detected(&mut self, kind: DecodingErrorKind, detail: &str) {
//!         eprintln!("{kind:?}: {detail}");
//!     }
//! }
//!
//! impl EncoderStreamErrorDelegate for Print {
//!     fn on_encoder_stream_error(&mut self, kind: EncoderStreamErrorKind, detail: &str) {
//!         eprintln!("{kind:?}: {detail}");
//!     }
//! }
//!
//! let mut decoder = QpackDecoder::new(DecoderConfig::default(), Box::new(Print));
//!
//! // The block references an entry that has not been inserted yet.
//! decoder.begin_header_block(1, Box::new(Print));
//! decoder.decode_header_block(1, &[0x02, 0x00, 0x80]);
//! decoder.end_header_block(1);
//! assert_eq!(decoder.blocked_stream_count(), 1);
//!
//! // Set capacity to 1024 and insert ("foo", "bar").
//! decoder.decode_encoder_stream(b"\x3f\xe1\x07\x43foo\x03bar");
//! assert_eq!(decoder.blocked_stream_count(), 0);
//!
//! // Section Acknowledgement for stream 1.
//! assert_eq!(&decoder.flush_decoder_stream()[..], [0x81]);
//! ```

pub mod config;
pub mod decoder;
pub mod decoder_stream;
pub mod dynamic_table;
pub mod encoder_stream;
pub mod error;
pub mod field_line;
pub mod huffman;
pub mod instruction;
pub mod prefix_int;
pub mod progressive;
pub mod static_table;

// Re-export main types
pub use config::DecoderConfig;
pub use decoder::{EncoderStreamErrorDelegate, QpackDecoder};
pub use decoder_stream::{DecoderInstruction, DecoderStreamSender};
pub use dynamic_table::{DynamicTable, TableError};
pub use encoder_stream::{EncoderInstruction, EncoderStreamReceiver};
pub use error::{DecodingErrorKind, EncoderStreamErrorKind, Error, Result};
pub use field_line::FieldLine;
pub use progressive::{HeadersHandler, ProgressiveDecoder};

// Re-export utilities for peers and tests
pub use huffman::{decode as huffman_decode, encode as huffman_encode, encoded_size};
pub use prefix_int::{decode_int, encode_int};
