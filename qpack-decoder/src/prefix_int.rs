//! Prefix integer encoding and decoding (RFC 7541 Section 5.1).
//!
//! An integer occupies the low N bits of a byte whose high bits carry an
//! opcode or flags. Values that do not fit use the all-ones prefix followed
//! by 7-bit continuation bytes, least significant group first.
//!
//! The decoder is resumable: input may end between any two bytes and
//! decoding continues when more bytes arrive. RFC 9204 limits values to
//! 62 bits.

use bytes::BufMut;

use crate::error::ParseError;

/// Maximum integer value that can be decoded (2^62 - 1).
pub const MAX_INTEGER: u64 = (1u64 << 62) - 1;

#[inline]
fn prefix_mask(prefix_bits: u8) -> u8 {
    debug_assert!((1..=8).contains(&prefix_bits));
    if prefix_bits == 8 {
        0xFF
    } else {
        (1u8 << prefix_bits) - 1
    }
}

/// Resumable prefix integer decoder.
#[derive(Debug, Default, Clone)]
pub struct IntegerDecoder {
    value: u64,
    shift: u32,
}

impl IntegerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts decoding with the first byte of the integer.
    ///
    /// Returns the value if it fits in the prefix, otherwise `None` and
    /// continuation bytes must be fed to [`resume`](Self::resume).
    pub fn start(&mut self, prefix_bits: u8, first: u8) -> Option<u64> {
        let mask = prefix_mask(prefix_bits);
        let value = (first & mask) as u64;
        if value < mask as u64 {
            return Some(value);
        }
        self.value = value;
        self.shift = 0;
        None
    }

    /// Consumes continuation bytes from `data`.
    ///
    /// Returns the number of bytes consumed and, once the last continuation
    /// byte has been read, the decoded value.
    pub fn resume(&mut self, data: &[u8]) -> Result<(usize, Option<u64>), ParseError> {
        for (i, &byte) in data.iter().enumerate() {
            let chunk = (byte & 0x7F) as u64;
            if chunk != 0 {
                if self.shift > 62 || chunk > (MAX_INTEGER >> self.shift) {
                    return Err(ParseError::IntegerTooLarge);
                }
                self.value = self
                    .value
                    .checked_add(chunk << self.shift)
                    .filter(|v| *v <= MAX_INTEGER)
                    .ok_or(ParseError::IntegerTooLarge)?;
            }

            if byte & 0x80 == 0 {
                return Ok((i + 1, Some(self.value)));
            }

            self.shift += 7;
            // Ten bytes cover any 62-bit value, even with redundant zero groups.
            if self.shift > 63 {
                return Err(ParseError::IntegerTooLarge);
            }
        }
        Ok((data.len(), None))
    }
}

/// Decodes a complete prefix integer from the start of `data`.
///
/// Returns `Ok(None)` if `data` ends before the integer does, otherwise the
/// value and the number of bytes consumed.
pub fn decode_int(data: &[u8], prefix_bits: u8) -> Result<Option<(u64, usize)>, ParseError> {
    let Some((&first, rest)) = data.split_first() else {
        return Ok(None);
    };
    let mut decoder = IntegerDecoder::new();
    if let Some(value) = decoder.start(prefix_bits, first) {
        return Ok(Some((value, 1)));
    }
    match decoder.resume(rest)? {
        (consumed, Some(value)) => Ok(Some((value, consumed + 1))),
        (_, None) => Ok(None),
    }
}

/// Encodes `value` with an N-bit prefix, OR-ing `flags` into the first byte.
///
/// `flags` must not overlap the prefix bits.
pub fn encode_int<B: BufMut>(value: u64, prefix_bits: u8, flags: u8, buf: &mut B) {
    let mask = prefix_mask(prefix_bits);
    debug_assert_eq!(flags & mask, 0, "flags overlap the integer prefix");

    if value < mask as u64 {
        buf.put_u8(flags | value as u8);
        return;
    }

    buf.put_u8(flags | mask);
    let mut remaining = value - mask as u64;
    while remaining >= 128 {
        buf.put_u8(0x80 | (remaining & 0x7F) as u8);
        remaining >>= 7;
    }
    buf.put_u8(remaining as u8);
}
