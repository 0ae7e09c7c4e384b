//! Huffman coding for QPACK string literals.
//!
//! QPACK reuses the static canonical Huffman code of RFC 7541 Appendix B.
//! Decoding walks a binary tree built once on first use; a string is valid
//! only if its trailing padding is shorter than 8 bits and consists of the
//! most significant bits of the EOS symbol (all ones).

use std::sync::OnceLock;

/// Huffman code entry, code right-aligned in `len` bits.
struct HuffmanEntry {
    code: u32,
    len: u8,
}

/// Symbols 0-255 plus EOS (256).
static ENCODE_TABLE: [HuffmanEntry; 257] = include!("huffman_table.inc");

const EOS: u16 = 256;

/// Child slot of a tree node: a leaf symbol, an internal node, or nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Link {
    Empty,
    Symbol(u16),
    Node(u16),
}

#[derive(Clone, Copy, Debug)]
struct DecodeNode {
    children: [Link; 2],
}

static DECODE_TREE: OnceLock<Vec<DecodeNode>> = OnceLock::new();

fn decode_tree() -> &'static [DecodeNode] {
    DECODE_TREE.get_or_init(|| {
        let mut tree = vec![DecodeNode {
            children: [Link::Empty; 2],
        }];

        for (sym, entry) in ENCODE_TABLE.iter().enumerate() {
            let mut node = 0usize;
            for bit_idx in (0..entry.len).rev() {
                let bit = ((entry.code >> bit_idx) & 1) as usize;
                if bit_idx == 0 {
                    tree[node].children[bit] = Link::Symbol(sym as u16);
                    break;
                }
                node = match tree[node].children[bit] {
                    Link::Node(next) => next as usize,
                    _ => {
                        let next = tree.len();
                        tree.push(DecodeNode {
                            children: [Link::Empty; 2],
                        });
                        tree[node].children[bit] = Link::Node(next as u16);
                        next
                    }
                };
            }
        }

        tree
    })
}

/// The input is not a valid Huffman-encoded string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuffmanError {
    /// The EOS symbol appeared inside the string.
    UnexpectedEos,
    /// Padding is longer than 7 bits or is not a prefix of EOS.
    InvalidPadding,
}

/// Decodes Huffman-encoded data, appending to `output`.
///
/// Returns the number of bytes appended.
pub fn decode(data: &[u8], output: &mut Vec<u8>) -> Result<usize, HuffmanError> {
    let tree = decode_tree();
    let initial_len = output.len();
    let mut node = 0usize;
    // Bits consumed since the last emitted symbol, and whether they were all ones.
    let mut pending_bits = 0u32;
    let mut pending_ones = true;

    for &byte in data {
        for shift in (0..8).rev() {
            let bit = ((byte >> shift) & 1) as usize;
            pending_bits += 1;
            pending_ones &= bit == 1;

            match tree[node].children[bit] {
                Link::Symbol(EOS) => return Err(HuffmanError::UnexpectedEos),
                Link::Symbol(sym) => {
                    output.push(sym as u8);
                    node = 0;
                    pending_bits = 0;
                    pending_ones = true;
                }
                Link::Node(next) => node = next as usize,
                // The code is complete; every internal node has two children.
                Link::Empty => return Err(HuffmanError::InvalidPadding),
            }
        }
    }

    if pending_bits > 7 || !pending_ones {
        return Err(HuffmanError::InvalidPadding);
    }

    Ok(output.len() - initial_len)
}

/// Encodes data using the static Huffman code, appending to `output`.
///
/// Returns the number of bytes written.
pub fn encode(data: &[u8], output: &mut Vec<u8>) -> usize {
    let initial_len = output.len();
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;

    for &byte in data {
        let entry = &ENCODE_TABLE[byte as usize];
        acc = (acc << entry.len) | entry.code as u64;
        bits += entry.len as u32;

        while bits >= 8 {
            bits -= 8;
            output.push((acc >> bits) as u8);
        }
    }

    // Pad with the most significant bits of EOS.
    if bits > 0 {
        let pad = 8 - bits;
        output.push(((acc << pad) | ((1u64 << pad) - 1)) as u8);
    }

    output.len() - initial_len
}

/// Returns the Huffman-encoded size of `data` in bytes.
pub fn encoded_size(data: &[u8]) -> usize {
    let bits: usize = data
        .iter()
        .map(|&b| ENCODE_TABLE[b as usize].len as usize)
        .sum();
    (bits + 7) / 8
}
