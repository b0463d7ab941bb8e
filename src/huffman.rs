//! Huffman code table loading
//!
//! CSME code objects are compressed with a vendor-specific Huffman scheme
//! that shares one prefix-free code table between two parallel decode
//! "dictionaries". The table itself ships as a plain text file; each row
//! gives a code's two possible decoded byte strings (one per dictionary),
//! the decoded length, the code depth in bits, and the code bits
//! themselves.
//!
//! The two decoded values per code are arbitrary-precision hex integers,
//! not bounded to 64 bits, so they are parsed with [`num_bigint::BigUint`]
//! the same way manifest RSA fields are elsewhere in this tool family.

use std::collections::HashMap;
use std::fmt;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

#[derive(Debug)]
pub enum HuffmanTableError {
    Empty,
}

impl fmt::Display for HuffmanTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HuffmanTableError::Empty => write!(f, "huffman table has no usable entries"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CodebookEntry {
    pub table_a: Vec<u8>,
    pub table_b: Vec<u8>,
    pub decoded_length: usize,
    pub depth: u8,
}

/// Key: (code length in bits, code bits as an integer, msb first).
type CodeKey = (u8, u32);

/// An immutable, prefix-free Huffman code table with two parallel decode
/// dictionaries (`table_a`/`table_b`), selected per page by the LUT.
#[derive(Clone, Debug, Default)]
pub struct HuffmanCodebook {
    entries: HashMap<CodeKey, CodebookEntry>,
    min_code_bits: u8,
    max_code_bits: u8,
}

fn parse_hex_to_len(hex: &str, len: usize) -> Vec<u8> {
    let value = BigUint::parse_bytes(hex.as_bytes(), 16).unwrap_or_default();
    let mut bytes = value.to_bytes_be();
    if bytes.len() < len {
        let mut padded = vec![0u8; len - bytes.len()];
        padded.append(&mut bytes);
        padded
    } else {
        // Table values are never wider than their declared length; if they
        // were, keep the low-order bytes to stay consistent with the
        // reference decoder's silent truncation.
        bytes.split_off(bytes.len() - len)
    }
}

fn parse_code_bits(bits: &str) -> Option<(u8, u32)> {
    if bits.is_empty() || bits.len() > 32 || !bits.bytes().all(|b| b == b'0' || b == b'1') {
        return None;
    }
    let value = u32::from_str_radix(bits, 2).ok()?;
    Some((bits.len() as u8, value))
}

impl HuffmanCodebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to an empty table (used to reuse a codebook across tests).
    pub fn clear(&mut self) {
        self.entries.clear();
        self.min_code_bits = 0;
        self.max_code_bits = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn min_code_bits(&self) -> u8 {
        self.min_code_bits
    }

    pub fn max_code_bits(&self) -> u8 {
        self.max_code_bits
    }

    /// Parse a whitespace-separated, line-oriented table. Each valid row
    /// has seven columns: `dict1_hex ref1 dict2_hex ref2 length depth
    /// code_bits`. Lines that don't tokenize into exactly these seven
    /// fields (headers, comments, blank lines) are silently skipped.
    pub fn load_from_str(text: &str) -> Result<Self, HuffmanTableError> {
        let mut codebook = Self::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 7 {
                continue;
            }
            let [dict1_hex, _ref1, dict2_hex, _ref2, length, depth, code_bits] = fields[..]
            else {
                continue;
            };
            let Ok(length) = length.parse::<usize>() else {
                continue;
            };
            let Ok(depth) = depth.parse::<u8>() else {
                continue;
            };
            let Some((bits_len, pattern)) = parse_code_bits(code_bits) else {
                continue;
            };
            if bits_len != depth {
                continue;
            }
            let table_a = parse_hex_to_len(dict1_hex, length);
            let table_b = parse_hex_to_len(dict2_hex, length);
            codebook.insert(
                depth,
                pattern,
                CodebookEntry {
                    table_a,
                    table_b,
                    decoded_length: length,
                    depth,
                },
            );
        }
        if codebook.is_empty() {
            return Err(HuffmanTableError::Empty);
        }
        Ok(codebook)
    }

    fn insert(&mut self, depth: u8, pattern: u32, entry: CodebookEntry) {
        if self.entries.is_empty() {
            self.min_code_bits = depth;
            self.max_code_bits = depth;
        } else {
            self.min_code_bits = self.min_code_bits.min(depth);
            self.max_code_bits = self.max_code_bits.max(depth);
        }
        self.entries.insert((depth, pattern), entry);
    }

    /// Look up the entry whose key is exactly the given `bits`-length
    /// prefix of `pattern` (pattern's low `bits` bits, msb at position
    /// `bits - 1`).
    pub fn lookup(&self, bits: u8, pattern: u32) -> Option<&CodebookEntry> {
        self.entries.get(&(bits, pattern))
    }
}
