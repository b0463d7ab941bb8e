//! Per-page Huffman decode
//!
//! This is the bit-accurate core of the decompressor: given a compressed
//! page (a byte range of the input, whose length is known from the LUT)
//! and a [`HuffmanCodebook`], it drives a shift-register-style bit buffer
//! through the table to emit up to 4096 bytes of output.
//!
//! Bytes are shifted in msb-first. At each step the longest remaining
//! candidate code length that still fits in the buffer is tried first, and
//! the first matching code wins (the table is prefix-free, so at most one
//! length can match). A mismatch while input remains is fatal for the
//! page; a mismatch after input is exhausted is treated as trailing
//! padding, not an error.

use std::collections::VecDeque;
use std::io::Read;

use log::warn;

use crate::huffman::HuffmanCodebook;
use crate::lut::LutEntry;

pub const PAGE_MAX: usize = 4096;

#[derive(Debug)]
pub enum PageDecodeError {
    Io(std::io::Error),
    /// A mid-page mismatch. `partial_output` carries everything
    /// successfully decoded before the miss, per the "partial output
    /// preserved" contract: the caller decides whether to keep or
    /// truncate it.
    NoMatchingCode { partial_output: Vec<u8> },
}

impl From<std::io::Error> for PageDecodeError {
    fn from(e: std::io::Error) -> Self {
        PageDecodeError::Io(e)
    }
}

/// A FIFO of bits backed by a byte buffer: append whole bytes on the
/// right, peek or discard bits from the left. The backing `VecDeque`
/// itself may hold slack bytes; `valid_bits` is the authoritative count.
struct BitShiftRegister {
    bytes: VecDeque<u8>,
    /// Number of high-order bits of `bytes[0]` already consumed.
    bit_offset: u8,
    valid_bits: usize,
}

impl BitShiftRegister {
    fn new() -> Self {
        Self {
            bytes: VecDeque::new(),
            bit_offset: 0,
            valid_bits: 0,
        }
    }

    fn append_bytes(&mut self, data: &[u8]) {
        self.bytes.extend(data.iter().copied());
        self.valid_bits += data.len() * 8;
    }

    /// Peek the first `n` bits as an integer, msb first. Requires
    /// `n <= valid_bits`.
    fn peek(&self, n: u8) -> u32 {
        let mut result: u32 = 0;
        let mut bits_taken = 0u8;
        let mut byte_idx = 0usize;
        let mut bit_in_byte = self.bit_offset;
        while bits_taken < n {
            let byte = self.bytes[byte_idx];
            let bit = (byte >> (7 - bit_in_byte)) & 1;
            result = (result << 1) | bit as u32;
            bits_taken += 1;
            bit_in_byte += 1;
            if bit_in_byte == 8 {
                bit_in_byte = 0;
                byte_idx += 1;
            }
        }
        result
    }

    /// Discard the first `n` bits, dropping now-empty leading bytes.
    fn discard(&mut self, n: u8) {
        let mut remaining = n as usize;
        while remaining > 0 {
            let bits_left_in_front_byte = 8 - self.bit_offset as usize;
            if remaining < bits_left_in_front_byte {
                self.bit_offset += remaining as u8;
                remaining = 0;
            } else {
                remaining -= bits_left_in_front_byte;
                self.bit_offset = 0;
                self.bytes.pop_front();
            }
        }
        self.valid_bits -= n as usize;
    }
}

struct PageReader<'a, R: Read> {
    input: &'a mut R,
    remaining: usize,
    /// Set once a `read` call returns 0, meaning the underlying source is
    /// truly exhausted even if `remaining` (the nominal compressed-byte
    /// budget) hasn't reached zero yet — the sentinel final-page budget in
    /// particular is only an upper bound, not a promise that the input
    /// actually holds that many more bytes.
    eof: bool,
}

impl<'a, R: Read> PageReader<'a, R> {
    /// Read up to `want` bytes, bounded by the remaining budget. Tolerates
    /// short reads near the page/EOF boundary instead of erroring, the way
    /// the reference decoder's `inp.read(n)` does: it just returns however
    /// many bytes were actually available and advances by that amount.
    fn read_up_to(&mut self, want: usize) -> std::io::Result<Vec<u8>> {
        let n = want.min(self.remaining);
        if n == 0 || self.eof {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let read = self.input.read(&mut buf[filled..])?;
            if read == 0 {
                self.eof = true;
                break;
            }
            filled += read;
        }
        buf.truncate(filled);
        self.remaining -= filled;
        Ok(buf)
    }

    fn has_more(&self) -> bool {
        self.remaining > 0 && !self.eof
    }
}

/// Decode one compressed page from `input` (already seeked to the page's
/// first byte) using `codebook`, honoring `lut_entry`'s declared page size
/// (`0` is the sentinel meaning "read up to [`PAGE_MAX`] compressed bytes
/// worth of input, capped by output size").
pub fn decode_page<R: Read>(
    input: &mut R,
    lut_entry: &LutEntry,
    codebook: &HuffmanCodebook,
) -> Result<Vec<u8>, PageDecodeError> {
    let compressed_len = if lut_entry.page_size == 0 {
        PAGE_MAX
    } else {
        lut_entry.page_size as usize
    };
    let mut reader = PageReader {
        input,
        remaining: compressed_len,
        eof: false,
    };

    let min_bits = codebook.min_code_bits();
    let max_bits = codebook.max_code_bits();
    let topoff_bits = max_bits as usize * 10;

    let mut register = BitShiftRegister::new();
    let initial = reader.read_up_to(max_bits.div_ceil(8) as usize)?;
    register.append_bytes(&initial);

    let mut output = Vec::with_capacity(PAGE_MAX);

    while reader.has_more() {
        if register.valid_bits < max_bits as usize {
            let want = topoff_bits.div_ceil(8);
            let more = reader.read_up_to(want)?;
            register.append_bytes(&more);
        }

        let available = max_bits.min(register.valid_bits as u8);
        let Some((matched_bits, entry)) = match_longest(&register, codebook, available, min_bits)
        else {
            return Err(PageDecodeError::NoMatchingCode {
                partial_output: output,
            });
        };

        let decoded = if lut_entry.dictionary_selector == 0 {
            &entry.table_a
        } else {
            &entry.table_b
        };
        output.extend_from_slice(decoded);
        register.discard(matched_bits);

        if output.len() >= PAGE_MAX {
            output.truncate(PAGE_MAX);
            return Ok(output);
        }
    }

    // Tail loop: keep matching against whatever bits remain, without
    // refilling from input. A miss here is trailing padding, not an error.
    loop {
        if output.len() >= PAGE_MAX {
            output.truncate(PAGE_MAX);
            break;
        }
        let available = max_bits.min(register.valid_bits as u8);
        if available < min_bits {
            break;
        }
        match match_longest(&register, codebook, available, min_bits) {
            Some((matched_bits, entry)) => {
                let decoded = if lut_entry.dictionary_selector == 0 {
                    &entry.table_a
                } else {
                    &entry.table_b
                };
                output.extend_from_slice(decoded);
                register.discard(matched_bits);
            }
            None => {
                warn!(
                    "trailing {} bits in page do not match any code, treating as padding",
                    register.valid_bits
                );
                break;
            }
        }
    }

    Ok(output)
}

fn match_longest<'c>(
    register: &BitShiftRegister,
    codebook: &'c HuffmanCodebook,
    longest: u8,
    shortest: u8,
) -> Option<(u8, &'c crate::huffman::CodebookEntry)> {
    let mut k = longest;
    while k >= shortest {
        let pattern = register.peek(k);
        if let Some(entry) = codebook.lookup(k, pattern) {
            return Some((k, entry));
        }
        if k == 0 {
            break;
        }
        k -= 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::huffman::HuffmanCodebook;
    use std::io::Cursor;

    // A tiny, genuinely prefix-free 3-symbol code:
    //   0        -> 1 byte
    //   10       -> 1 byte
    //   11       -> 1 byte
    const TINY_TABLE: &str = "\
aa 0 11 0 1 1 0
bb 0 22 0 1 2 10
cc 0 33 0 1 2 11
";

    fn entry_non_sentinel(size: u32) -> LutEntry {
        LutEntry {
            compressed_offset: 0,
            dictionary_selector: 0,
            page_size: size,
        }
    }

    #[test]
    fn decodes_simple_stream_with_table_a() {
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        // bits: 0 10 11 0  => aa bb cc aa
        let byte = 0b0_10_11_0_00u8;
        let mut input = Cursor::new(vec![byte]);
        let lut = entry_non_sentinel(1);
        let out = decode_page(&mut input, &lut, &codebook).unwrap();
        assert_eq!(&out[..4], &[0xaa, 0xbb, 0xcc, 0xaa]);
    }

    #[test]
    fn selects_table_b_via_selector() {
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        let byte = 0b0_10_11_0_00u8;
        let mut input = Cursor::new(vec![byte]);
        let lut = LutEntry {
            compressed_offset: 0,
            dictionary_selector: 1,
            page_size: 1,
        };
        let out = decode_page(&mut input, &lut, &codebook).unwrap();
        assert_eq!(&out[..4], &[0x11, 0x22, 0x33, 0x11]);
    }

    #[test]
    fn stops_at_page_cap() {
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        // All zero bits -> every code is `0` -> repeated 0xaa; plenty of
        // input to exceed the 4096-byte cap.
        let mut input = Cursor::new(vec![0u8; 600]);
        let lut = entry_non_sentinel(600);
        let out = decode_page(&mut input, &lut, &codebook).unwrap();
        assert_eq!(out.len(), PAGE_MAX);
        assert!(out.iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn sentinel_page_size_uses_page_max_input_budget() {
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        let mut input = Cursor::new(vec![0u8; PAGE_MAX]);
        let lut = entry_non_sentinel(0);
        let out = decode_page(&mut input, &lut, &codebook).unwrap();
        assert_eq!(out.len(), PAGE_MAX);
    }

    #[test]
    fn no_matching_code_is_fatal_mid_page() {
        // A table whose shortest code is 2 bits can never match a lone
        // all-ones byte region that never completes either 2-bit code
        // because we force the decoder to want min 2 bits starting with
        // pattern "01" which isn't in the table.
        let table = "aa 0 11 0 1 2 00\nbb 0 22 0 1 2 01\n";
        let codebook = HuffmanCodebook::load_from_str(table).unwrap();
        // bits 10 10 10 ... never match 00 or 01.
        let mut input = Cursor::new(vec![0b1010_1010u8; 4]);
        let lut = entry_non_sentinel(4);
        let result = decode_page(&mut input, &lut, &codebook);
        assert!(matches!(result, Err(PageDecodeError::NoMatchingCode { .. })));
    }

    #[test]
    fn no_matching_code_preserves_partial_output() {
        // First code ("00") matches, second ("10") doesn't: the bytes
        // already decoded before the miss must still come back.
        let table = "aa 0 11 0 1 2 00\nbb 0 22 0 1 2 01\n";
        let codebook = HuffmanCodebook::load_from_str(table).unwrap();
        let mut input = Cursor::new(vec![0b0010_0000u8, 0x00]);
        let lut = entry_non_sentinel(2);
        match decode_page(&mut input, &lut, &codebook) {
            Err(PageDecodeError::NoMatchingCode { partial_output }) => {
                assert_eq!(partial_output, vec![0xaa]);
            }
            other => panic!("expected NoMatchingCode with partial output, got {other:?}"),
        }
    }

    #[test]
    fn sentinel_budget_tolerates_short_real_input_without_io_error() {
        // The last code object's final page has no declared size (the LUT
        // sentinel), so its nominal compressed-byte budget is PAGE_MAX even
        // though the real underlying input may end well before that. A
        // short read here must not be treated as an error.
        let table = "aa 0 11 0 1 8 00000001\n";
        let codebook = HuffmanCodebook::load_from_str(table).unwrap();
        let real_len = 3000;
        let mut input = Cursor::new(vec![0x01u8; real_len]);
        let lut = entry_non_sentinel(0);
        let out = decode_page(&mut input, &lut, &codebook).unwrap();
        assert_eq!(out.len(), real_len);
        assert!(out.iter().all(|&b| b == 0xaa));
    }

    #[test]
    fn short_trailing_bits_are_tolerated_not_fatal() {
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        // One byte: `0` repeated then a final lone `1` bit with nothing
        // after it to complete a 2-bit code -> tail loop should just stop.
        let byte = 0b0_0_0_0_0_0_0_1u8;
        let mut input = Cursor::new(vec![byte]);
        let lut = entry_non_sentinel(1);
        let out = decode_page(&mut input, &lut, &codebook).unwrap();
        assert_eq!(&out[..7], &[0xaa; 7]);
    }
}
