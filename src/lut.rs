//! Page Lookup Table (LUT)
//!
//! A Huffman-compressed code object is followed by a LUT: one 4-byte entry
//! per 4096-byte output page, giving the compressed page's byte offset and
//! which of the two codebook dictionaries that page was encoded with. The
//! top two bits of the 4-byte word (in a byte position that depends on
//! whether the LUT is embedded in an image or stands alone as its own
//! file) select the dictionary; the low 30 bits are the offset.

use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LutEntry {
    pub compressed_offset: u32,
    /// 0 selects `table_a`, 1 selects `table_b`.
    pub dictionary_selector: u8,
    /// Compressed byte length of this page. The final entry's size is a
    /// sentinel `0`, meaning "decode until the output page cap".
    pub page_size: u32,
}

fn decode_word(word: [u8; 4], reversed: bool) -> Option<(u32, u8)> {
    let r = if reversed {
        [word[3], word[2], word[1], word[0]]
    } else {
        word
    };
    let sel_byte = if reversed { word[3] } else { word[0] };
    let selector = match sel_byte & 0xC0 {
        0xC0 => 1u8,
        0x40 => 0u8,
        _ => {
            warn!("lut entry has invalid selector bits 0x{sel_byte:02x}, skipping");
            return None;
        }
    };
    let offset = ((r[0] as u32 & 0x3F) << 24) | ((r[1] as u32) << 16) | ((r[2] as u32) << 8) | r[3] as u32;
    Some((offset, selector))
}

/// Parse `lut_bytes` (a whole number of 4-byte entries) into an ordered
/// list of [`LutEntry`]. `reversed` selects embedded-in-image byte order
/// (true) versus standalone-LUT-file byte order (false).
pub fn parse_lut(lut_bytes: &[u8], reversed: bool) -> Vec<LutEntry> {
    let mut offsets = Vec::new();
    for chunk in lut_bytes.chunks_exact(4) {
        let word = [chunk[0], chunk[1], chunk[2], chunk[3]];
        if let Some((offset, selector)) = decode_word(word, reversed) {
            offsets.push((offset, selector));
        }
    }
    let mut entries = Vec::with_capacity(offsets.len());
    for i in 0..offsets.len() {
        let (offset, selector) = offsets[i];
        let page_size = if i + 1 < offsets.len() {
            offsets[i + 1].0.saturating_sub(offset)
        } else {
            0
        };
        entries.push(LutEntry {
            compressed_offset: offset,
            dictionary_selector: selector,
            page_size,
        });
    }
    entries
}

/// LUT byte length for a code object embedded in an image, given its
/// declared uncompressed size: one 4-byte entry per 4096-byte page.
pub fn lut_len_for_object_size(uncompressed_size: u32) -> u32 {
    (uncompressed_size / 4096) * 4
}
