//! Code Partition Directory (CPD)
//!
//! Each FPT code entry points at a CPD: a small header followed by a flat
//! array of 24-byte entries naming the code objects inside that partition.
//! See <https://troopers.de/downloads/troopers17/TR17_ME11_Static.pdf> and
//! <https://github.com/skochinsky/me-tools> `CPDEntry`.

use core::fmt::{self, Display};

use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, Ref};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

pub const CPD_MAGIC: &[u8; 4] = b"$CPD";

/// The first 11 bytes that are always present, used only to read
/// `header_length` at byte offset 10 before the rest of the header
/// (which may be 16 or 20 bytes total) is parsed.
#[derive(Immutable, IntoBytes, FromBytes, Clone, Copy, Debug)]
#[repr(C, packed)]
struct CPDHeaderPrefix {
    magic: [u8; 4],
    entries: u32,
    header_ver: u8,
    entry_ver: u8,
    header_len: u8,
}

const PREFIX_SIZE: usize = core::mem::size_of::<CPDHeaderPrefix>();

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct CPDHeader {
    pub num_entries: u32,
    pub header_ver: u8,
    pub entry_ver: u8,
    pub header_len: u8,
}

// See <https://github.com/corna/me_cleaner> `check_and_remove_modules_gen3()`
#[bitfield(u32)]
#[derive(Immutable, FromBytes, IntoBytes, Serialize, Deserialize)]
pub struct FlagsAndOffset {
    #[bits(25)]
    pub offset: u32,
    pub huffman_compressed: bool,
    #[bits(6)]
    pub _unknown: u8,
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct CPDEntry {
    pub name: [u8; 12],
    pub flags_and_offset: FlagsAndOffset,
    pub size: u32,
    pub reserved: u32,
}

impl CPDEntry {
    pub fn name(&self) -> String {
        match std::str::from_utf8(&self.name) {
            Ok(n) => n.trim_end_matches('\0').trim().to_string(),
            Err(_) => format!("{:02x?}", &self.name),
        }
    }

    pub fn relative_offset(&self) -> u32 {
        self.flags_and_offset.offset()
    }

    pub fn is_huffman_compressed(&self) -> bool {
        self.flags_and_offset.huffman_compressed()
    }
}

impl Display for CPDEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = self.name();
        let o = self.relative_offset();
        let s = self.size;
        let kind = if self.is_huffman_compressed() {
            "huffman"
        } else {
            "plain"
        };
        write!(f, "{n} @ +0x{o:08x} (0x{s:08x}) [{kind}]")
    }
}

#[derive(Debug)]
pub enum CpdError {
    BadMagic,
    Truncated,
    HeaderTooShort,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CodePartitionDirectory {
    pub header: CPDHeader,
    pub entries: Vec<CPDEntry>,
}

impl CodePartitionDirectory {
    /// Parse a CPD beginning exactly at `data[0]`. `header_len` (byte 10
    /// of the header) determines how many bytes precede the entry array,
    /// rather than the version-constant heuristics some tools use.
    pub fn parse(data: &[u8]) -> Result<Self, CpdError> {
        if data.len() < PREFIX_SIZE {
            return Err(CpdError::Truncated);
        }
        let (prefix, _) =
            CPDHeaderPrefix::read_from_prefix(data).map_err(|_| CpdError::Truncated)?;
        if &prefix.magic != CPD_MAGIC {
            return Err(CpdError::BadMagic);
        }
        let header_len = prefix.header_len as usize;
        if header_len < PREFIX_SIZE {
            return Err(CpdError::HeaderTooShort);
        }
        if data.len() < header_len {
            return Err(CpdError::Truncated);
        }
        let header = CPDHeader {
            num_entries: prefix.entries,
            header_ver: prefix.header_ver,
            entry_ver: prefix.entry_ver,
            header_len: prefix.header_len,
        };
        let slice = &data[header_len..];
        let count = header.num_entries as usize;
        let entries = Ref::<_, [CPDEntry]>::from_prefix_with_elems(slice, count)
            .map_err(|_| CpdError::Truncated)?
            .0;
        Ok(Self {
            header,
            entries: entries.to_vec(),
        })
    }

    pub fn huffman_compressed_entries(&self) -> impl Iterator<Item = &CPDEntry> {
        self.entries.iter().filter(|e| e.is_huffman_compressed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synthetic_cpd(header_len: u8, entries: &[(&str, u32, u32, bool)]) -> Vec<u8> {
        let mut buf = vec![0u8; 4];
        buf[0..4].copy_from_slice(CPD_MAGIC);
        buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        buf.push(2); // header_ver
        buf.push(1); // entry_ver
        buf.push(header_len);
        while buf.len() < header_len as usize {
            buf.push(0);
        }
        for (name, offset, size, huffman) in entries {
            let mut name_bytes = [0u8; 12];
            name_bytes[..name.len()].copy_from_slice(name.as_bytes());
            buf.extend_from_slice(&name_bytes);
            let packed = (offset & 0x01FF_FFFF) | if *huffman { 1 << 25 } else { 0 };
            buf.extend_from_slice(&packed.to_le_bytes());
            buf.extend_from_slice(&size.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes());
        }
        buf
    }

    #[test]
    fn parses_16_byte_header() {
        let data = synthetic_cpd(16, &[("module.met", 0x1000, 256, false)]);
        let cpd = CodePartitionDirectory::parse(&data).unwrap();
        assert_eq!(cpd.entries.len(), 1);
        assert_eq!(cpd.entries[0].name(), "module.met");
        assert_eq!(cpd.entries[0].relative_offset(), 0x1000);
        assert!(!cpd.entries[0].is_huffman_compressed());
    }

    #[test]
    fn parses_20_byte_header() {
        let data = synthetic_cpd(20, &[("adspa", 0x2000, 4096 * 3, true)]);
        let cpd = CodePartitionDirectory::parse(&data).unwrap();
        assert_eq!(cpd.entries.len(), 1);
        assert!(cpd.entries[0].is_huffman_compressed());
        assert_eq!(cpd.entries[0].size, 4096 * 3);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut data = synthetic_cpd(16, &[]);
        data[0] = b'X';
        assert!(matches!(
            CodePartitionDirectory::parse(&data),
            Err(CpdError::BadMagic)
        ));
    }

    #[test]
    fn huffman_filter_excludes_plain_entries() {
        let data = synthetic_cpd(
            16,
            &[("a.met", 0, 16, false), ("b", 0x100, 8192, true)],
        );
        let cpd = CodePartitionDirectory::parse(&data).unwrap();
        assert_eq!(cpd.huffman_compressed_entries().count(), 1);
    }
}
