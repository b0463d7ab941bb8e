//! Firmware Partition Table (FPT)
//!
//! The FPT is the top-level container of a CSME firmware image: a fixed
//! header followed by one 32-byte entry per partition. Entries point at
//! Code Partition Directories (see [`crate::cpd`]) or data regions; only
//! code partitions carry the Huffman-compressed objects this crate cares
//! about.
//!
//! For background on the container format in general, see
//! <https://github.com/platomav/MEAnalyzer> and <https://github.com/corna/me_cleaner>.

use core::{
    convert::Infallible,
    fmt::{self, Display},
    mem::size_of,
};

use serde::{Deserialize, Serialize};
use zerocopy::{AlignmentError, ConvertError, FromBytes, Ref, SizeError};
use zerocopy_derive::{FromBytes, Immutable, IntoBytes};

use crate::ver::Version;

const FPT_MAGIC: &[u8; 4] = b"$FPT";

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct FPTHeader {
    pub signature: [u8; 4],
    pub entries: u32,
    pub header_ver: u8,
    pub entry_ver: u8,
    pub header_len: u8,
    pub checksum: u8,
    pub ticks_to_add: u16,
    pub tokens_to_add: u16,
    pub uma_size_or_reserved: u32,
    pub flash_layout_or_flags: u32,
    pub fitc_ver: Version,
}

const FPT_HEADER_SIZE: usize = size_of::<FPTHeader>();

impl Display for FPTHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hv = format!("  Header version: {}", self.header_ver);
        let ev = format!("  Entry version:  {}", self.entry_ver);
        let en = format!("  Entries:        {}", self.entries);
        let fv = format!("  FITC version:   {}", self.fitc_ver);
        write!(f, "{hv}\n{ev}\n{en}\n{fv}")
    }
}

#[derive(Debug)]
pub enum FptError<'a> {
    HeaderParseError(SizeError<&'a [u8], FPTHeader>),
    EntryParseError(
        ConvertError<
            AlignmentError<&'a [u8], [FPTEntry]>,
            SizeError<&'a [u8], [FPTEntry]>,
            Infallible,
        >,
    ),
}

#[derive(Immutable, IntoBytes, FromBytes, Serialize, Deserialize, Clone, Copy, Debug)]
#[repr(C)]
pub struct FPTEntry {
    pub name: [u8; 4],
    pub owner: [u8; 4],
    pub offset: u32,
    pub size: u32,
    pub start_tokens: u32,
    pub max_tokens: u32,
    pub scratch_sectors: u32,
    pub flags: u32,
}

impl FPTEntry {
    pub fn name(&self) -> String {
        match std::str::from_utf8(&self.name) {
            Ok(n) => n.trim_end_matches('\0').trim().to_string(),
            Err(_) => format!("{:02x?}", &self.name),
        }
    }

    /// `flags & 0x7F`: partition type. Zero means "code".
    pub fn partition_type(&self) -> u32 {
        self.flags & 0x7F
    }

    /// Top byte of `flags` set to `0xFF` marks the entry invalid.
    pub fn is_invalid(&self) -> bool {
        (self.flags >> 24) & 0xFF == 0xFF
    }

    pub fn is_code(&self) -> bool {
        self.partition_type() == 0 && !self.is_invalid()
    }
}

impl Display for FPTEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.offset as usize;
        let s = self.size as usize;
        let end = o + s;
        write!(f, "{:>4} @ 0x{o:08x}:0x{end:08x} (0x{s:08x})", self.name())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FPT {
    pub header: FPTHeader,
    pub entries: Vec<FPTEntry>,
}

impl<'a> FPT {
    /// Parse an FPT assuming `data` starts exactly at the `$FPT` magic.
    pub fn parse(data: &'a [u8]) -> Result<Self, FptError<'a>> {
        let header =
            FPTHeader::read_from_prefix(data).map_err(FptError::HeaderParseError)?.0;
        let slice = &data[FPT_HEADER_SIZE..];
        let count = header.entries as usize;
        let entries = Ref::<_, [FPTEntry]>::from_prefix_with_elems(slice, count)
            .map_err(FptError::EntryParseError)?
            .0;
        Ok(Self {
            header,
            entries: entries.to_vec(),
        })
    }

    /// Find the first occurrence of the `$FPT` magic at or after
    /// `begin_offset`, byte-aligned (no coarser stride is assumed: the
    /// magic may start at any offset, not just a 16- or 64-byte one).
    /// Returns the absolute offset and the parse result at that offset.
    pub fn scan(data: &'a [u8], begin_offset: usize) -> Option<(usize, Result<Self, FptError<'a>>)> {
        if data.len() < begin_offset + FPT_MAGIC.len() {
            return None;
        }
        for o in begin_offset..=data.len() - FPT_MAGIC.len() {
            if &data[o..o + FPT_MAGIC.len()] == FPT_MAGIC {
                return Some((o, Self::parse(&data[o..])));
            }
        }
        None
    }

    /// All code-type, non-invalid entries.
    pub fn code_entries(&self) -> impl Iterator<Item = &FPTEntry> {
        self.entries.iter().filter(|e| e.is_code())
    }
}
