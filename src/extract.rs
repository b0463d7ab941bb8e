//! End-to-end extraction
//!
//! Ties the container readers ([`crate::fpt`], [`crate::cpd`]) and the
//! per-page decoder ([`crate::page`]) together: locate the FPT, walk its
//! code partitions, read each Huffman-compressed code object's LUT, and
//! decode page by page into a contiguous buffer. Identical starting
//! offsets across code objects (aliases) are decoded once and shared.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use log::{debug, info, warn};

use crate::cpd::CodePartitionDirectory;
use crate::fpt::FPT;
use crate::huffman::HuffmanCodebook;
use crate::lut::{lut_len_for_object_size, parse_lut};
use crate::page::{decode_page, PageDecodeError};

#[derive(Debug)]
pub enum ExtractError {
    Io(std::io::Error),
    NoFpt,
    FptParse(String),
    NoCdt(String),
    CdtParse(String),
}

impl From<std::io::Error> for ExtractError {
    fn from(e: std::io::Error) -> Self {
        ExtractError::Io(e)
    }
}

/// A single decoded code object, or a pointer to an earlier one decoded
/// from the same absolute offset.
#[derive(Debug)]
pub enum ExtractedObject {
    Decoded {
        partition: String,
        name: String,
        data: Vec<u8>,
    },
    AliasOf {
        partition: String,
        name: String,
        alias_of_partition: String,
        alias_of_name: String,
    },
}

pub struct ExtractionDriver<'a, R: Read + Seek> {
    input: &'a mut R,
    codebook: &'a HuffmanCodebook,
    seen: HashMap<u64, (String, String)>,
}

impl<'a, R: Read + Seek> ExtractionDriver<'a, R> {
    pub fn new(input: &'a mut R, codebook: &'a HuffmanCodebook) -> Self {
        Self {
            input,
            codebook,
            seen: HashMap::new(),
        }
    }

    /// Locate the first FPT in the input and extract every
    /// Huffman-compressed code object it can reach.
    pub fn extract_all(&mut self) -> Result<Vec<ExtractedObject>, ExtractError> {
        let mut whole = Vec::new();
        self.input.seek(SeekFrom::Start(0))?;
        self.input.read_to_end(&mut whole)?;

        let Some((fpt_offset, fpt_result)) = FPT::scan(&whole, 0) else {
            return Err(ExtractError::NoFpt);
        };
        let fpt = fpt_result.map_err(|e| ExtractError::FptParse(format!("{e:?}")))?;
        info!("FPT found at 0x{fpt_offset:08x} with {} entries", fpt.entries.len());

        let mut results = Vec::new();
        for part in fpt.code_entries() {
            let name = part.name();
            let cdt_offset = part.offset as usize;
            if cdt_offset >= whole.len() {
                warn!("partition {name} cdt offset 0x{cdt_offset:08x} out of range, skipping");
                continue;
            }
            let cdt = match CodePartitionDirectory::parse(&whole[cdt_offset..]) {
                Ok(cdt) => cdt,
                Err(e) => {
                    warn!("partition {name}: failed to parse CPD: {e:?}");
                    continue;
                }
            };
            debug!("partition {name}: {} code objects", cdt.entries.len());
            for object in cdt.huffman_compressed_entries() {
                let object_base = cdt_offset as u64 + object.relative_offset() as u64;
                let obj_name = object.name();
                if let Some((alias_partition, alias_name)) = self.seen.get(&object_base) {
                    info!(
                        "{name}/{obj_name} is an alias of {alias_partition}/{alias_name} (same offset 0x{object_base:08x})"
                    );
                    results.push(ExtractedObject::AliasOf {
                        partition: name.clone(),
                        name: obj_name,
                        alias_of_partition: alias_partition.clone(),
                        alias_of_name: alias_name.clone(),
                    });
                    continue;
                }
                self.seen
                    .insert(object_base, (name.clone(), obj_name.clone()));

                match self.decode_object(&whole, object_base, object.size) {
                    Ok(data) => results.push(ExtractedObject::Decoded {
                        partition: name.clone(),
                        name: obj_name,
                        data,
                    }),
                    Err(e) => {
                        warn!("{name}/{obj_name}: decode failed: {e:?}");
                    }
                }
            }
        }
        Ok(results)
    }

    fn decode_object(
        &mut self,
        whole: &[u8],
        object_base: u64,
        uncompressed_size: u32,
    ) -> Result<Vec<u8>, ExtractError> {
        let lut_len = lut_len_for_object_size(uncompressed_size) as usize;
        let lut_start = object_base as usize;
        if lut_start + lut_len > whole.len() {
            return Err(ExtractError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "lut extends past end of input",
            )));
        }
        let lut_bytes = &whole[lut_start..lut_start + lut_len];
        let entries = parse_lut(lut_bytes, true);
        debug!("object at 0x{object_base:08x}: {} pages", entries.len());

        let pages_start = (lut_start + lut_len) as u64;
        let mut output = Vec::with_capacity(uncompressed_size as usize);
        for entry in &entries {
            self.input
                .seek(SeekFrom::Start(pages_start + entry.compressed_offset as u64))?;
            match decode_page(self.input, entry, self.codebook) {
                Ok(page) => output.extend_from_slice(&page),
                Err(PageDecodeError::NoMatchingCode { partial_output }) => {
                    warn!(
                        "no matching code after emitting {} bytes of this page, preserving \
                         partial output and aborting object",
                        partial_output.len()
                    );
                    output.extend_from_slice(&partial_output);
                    break;
                }
                Err(PageDecodeError::Io(e)) => return Err(ExtractError::Io(e)),
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TINY_TABLE: &str = "aa 0 11 0 1 1 0\nbb 0 22 0 1 2 10\ncc 0 33 0 1 2 11\n";

    fn build_synthetic_image() -> (Vec<u8>, usize) {
        // FPT header (32 bytes) + 1 entry (32 bytes) pointing at a CPD at
        // offset 0x100, whose single huffman-compressed object lives right
        // after its 16-byte header + a 4-byte LUT (one page, sentinel size).
        let mut image = vec![0u8; 0x100];
        let fpt_start = 0;
        image[fpt_start..fpt_start + 4].copy_from_slice(b"$FPT");
        image[fpt_start + 4..fpt_start + 8].copy_from_slice(&1u32.to_le_bytes());
        image[fpt_start + 8] = 0x20;
        image[fpt_start + 9] = 0x10;
        let entry_off = fpt_start + 32;
        image[entry_off..entry_off + 4].copy_from_slice(b"FTPR");
        image[entry_off + 8..entry_off + 12].copy_from_slice(&0x100u32.to_le_bytes());
        image[entry_off + 12..entry_off + 16].copy_from_slice(&0x1000u32.to_le_bytes());

        // CPD header at 0x100: 16-byte header, one entry.
        let cdt = 0x100usize;
        image.resize(cdt + 16 + 24, 0);
        image[cdt..cdt + 4].copy_from_slice(b"$CPD");
        image[cdt + 4..cdt + 8].copy_from_slice(&1u32.to_le_bytes());
        image[cdt + 10] = 16; // header_len

        let entry = cdt + 16;
        image[entry..entry + 5].copy_from_slice(b"adspa");
        // relative_offset points right after this entry array (24 bytes further).
        let rel_offset = 24u32;
        let packed = (rel_offset & 0x01FF_FFFF) | (1 << 25); // huffman compressed
        image[entry + 12..entry + 16].copy_from_slice(&packed.to_le_bytes());
        image[entry + 16..entry + 20].copy_from_slice(&4096u32.to_le_bytes());

        let object_base = cdt + rel_offset as usize;
        // LUT: one entry, sentinel page size (0), selector table_a.
        image.resize(object_base + 4, 0);
        image[object_base..object_base + 4].copy_from_slice(&[0, 0, 0, 0x40]);

        // Compressed page bytes: all zero bits, so every code is `0` -> 0xaa
        // repeated until the 4096-byte output cap.
        image.extend(vec![0u8; 600]);
        (image, object_base)
    }

    #[test]
    fn extracts_single_huffman_object() {
        let (image, _object_base) = build_synthetic_image();
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        let mut cursor = Cursor::new(image);
        let mut driver = ExtractionDriver::new(&mut cursor, &codebook);
        let results = driver.extract_all().unwrap();
        assert_eq!(results.len(), 1);
        match &results[0] {
            ExtractedObject::Decoded {
                partition,
                name,
                data,
            } => {
                assert_eq!(partition, "FTPR");
                assert_eq!(name, "adspa");
                assert_eq!(data.len(), 4096);
                assert!(data.iter().all(|&b| b == 0xaa));
            }
            _ => panic!("expected a decoded object"),
        }
    }

    #[test]
    fn no_fpt_is_an_error() {
        let codebook = HuffmanCodebook::load_from_str(TINY_TABLE).unwrap();
        let mut cursor = Cursor::new(vec![0u8; 64]);
        let mut driver = ExtractionDriver::new(&mut cursor, &codebook);
        assert!(matches!(driver.extract_all(), Err(ExtractError::NoFpt)));
    }
}
