//! Decoder for Huffman-compressed code objects embedded in Intel CSME
//! (Converged Security and Management Engine) firmware images.
//!
//! An image carries a Firmware Partition Table ([`fpt`]) pointing at Code
//! Partition Directories ([`cpd`]), whose entries name code objects. Some
//! objects are Huffman-compressed with a dual-dictionary scheme
//! ([`huffman`]) and split into 4096-byte pages addressed by a per-object
//! lookup table ([`lut`]); [`page`] decodes one page at a time, and
//! [`extract`] ties the whole pipeline together.

pub mod cpd;
pub mod extract;
pub mod fpt;
pub mod huffman;
pub mod lut;
pub mod page;
pub mod ver;
