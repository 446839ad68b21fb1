//! Checksum-manifest builder.
//!
//! Remote clients validate their caches against a compact table: one
//! CRC-32 and revision per index, computed over the index's *compressed*
//! manifest blob exactly as it sits in the data file. The authenticated
//! variant adds a whirlpool digest per index, frames the table with a
//! leading entry count and a zero terminator, and closes with a digest
//! of everything written before it.

use thiserror::Error;
use whirlpool::{Digest, Whirlpool};

use crate::archive::WHIRLPOOL_SIZE;
use crate::buffer::Buffer;

#[derive(Error, Debug)]
pub enum ChecksumError {
    #[error("Checksum table cannot describe {0} indices (255 maximum)")]
    TooManyEntries(usize),
}

/// Per-index input to the builder.
#[derive(Debug, Clone)]
pub struct ChecksumEntry {
    /// The compressed manifest blob, byte-for-byte as stored.
    pub blob: Vec<u8>,
    /// The index's revision, from its decoded manifest.
    pub revision: u32,
}

/// Build the wire-format checksum table.
///
/// Without whirlpool the table is `entries.len() × 8` bytes of bare
/// CRC/revision pairs; with it, the framed and digest-terminated form.
pub fn build(entries: &[ChecksumEntry], with_whirlpool: bool) -> Result<Vec<u8>, ChecksumError> {
    if entries.len() > u8::MAX as usize {
        return Err(ChecksumError::TooManyEntries(entries.len()));
    }

    let length = if with_whirlpool {
        1 + entries.len() * (8 + WHIRLPOOL_SIZE) + 1 + WHIRLPOOL_SIZE
    } else {
        entries.len() * 8
    };
    let mut out = Buffer::with_capacity(length);

    if with_whirlpool {
        out.write_u8(entries.len() as u8);
    }

    for entry in entries {
        out.write_u32(crc32fast::hash(&entry.blob));
        out.write_u32(entry.revision);
        if with_whirlpool {
            out.write_bytes(Whirlpool::digest(&entry.blob).as_slice());
        }
    }

    // The trailing digest covers everything written before it: the
    // leading count byte, every entry, and the zero terminator.
    if with_whirlpool {
        out.write_u8(0);
        let digest = Whirlpool::digest(out.as_slice());
        out.write_bytes(digest.as_slice());
    }

    Ok(out.into_inner())
}
