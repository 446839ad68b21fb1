//! Container codec for compressed cache blobs.
//!
//! Every blob pulled out of the data file is framed the same way: a
//! one-byte compression type, a `u32` compressed size, a `u32`
//! decompressed size for anything that is actually compressed, the
//! payload, and an optional two-byte trailing revision. The BZIP2
//! payloads are stored headerless and need the literal `"BZh1"` magic
//! synthesized in front of them before a decoder will accept them;
//! GZIP payloads carry the full gzip wrapper.

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use std::io::Read;
use thiserror::Error;
use tracing::trace;

use crate::buffer::{Buffer, BufferError};

/// The BZIP2 stream header the cache strips from its payloads:
/// magic `BZ`, Huffman coding `h`, block size `1`.
const BZIP2_HEADER: &[u8; 4] = b"BZh1";

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Unknown compression type: {0}")]
    UnknownCompression(u8),
    #[error("Decompression error: {0}")]
    Decompress(String),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    None = 0,
    Bzip2 = 1,
    Gzip = 2,
}

impl CompressionType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::None),
            1 => Some(Self::Bzip2),
            2 => Some(Self::Gzip),
            _ => None,
        }
    }
}

/// Decompress a framed container blob into its raw payload.
///
/// The optional trailing revision is consumed when present but never
/// acted upon; its semantics are owned by remote update checks, not by
/// the cache reader.
pub fn decompress(buf: &mut Buffer) -> Result<Vec<u8>, CompressionError> {
    let type_byte = buf.read_u8()?;
    let kind = CompressionType::from_u8(type_byte)
        .ok_or(CompressionError::UnknownCompression(type_byte))?;
    let compressed_size = buf.read_u32()? as usize;

    if kind == CompressionType::None {
        return Ok(buf.read_bytes(compressed_size)?);
    }

    let decompressed_size = buf.read_u32()? as usize;
    let payload = buf.read_bytes(compressed_size)?;

    // Versioned containers carry a trailing u16 revision after the
    // payload; consume it so the cursor ends on the container boundary.
    if buf.remaining() >= 2 {
        let revision = buf.read_u16()?;
        trace!(revision, "container carries trailing revision");
    }

    let out = match kind {
        CompressionType::Bzip2 => {
            let mut framed = Vec::with_capacity(BZIP2_HEADER.len() + payload.len());
            framed.extend_from_slice(BZIP2_HEADER);
            framed.extend_from_slice(&payload);
            read_all(BzDecoder::new(framed.as_slice()), decompressed_size)
                .map_err(|e| CompressionError::Decompress(format!("bzip2: {e}")))?
        }
        CompressionType::Gzip => {
            read_all(GzDecoder::new(payload.as_slice()), decompressed_size)
                .map_err(|e| CompressionError::Decompress(format!("gzip: {e}")))?
        }
        CompressionType::None => unreachable!("handled above"),
    };

    if out.len() != decompressed_size {
        return Err(CompressionError::Decompress(format!(
            "expected {decompressed_size} decompressed bytes, got {}",
            out.len()
        )));
    }

    trace!(
        compressed = compressed_size,
        decompressed = out.len(),
        ?kind,
        "decompressed container"
    );
    Ok(out)
}

fn read_all<R: Read>(mut decoder: R, size_hint: usize) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(size_hint);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
