//! Sector-chain reader for the shared data file.
//!
//! `main_file_cache.dat2` is a flat array of 520-byte sectors. An
//! archive's bytes are scattered across a singly-linked chain of them:
//! each sector opens with a header naming the archive it belongs to,
//! its position in the chain, and the next sector to visit. Two header
//! layouts exist — archives with ids above `0xFFFF` need four bytes for
//! the id instead of two, which costs two bytes of payload per sector.
//! The layout is chosen by the *request*, not by anything on disk.

use std::io::{Read, Seek, SeekFrom};
use thiserror::Error;
use tracing::trace;

use crate::buffer::{Buffer, BufferError};

/// Size of one sector, header included.
pub const SECTOR_SIZE: usize = 520;

const SMALL_HEADER_SIZE: usize = 8;
const LARGE_HEADER_SIZE: usize = 10;

#[derive(Error, Debug)]
pub enum DataFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Short read at sector {sector}")]
    ShortRead { sector: u32 },
    #[error("Sector out of bounds: {sector}")]
    SectorOutOfBounds { sector: u32 },
    #[error("Sector chain mismatch at sector {sector}: {field} expected {expected}, got {actual}")]
    ChainMismatch {
        sector: u32,
        field: &'static str,
        expected: u32,
        actual: u32,
    },
    #[error("Sector chain ended after {written} of {requested} bytes")]
    ChainTruncated { written: usize, requested: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Reader over the single shared data file.
///
/// Generic over the stream so tests can drive it from an in-memory
/// cursor; the filesystem facade instantiates it with a [`std::fs::File`].
pub struct DataFile<R> {
    stream: R,
    length: u64,
}

impl<R: Read + Seek> DataFile<R> {
    pub fn new(mut stream: R) -> std::io::Result<Self> {
        let length = stream.seek(SeekFrom::End(0))?;
        Ok(Self { stream, length })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Reassemble `length` bytes of archive data starting at
    /// `first_sector`, following the chain.
    ///
    /// Every sector header is checked against the request: the archive
    /// id, index id, and chunk counter must all agree, and the chain
    /// must not end or leave the file while bytes are still owed.
    pub fn read(
        &mut self,
        index_id: u8,
        archive_id: u32,
        first_sector: u32,
        length: usize,
    ) -> Result<Vec<u8>, DataFileError> {
        self.check_bounds(first_sector)?;

        let large = archive_id > 0xFFFF;
        let header_size = if large { LARGE_HEADER_SIZE } else { SMALL_HEADER_SIZE };
        let data_size = SECTOR_SIZE - header_size;

        let mut out = Vec::with_capacity(length);
        let mut sector = first_sector;
        let mut part = 0u32;

        while out.len() < length {
            if part > 0 {
                // Follow-up hops re-validate bounds; a zero link while
                // bytes are still owed means the chain is truncated.
                if sector == 0 {
                    return Err(DataFileError::ChainTruncated {
                        written: out.len(),
                        requested: length,
                    });
                }
                self.check_bounds(sector)?;
            }

            self.stream.seek(SeekFrom::Start(u64::from(sector) * SECTOR_SIZE as u64))?;
            let mut raw = [0u8; SECTOR_SIZE];
            self.stream.read_exact(&mut raw).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    DataFileError::ShortRead { sector }
                } else {
                    DataFileError::Io(e)
                }
            })?;

            let mut header = Buffer::new(raw[..header_size].to_vec());
            let hdr_archive = if large {
                header.read_u32()?
            } else {
                u32::from(header.read_u16()?)
            };
            let hdr_part = u32::from(header.read_u16()?);
            let next_sector = header.read_u24()?;
            let hdr_index = header.read_u8()?;

            if hdr_archive != archive_id {
                return Err(DataFileError::ChainMismatch {
                    sector,
                    field: "archive",
                    expected: archive_id,
                    actual: hdr_archive,
                });
            }
            if hdr_part != part {
                return Err(DataFileError::ChainMismatch {
                    sector,
                    field: "chunk",
                    expected: part,
                    actual: hdr_part,
                });
            }
            if hdr_index != index_id {
                return Err(DataFileError::ChainMismatch {
                    sector,
                    field: "index",
                    expected: u32::from(index_id),
                    actual: u32::from(hdr_index),
                });
            }

            let take = data_size.min(length - out.len());
            out.extend_from_slice(&raw[header_size..header_size + take]);

            trace!(sector, part, next_sector, taken = take, "read sector");
            sector = next_sector;
            part += 1;
        }

        Ok(out)
    }

    fn check_bounds(&self, sector: u32) -> Result<(), DataFileError> {
        if sector == 0 || u64::from(sector) * SECTOR_SIZE as u64 >= self.length {
            return Err(DataFileError::SectorOutOfBounds { sector });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Lay out sectors in an in-memory data file. Sector 0 is unusable
    /// by the format, so the image always starts with a blank one.
    struct ImageBuilder {
        bytes: Vec<u8>,
    }

    impl ImageBuilder {
        fn new() -> Self {
            Self { bytes: vec![0u8; SECTOR_SIZE] }
        }

        fn next_sector(&self) -> u32 {
            (self.bytes.len() / SECTOR_SIZE) as u32
        }

        fn push_sector(
            &mut self,
            index_id: u8,
            archive_id: u32,
            part: u16,
            next: u32,
            payload: &[u8],
        ) {
            let large = archive_id > 0xFFFF;
            let mut sector = Vec::with_capacity(SECTOR_SIZE);
            if large {
                sector.extend_from_slice(&archive_id.to_be_bytes());
            } else {
                sector.extend_from_slice(&(archive_id as u16).to_be_bytes());
            }
            sector.extend_from_slice(&part.to_be_bytes());
            sector.extend_from_slice(&next.to_be_bytes()[1..]);
            sector.push(index_id);
            sector.extend_from_slice(payload);
            sector.resize(SECTOR_SIZE, 0);
            self.bytes.extend_from_slice(&sector);
        }

        /// Append `data` as a fully linked chain, returning the first
        /// sector.
        fn push_chain(&mut self, index_id: u8, archive_id: u32, data: &[u8]) -> u32 {
            let data_size = if archive_id > 0xFFFF { 510 } else { 512 };
            let first = self.next_sector();
            let chunks: Vec<&[u8]> = data.chunks(data_size).collect();
            for (part, chunk) in chunks.iter().enumerate() {
                let last = part == chunks.len() - 1;
                let next = if last { 0 } else { self.next_sector() + 1 };
                self.push_sector(index_id, archive_id, part as u16, next, chunk);
            }
            first
        }

        fn build(self) -> DataFile<Cursor<Vec<u8>>> {
            DataFile::new(Cursor::new(self.bytes)).unwrap()
        }
    }

    #[test]
    fn single_sector_read() {
        let mut image = ImageBuilder::new();
        let payload: Vec<u8> = (0..100).collect();
        let first = image.push_chain(0, 0, &payload);
        let mut data_file = image.build();

        assert_eq!(data_file.read(0, 0, first, 100).unwrap(), payload);
    }

    #[test]
    fn multi_sector_chain() {
        let mut image = ImageBuilder::new();
        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        let first = image.push_chain(2, 7, &payload);
        let mut data_file = image.build();

        // 2000 bytes at 512 per sector needs four sectors.
        assert_eq!(image_sectors(&payload, 512), 4);
        assert_eq!(data_file.read(2, 7, first, 2000).unwrap(), payload);
    }

    #[test]
    fn large_header_chain() {
        let mut image = ImageBuilder::new();
        let payload: Vec<u8> = (0..600u32).map(|i| (i % 13) as u8).collect();
        let first = image.push_chain(1, 0x10000, &payload);
        let mut data_file = image.build();

        assert_eq!(image_sectors(&payload, 510), 2);
        assert_eq!(data_file.read(1, 0x10000, first, 600).unwrap(), payload);
    }

    #[test]
    fn sector_zero_rejected() {
        let mut image = ImageBuilder::new();
        image.push_chain(0, 0, &[0u8; 10]);
        let mut data_file = image.build();

        assert!(matches!(
            data_file.read(0, 0, 0, 10),
            Err(DataFileError::SectorOutOfBounds { sector: 0 })
        ));
    }

    #[test]
    fn sector_past_end_rejected() {
        let mut image = ImageBuilder::new();
        image.push_chain(0, 0, &[0u8; 10]);
        let mut data_file = image.build();

        assert!(matches!(
            data_file.read(0, 0, 99, 10),
            Err(DataFileError::SectorOutOfBounds { sector: 99 })
        ));
    }

    #[test]
    fn archive_mismatch_detected() {
        let mut image = ImageBuilder::new();
        let first = image.push_chain(0, 5, &[1u8; 20]);
        let mut data_file = image.build();

        assert!(matches!(
            data_file.read(0, 6, first, 20),
            Err(DataFileError::ChainMismatch { field: "archive", .. })
        ));
    }

    #[test]
    fn index_mismatch_detected() {
        let mut image = ImageBuilder::new();
        let first = image.push_chain(3, 5, &[1u8; 20]);
        let mut data_file = image.build();

        assert!(matches!(
            data_file.read(4, 5, first, 20),
            Err(DataFileError::ChainMismatch { field: "index", .. })
        ));
    }

    #[test]
    fn truncated_chain_detected() {
        let mut image = ImageBuilder::new();
        // A single sector claiming to end the chain, but 600 bytes owed.
        let first = image.next_sector();
        image.push_sector(0, 1, 0, 0, &[9u8; 512]);
        let mut data_file = image.build();

        assert!(matches!(
            data_file.read(0, 1, first, 600),
            Err(DataFileError::ChainTruncated { written: 512, requested: 600 })
        ));
    }

    #[test]
    fn short_file_detected() {
        // Truncate the image mid-sector.
        let mut image = ImageBuilder::new();
        let first = image.push_chain(0, 1, &[7u8; 100]);
        let mut bytes = image.bytes;
        bytes.truncate(bytes.len() - 100);
        let mut data_file = DataFile::new(Cursor::new(bytes)).unwrap();

        assert!(matches!(
            data_file.read(0, 1, first, 100),
            Err(DataFileError::ShortRead { .. })
        ));
    }

    fn image_sectors(data: &[u8], data_size: usize) -> usize {
        data.len().div_ceil(data_size)
    }
}
