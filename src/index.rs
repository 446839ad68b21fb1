//! Index tables and their manifests.
//!
//! Each `main_file_cache.idx<N>` file is a flat array of six-byte
//! entries locating that index's archives inside the data file. The
//! index's *manifest* — itself stored as a compressed archive under the
//! metadata index — describes the archives in detail: ids, checksums,
//! revisions, per-archive file lists, and optional name-hash and
//! whirlpool side tables. [`IndexFile`] decodes the manifest eagerly
//! and materializes archive contents lazily, caching them for the
//! lifetime of the filesystem.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::archive::{Archive, ArchiveData, ArchiveError, FileData, WHIRLPOOL_SIZE};
use crate::buffer::{Buffer, BufferError};
use crate::compression::{self, CompressionError};
use crate::data_file::{DataFile, DataFileError};

/// Size of one entry in an index file.
pub const ENTRY_SIZE: usize = 6;

const FLAG_NAMED: u8 = 0x1;
const FLAG_WHIRLPOOL: u8 = 0x2;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Short read of entry {entry} in index {index}")]
    ShortRead { index: u8, entry: u32 },
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(u8),
    #[error("Archive {archive} not found in index {index}")]
    ArchiveNotFound { index: u8, archive: u32 },
    #[error(transparent)]
    DataFile(#[from] DataFileError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// One six-byte record in an index file: where an archive's sector
/// chain starts and how many bytes it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub length: u32,
    pub sector: u32,
}

/// An index: one logical table of archives.
pub struct IndexFile<R> {
    id: u8,
    stream: Mutex<R>,
    data_file: Arc<Mutex<DataFile<R>>>,
    entry_count: u32,
    protocol: u8,
    revision: u32,
    named: bool,
    whirlpool: bool,
    archives: Mutex<BTreeMap<u32, Archive>>,
}

impl<R: Read + Seek> IndexFile<R> {
    /// Wrap an index's metadata stream. The entry count is fixed by the
    /// stream length; the manifest fields stay at their defaults until
    /// [`load`](Self::load) runs.
    pub fn new(
        mut stream: R,
        data_file: Arc<Mutex<DataFile<R>>>,
        id: u8,
    ) -> std::io::Result<Self> {
        let length = stream.seek(SeekFrom::End(0))?;
        Ok(Self {
            id,
            stream: Mutex::new(stream),
            data_file,
            entry_count: (length / ENTRY_SIZE as u64) as u32,
            protocol: 0,
            revision: 0,
            named: false,
            whirlpool: false,
            archives: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Number of entries in the metadata file. May differ from the
    /// manifest's archive count when archive ids are sparse.
    pub fn entry_count(&self) -> u32 {
        self.entry_count
    }

    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn named(&self) -> bool {
        self.named
    }

    pub fn has_whirlpool(&self) -> bool {
        self.whirlpool
    }

    pub fn archive_count(&self) -> usize {
        self.archives.lock().len()
    }

    pub fn archive_ids(&self) -> Vec<u32> {
        self.archives.lock().keys().copied().collect()
    }

    /// The manifest record for one archive.
    pub fn archive_metadata(&self, archive_id: u32) -> Result<ArchiveData, IndexError> {
        let archives = self.archives.lock();
        archives
            .get(&archive_id)
            .map(|archive| archive.metadata().clone())
            .ok_or(IndexError::ArchiveNotFound { index: self.id, archive: archive_id })
    }

    /// Read the entry record for `entry_id` from the metadata stream.
    pub fn read(&self, entry_id: u32) -> Result<IndexEntry, IndexError> {
        if entry_id >= self.entry_count {
            return Err(IndexError::ArchiveNotFound { index: self.id, archive: entry_id });
        }

        let mut raw = [0u8; ENTRY_SIZE];
        {
            let mut stream = self.stream.lock();
            stream.seek(SeekFrom::Start(u64::from(entry_id) * ENTRY_SIZE as u64))?;
            stream.read_exact(&mut raw).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    IndexError::ShortRead { index: self.id, entry: entry_id }
                } else {
                    IndexError::Io(e)
                }
            })?;
        }

        let mut buf = Buffer::new(raw.to_vec());
        Ok(IndexEntry {
            length: buf.read_u24()?,
            sector: buf.read_u24()?,
        })
    }

    /// The compressed container blob for an archive, straight from the
    /// data file.
    pub fn read_archive(&self, archive_id: u32) -> Result<Vec<u8>, IndexError> {
        let entry = self.read(archive_id)?;
        let mut data_file = self.data_file.lock();
        Ok(data_file.read(self.id, archive_id, entry.sector, entry.length as usize)?)
    }

    /// Decode the manifest for this index from its decompressed blob.
    pub fn load(&mut self, buf: &mut Buffer) -> Result<(), IndexError> {
        self.protocol = buf.read_u8()?;
        if !(5..=7).contains(&self.protocol) {
            return Err(IndexError::UnsupportedProtocol(self.protocol));
        }

        // Counts and id deltas widen from u16 to a smart integer in
        // protocol 7.
        let protocol = self.protocol;
        let smart = |buf: &mut Buffer| -> Result<u32, BufferError> {
            if protocol >= 7 {
                buf.read_smart()
            } else {
                buf.read_u16().map(u32::from)
            }
        };

        // Protocol 5 manifests carry no revision; it stays 0.
        if self.protocol >= 6 {
            self.revision = buf.read_u32()?;
        }

        let flags = buf.read_u8()?;
        self.named = flags & FLAG_NAMED != 0;
        self.whirlpool = flags & FLAG_WHIRLPOOL != 0;

        let archive_count = smart(buf)? as usize;
        let mut records: Vec<ArchiveData> = Vec::with_capacity(archive_count);

        let mut last_id = 0u32;
        for _ in 0..archive_count {
            last_id += smart(buf)?;
            records.push(ArchiveData { id: last_id, ..Default::default() });
        }

        if self.named {
            for record in &mut records {
                record.name_hash = buf.read_i32()?;
            }
        }

        if self.whirlpool {
            for record in &mut records {
                let digest: [u8; WHIRLPOOL_SIZE] = buf
                    .read_bytes(WHIRLPOOL_SIZE)?
                    .try_into()
                    .expect("read_bytes returned the requested length");
                record.whirlpool = Some(digest);
            }
        }

        for record in &mut records {
            record.crc = buf.read_u32()?;
        }

        for record in &mut records {
            record.revision = buf.read_u32()?;
        }

        let mut file_counts = Vec::with_capacity(archive_count);
        for _ in 0..archive_count {
            file_counts.push(smart(buf)? as usize);
        }

        for (record, &count) in records.iter_mut().zip(&file_counts) {
            let mut last_file_id = 0u32;
            for _ in 0..count {
                last_file_id += smart(buf)?;
                record.files.push(FileData { id: last_file_id, name_hash: 0 });
            }
        }

        if self.named {
            for record in &mut records {
                for file in &mut record.files {
                    file.name_hash = buf.read_i32()?;
                }
            }
        }

        debug!(
            index = self.id,
            protocol = self.protocol,
            revision = self.revision,
            archives = records.len(),
            "loaded index manifest"
        );

        let mut archives = self.archives.lock();
        archives.clear();
        for record in records {
            archives.insert(record.id, Archive::new(record));
        }
        Ok(())
    }

    /// The contents of one file inside an archive, materializing the
    /// archive on first access.
    pub fn data(&self, archive_id: u32, file_id: u32) -> Result<Vec<u8>, IndexError> {
        let mut archives = self.archives.lock();
        let archive = archives
            .get_mut(&archive_id)
            .ok_or(IndexError::ArchiveNotFound { index: self.id, archive: archive_id })?;

        if !archive.is_loaded() {
            trace!(index = self.id, archive = archive_id, "materializing archive");
            let raw = self.read_archive(archive_id)?;
            let payload = compression::decompress(&mut Buffer::new(raw))?;
            archive.read(payload)?;
        }

        Ok(archive.file(file_id)?.to_vec())
    }
}
