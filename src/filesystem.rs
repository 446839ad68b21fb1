//! The filesystem facade — the primary embedding surface.
//!
//! ```no_run
//! use jagfs::Filesystem;
//!
//! let fs = Filesystem::open("./cache")?;
//! let sprite = fs.read_file(8, 120, 0)?;
//!
//! fs.build_checksum_table(true)?;
//! let table = fs.checksum_table()?;
//! # Ok::<(), jagfs::CacheError>(())
//! ```
//!
//! Opening a cache opens the shared data file plus every index stream,
//! then eagerly decodes each index's manifest so that ids, revisions,
//! and file lists are queryable without touching the data file again.
//! Archive *contents* stay on disk until first read.

use parking_lot::Mutex;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::buffer::Buffer;
use crate::checksum::{self, ChecksumEntry, ChecksumError};
use crate::compression::{self, CompressionError};
use crate::data_file::DataFile;
use crate::index::{IndexError, IndexFile};

/// The single data file every index shares.
pub const DATA_FILE_NAME: &str = "main_file_cache.dat2";

/// Index file name prefix; the index id is appended.
pub const INDEX_FILE_PREFIX: &str = "main_file_cache.idx";

/// Id of the metadata index, whose archives are the other indices'
/// manifests.
pub const METADATA_INDEX: u8 = 255;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Index {0} not present in this cache")]
    IndexNotFound(u8),
    #[error("Cache declares {0} indices; the checksum table caps at 255")]
    TooManyIndices(u32),
    #[error("Checksum table has not been built")]
    ChecksumTableNotBuilt,
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Compression(#[from] CompressionError),
    #[error(transparent)]
    Checksum(#[from] ChecksumError),
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// A read-only view over one on-disk cache directory.
pub struct Filesystem {
    metadata_index: IndexFile<File>,
    indices: Vec<IndexFile<File>>,
    checksum_table: Mutex<Option<Vec<u8>>>,
}

impl Filesystem {
    /// Open the cache rooted at `path` and load every index manifest.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening cache");

        let data_file = Arc::new(Mutex::new(DataFile::new(
            File::open(path.join(DATA_FILE_NAME))?,
        )?));

        let index_path =
            |id: u32| path.join(format!("{INDEX_FILE_PREFIX}{id}"));

        let metadata_index = IndexFile::new(
            File::open(index_path(u32::from(METADATA_INDEX)))?,
            Arc::clone(&data_file),
            METADATA_INDEX,
        )?;

        let index_count = metadata_index.entry_count();
        if index_count > u32::from(u8::MAX) {
            return Err(CacheError::TooManyIndices(index_count));
        }

        let mut indices = Vec::with_capacity(index_count as usize);
        for id in 0..index_count {
            indices.push(IndexFile::new(
                File::open(index_path(id))?,
                Arc::clone(&data_file),
                id as u8,
            )?);
        }

        let mut fs = Self {
            metadata_index,
            indices,
            checksum_table: Mutex::new(None),
        };
        fs.load_indices()?;
        info!(indices = fs.indices.len(), "cache opened");
        Ok(fs)
    }

    /// Pull each index's compressed manifest out of the data file,
    /// decompress it, and decode it.
    fn load_indices(&mut self) -> Result<()> {
        for index in &mut self.indices {
            let blob = self.metadata_index.read_archive(u32::from(index.id()))?;
            let manifest = compression::decompress(&mut Buffer::new(blob))?;
            index.load(&mut Buffer::new(manifest))?;
            debug!(
                index = index.id(),
                archives = index.archive_count(),
                "index manifest loaded"
            );
        }
        Ok(())
    }

    /// Number of regular indices in this cache.
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn index(&self, id: u8) -> Result<&IndexFile<File>> {
        self.indices
            .get(usize::from(id))
            .ok_or(CacheError::IndexNotFound(id))
    }

    /// Decoded contents of one file. For single-file archives the file
    /// id is 0.
    pub fn read_file(&self, index: u8, archive: u32, file: u32) -> Result<Vec<u8>> {
        Ok(self.index(index)?.data(archive, file)?)
    }

    /// Build (or rebuild) the checksum table describing every index.
    pub fn build_checksum_table(&self, with_whirlpool: bool) -> Result<()> {
        let mut entries = Vec::with_capacity(self.indices.len());
        for index in &self.indices {
            entries.push(ChecksumEntry {
                blob: self.metadata_index.read_archive(u32::from(index.id()))?,
                revision: index.revision(),
            });
        }

        let table = checksum::build(&entries, with_whirlpool)?;
        debug!(len = table.len(), with_whirlpool, "built checksum table");
        *self.checksum_table.lock() = Some(table);
        Ok(())
    }

    /// The most recently built checksum table.
    pub fn checksum_table(&self) -> Result<Vec<u8>> {
        self.checksum_table
            .lock()
            .clone()
            .ok_or(CacheError::ChecksumTableNotBuilt)
    }
}
