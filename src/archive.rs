//! Archives: the containers an index hands out.
//!
//! The manifest describes each archive up front ([`ArchiveData`]); the
//! bytes arrive later, on first access, as one decompressed payload.
//! Multi-file archives carry a trailing chunk table that says how the
//! payload interleaves its files; single-file archives are the payload
//! verbatim.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::buffer::{Buffer, BufferError};

/// Length of a whirlpool digest in bytes.
pub const WHIRLPOOL_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Malformed chunk table: {0}")]
    MalformedTrailer(String),
    #[error("File {file} not found in archive {archive}")]
    FileNotFound { archive: u32, file: u32 },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// A file as described by the manifest. Contents live on the
/// materialized [`Archive`], not here.
#[derive(Debug, Clone, Default)]
pub struct FileData {
    pub id: u32,
    pub name_hash: i32,
}

/// An archive's manifest record.
#[derive(Debug, Clone, Default)]
pub struct ArchiveData {
    pub id: u32,
    pub name_hash: i32,
    pub crc: u32,
    pub revision: u32,
    pub whirlpool: Option<[u8; WHIRLPOOL_SIZE]>,
    /// Files in manifest order; ids are strictly increasing.
    pub files: Vec<FileData>,
}

impl ArchiveData {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// A lazily materialized archive.
///
/// `files` stays `None` until the payload has been read and split, so
/// the loaded state can never disagree with the contents. A failed
/// split leaves the archive untouched.
#[derive(Debug)]
pub struct Archive {
    metadata: ArchiveData,
    files: Option<BTreeMap<u32, Vec<u8>>>,
}

impl Archive {
    pub fn new(metadata: ArchiveData) -> Self {
        Self { metadata, files: None }
    }

    pub fn metadata(&self) -> &ArchiveData {
        &self.metadata
    }

    pub fn is_loaded(&self) -> bool {
        self.files.is_some()
    }

    /// Materialize this archive from its decompressed payload.
    /// Idempotent: a second call on a loaded archive changes nothing.
    pub fn read(&mut self, payload: Vec<u8>) -> Result<(), ArchiveError> {
        if self.files.is_some() {
            return Ok(());
        }
        self.files = Some(split(&self.metadata, payload)?);
        Ok(())
    }

    /// Contents of one file. Errors if the archive has not been
    /// materialized or the id is not present.
    pub fn file(&self, id: u32) -> Result<&[u8], ArchiveError> {
        self.files
            .as_ref()
            .and_then(|files| files.get(&id))
            .map(Vec::as_slice)
            .ok_or(ArchiveError::FileNotFound { archive: self.metadata.id, file: id })
    }

    /// All materialized files, sorted by id.
    pub fn files(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.files
            .iter()
            .flat_map(|files| files.iter().map(|(id, data)| (*id, data.as_slice())))
    }
}

/// Split a decompressed payload into per-file byte blocks.
///
/// The trailing chunk table (present only for multi-file archives) ends
/// with a one-byte chunk count; before it sit `chunks × file_count`
/// big-endian `i32` deltas in chunk-major order. Deltas accumulate
/// across chunks for the same file, and each file's contribution to a
/// chunk is appended to that file's buffer as the payload is walked
/// front to back.
fn split(
    metadata: &ArchiveData,
    payload: Vec<u8>,
) -> Result<BTreeMap<u32, Vec<u8>>, ArchiveError> {
    let file_count = metadata.file_count();
    let mut out = BTreeMap::new();

    if file_count == 0 {
        return Ok(out);
    }
    if file_count == 1 {
        out.insert(metadata.files[0].id, payload);
        return Ok(out);
    }

    let mut buf = Buffer::new(payload);
    if buf.is_empty() {
        return Err(ArchiveError::MalformedTrailer("empty payload".into()));
    }

    buf.seek(buf.len() - 1)?;
    let chunks = usize::from(buf.read_u8()?);
    let table_len = chunks * file_count * 4;
    let Some(data_len) = buf.len().checked_sub(1 + table_len) else {
        return Err(ArchiveError::MalformedTrailer(format!(
            "{chunks} chunks x {file_count} files does not fit in {} bytes",
            buf.len()
        )));
    };

    // Per-file running sums; sizes[chunk][file] is that file's share of
    // the chunk.
    buf.seek(data_len)?;
    let mut running = vec![0i64; file_count];
    let mut sizes = vec![vec![0usize; file_count]; chunks];
    for chunk_sizes in sizes.iter_mut() {
        for (file, acc) in running.iter_mut().enumerate() {
            *acc += i64::from(buf.read_i32()?);
            chunk_sizes[file] = usize::try_from(*acc).map_err(|_| {
                ArchiveError::MalformedTrailer(format!("negative chunk size for file {file}"))
            })?;
        }
    }

    let mut contents: Vec<Vec<u8>> = metadata
        .files
        .iter()
        .map(|_| Vec::new())
        .collect();

    buf.seek(0)?;
    for chunk_sizes in &sizes {
        for (file, &size) in chunk_sizes.iter().enumerate() {
            if buf.position() + size > data_len {
                return Err(ArchiveError::MalformedTrailer(format!(
                    "chunk for file {file} overruns the payload"
                )));
            }
            contents[file].extend_from_slice(&buf.read_bytes(size)?);
        }
    }

    // Every payload byte outside the trailer must have been claimed.
    if buf.position() != data_len {
        return Err(ArchiveError::MalformedTrailer(format!(
            "chunk table covers {} of {data_len} payload bytes",
            buf.position()
        )));
    }

    for (file, data) in metadata.files.iter().zip(contents) {
        out.insert(file.id, data);
    }
    Ok(out)
}
