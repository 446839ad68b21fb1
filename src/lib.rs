pub mod archive;
pub mod buffer;
pub mod checksum;
pub mod compression;
pub mod data_file;
pub mod filesystem;
pub mod index;

pub use archive::{Archive, ArchiveData, FileData};
pub use buffer::Buffer;
pub use compression::CompressionType;
pub use data_file::DataFile;
pub use filesystem::{CacheError, Filesystem, Result};
pub use index::{IndexEntry, IndexFile};
