//! ZIP archive reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: fixed-layout records (EOCD, headers, descriptors)
//! - [`extra`] and [`time`]: extra field records and MS-DOS timestamps
//! - [`codec`]: streaming compression shared by both directions
//! - [`entry`]: entry metadata and the sources entries are written from
//! - [`parser`]: central directory parsing
//! - [`archive`]: an opened archive and lazy, checked access to its entries
//! - [`writer`]: the two-phase writer and an editable entry list
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD, then the Central Directory, which allows
//! listing files without reading the entire archive. Writing goes the other
//! way round and never seeks back.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions for files > 4GB and more than 65535 entries
//! - STORED and DEFLATE methods; other methods can still be copied as is
//! - Data prepended to the archive, as in self-extracting executables
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support

pub mod archive;
pub mod codec;
pub mod entry;
pub mod extra;
pub mod parser;
pub mod structures;
pub mod time;
pub mod writer;

pub use archive::{Archive, EntryReader, EntryRef};
pub use entry::{Entry, EntryData, RawPayload, WriteEntry};
pub use parser::{DirectoryInfo, ZipParser};
pub use structures::CompressionMethod;
pub use time::DosDateTime;
pub use writer::{ArchiveBuilder, ZipWriter, write_archive};
