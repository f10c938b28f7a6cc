//! # zipkit
//!
//! A ZIP archive engine: parse an existing archive into lazily read entries,
//! and write new archives from fresh content or from entries copied out of
//! other archives without recompressing them.
//!
//! Bytes come from and go to channels, so the same code reads local files,
//! memory buffers, sub-ranges of larger files and remote archives fetched
//! with HTTP Range requests.
//!
//! ## Features
//!
//! - Read and write ZIP and ZIP64 archives
//! - STORED and DEFLATE, streamed in bounded chunks in both directions
//! - CRC-32 checked on every read
//! - Pass-through copies of existing entries
//! - Archives embedded at an offset inside a larger file
//!
//! ## Example
//!
//! ```
//! use zipkit::{Archive, ArchiveBuilder, MemoryChannelOutput, WriteEntry};
//!
//! # fn main() -> zipkit::Result<()> {
//! let mut builder = ArchiveBuilder::new();
//! builder.push(WriteEntry::file("notes.txt", &b"first draft"[..]));
//! let original = Archive::open(builder.write_to(MemoryChannelOutput::new())?.into_input())?;
//!
//! // Copy the existing entry as is and add a second one.
//! let mut builder = ArchiveBuilder::from_archive(&original)?;
//! builder.push(WriteEntry::file("todo.txt", &b"ship it"[..]));
//! let edited = Archive::open(builder.write_to(MemoryChannelOutput::new())?.into_input())?;
//!
//! assert_eq!(edited.len(), 2);
//! assert_eq!(edited.by_path("notes.txt").unwrap().read()?, b"first draft");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod zip;

pub use cli::Cli;
pub use error::{Error, FormatError, Result};
pub use io::{
    ChannelInput, ChannelOutput, FileChannelInput, FileChannelOutput, HttpRangeChannel,
    MemoryChannelInput, MemoryChannelOutput, SliceChannel,
};
pub use zip::{
    Archive, ArchiveBuilder, CompressionMethod, DosDateTime, Entry, EntryData, EntryReader,
    EntryRef, RawPayload, WriteEntry, ZipWriter, write_archive,
};
