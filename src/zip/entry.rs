//! Entry metadata and write sources.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;

use chrono::{DateTime, Utc};

use super::structures::{CompressionMethod, HOST_UNIX, VERSION_DEFAULT, flags};
use super::time::DosDateTime;
use crate::io::ChannelInput;

/// MS-DOS directory attribute bit in `external_attributes`.
const DOS_DIRECTORY: u32 = 0x10;
const UNIX_FILE_TYPE_MASK: u32 = 0o170000;
const UNIX_DIRECTORY: u32 = 0o040000;
const UNIX_REGULAR: u32 = 0o100000;

/// Metadata of one entry, as listed in the central directory.
///
/// Holds no payload; the bytes stay in the channel at `lfh_offset` until the
/// entry is read through its [`Archive`](crate::Archive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Raw name bytes. UTF-8 only if [`is_utf8`](Self::is_utf8) says so.
    pub path: Vec<u8>,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub last_modified: DosDateTime,
    /// From the extended timestamp extra field, when present.
    pub modified_utc: Option<DateTime<Utc>>,
    pub external_attributes: u32,
    pub version_made_by: u16,
    pub flags: u16,
    pub comment: Vec<u8>,
    /// Extra field records not interpreted by this crate.
    pub extra: Vec<u8>,
    /// Offset of the local file header, already corrected for prepended data.
    pub lfh_offset: u64,
}

impl Entry {
    /// Name for display. Non-UTF-8 bytes are replaced.
    pub fn path(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    pub fn is_dir(&self) -> bool {
        self.path.ends_with(b"/") || self.external_attributes & DOS_DIRECTORY != 0
    }

    pub fn is_utf8(&self) -> bool {
        self.flags & flags::UTF8 != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }

    pub fn has_data_descriptor(&self) -> bool {
        self.flags & flags::DATA_DESCRIPTOR != 0
    }

    /// Best available modification time.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        self.modified_utc
            .or_else(|| self.last_modified.to_datetime().map(|dt| dt.and_utc()))
    }

    /// Unix mode bits, when the entry was made on a Unix host.
    pub fn unix_mode(&self) -> Option<u32> {
        let mode = self.external_attributes >> 16;
        (self.version_made_by >> 8 == HOST_UNIX && mode != 0).then_some(mode)
    }
}

/// Location of an entry's compressed bytes inside a source channel.
///
/// Borrowing the channel ties a pass-through copy to the lifetime of the
/// archive it comes from.
#[derive(Clone, Copy)]
pub struct RawPayload<'a> {
    pub(crate) source: &'a dyn ChannelInput,
    pub data_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub method: CompressionMethod,
    /// Where the data descriptor starts, for entries written with one.
    pub descriptor_offset: Option<u64>,
}

impl RawPayload<'_> {
    /// The compressed bytes, exactly as stored.
    pub fn read_compressed(&self) -> std::io::Result<Vec<u8>> {
        self.source
            .read(self.data_offset, self.compressed_size as usize)
    }
}

impl fmt::Debug for RawPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawPayload")
            .field("data_offset", &self.data_offset)
            .field("compressed_size", &self.compressed_size)
            .field("uncompressed_size", &self.uncompressed_size)
            .field("crc32", &format_args!("{:#010x}", self.crc32))
            .field("method", &self.method)
            .field("descriptor_offset", &self.descriptor_offset)
            .finish()
    }
}

/// Where a written entry's bytes come from.
pub enum EntryData<'a> {
    /// Already-compressed bytes copied verbatim from another archive.
    PassThrough(RawPayload<'a>),
    /// Uncompressed bytes in memory.
    Bytes(Cow<'a, [u8]>),
    /// Uncompressed bytes of unknown length.
    Reader(Box<dyn Read + 'a>),
}

impl fmt::Debug for EntryData<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryData::PassThrough(raw) => f.debug_tuple("PassThrough").field(raw).finish(),
            EntryData::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            EntryData::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// One entry to be written, with its metadata and payload source.
#[derive(Debug)]
pub struct WriteEntry<'a> {
    pub(crate) path: Vec<u8>,
    pub(crate) utf8: bool,
    pub(crate) method: CompressionMethod,
    pub(crate) last_modified: DosDateTime,
    pub(crate) modified_utc: Option<DateTime<Utc>>,
    pub(crate) external_attributes: u32,
    pub(crate) version_made_by: u16,
    pub(crate) comment: Vec<u8>,
    pub(crate) extra: Vec<u8>,
    pub(crate) large_file: bool,
    /// Flag bits carried over from a source entry.
    pub(crate) source_flags: u16,
    pub(crate) data: EntryData<'a>,
}

impl<'a> WriteEntry<'a> {
    fn with_data(path: Vec<u8>, utf8: bool, data: EntryData<'a>) -> Self {
        let now = Utc::now();
        Self {
            path,
            utf8,
            method: CompressionMethod::Deflate,
            last_modified: DosDateTime::from(now),
            modified_utc: Some(now),
            external_attributes: (UNIX_REGULAR | 0o644) << 16,
            version_made_by: (HOST_UNIX << 8) | VERSION_DEFAULT,
            comment: Vec::new(),
            extra: Vec::new(),
            large_file: false,
            source_flags: 0,
            data,
        }
    }

    /// A file whose content is already in memory. Deflated by default.
    pub fn file(path: &str, data: impl Into<Cow<'a, [u8]>>) -> Self {
        Self::with_data(
            path.as_bytes().to_vec(),
            !path.is_ascii(),
            EntryData::Bytes(data.into()),
        )
    }

    /// A file streamed from `reader`. Its sizes are known only once the
    /// reader is drained, so it is written with a data descriptor.
    pub fn from_reader(path: &str, reader: impl Read + 'a) -> Self {
        Self::with_data(
            path.as_bytes().to_vec(),
            !path.is_ascii(),
            EntryData::Reader(Box::new(reader)),
        )
    }

    /// A directory entry. A trailing slash is added if missing.
    pub fn directory(path: &str) -> Self {
        let mut name = path.as_bytes().to_vec();
        if !name.ends_with(b"/") {
            name.push(b'/');
        }
        let data = EntryData::Bytes(Cow::Borrowed(&b""[..]));
        let mut entry = Self::with_data(name, !path.is_ascii(), data);
        entry.method = CompressionMethod::Stored;
        entry.external_attributes = ((UNIX_DIRECTORY | 0o755) << 16) | DOS_DIRECTORY;
        entry
    }

    /// An entry with a name in some legacy encoding, written without the
    /// UTF-8 flag and never transcoded.
    pub fn raw(path: impl Into<Vec<u8>>, data: EntryData<'a>) -> Self {
        Self::with_data(path.into(), false, data)
    }

    /// Copy an existing entry without recompressing it.
    pub fn pass_through(entry: &Entry, payload: RawPayload<'a>) -> Self {
        Self {
            path: entry.path.clone(),
            utf8: entry.is_utf8(),
            method: payload.method,
            last_modified: entry.last_modified,
            modified_utc: entry.modified_utc,
            external_attributes: entry.external_attributes,
            version_made_by: entry.version_made_by,
            comment: entry.comment.clone(),
            extra: entry.extra.clone(),
            large_file: false,
            source_flags: pass_through_flags(entry.flags),
            data: EntryData::PassThrough(payload),
        }
    }

    /// Compression method. Ignored for pass-through entries, which keep theirs.
    pub fn method(mut self, method: CompressionMethod) -> Self {
        if !matches!(self.data, EntryData::PassThrough(_)) {
            self.method = method;
        }
        self
    }

    /// Modification time. Stored as a DOS timestamp plus an extended
    /// timestamp field that keeps whole seconds and pre-1980 dates.
    pub fn modified(mut self, mtime: DateTime<Utc>) -> Self {
        self.last_modified = DosDateTime::from(mtime);
        self.modified_utc = Some(mtime);
        self
    }

    /// DOS timestamp only, without an extended timestamp field.
    pub fn last_modified(mut self, dos: DosDateTime) -> Self {
        self.last_modified = dos;
        self.modified_utc = None;
        self
    }

    /// Permission bits; the file type bits are kept.
    pub fn unix_permissions(mut self, mode: u32) -> Self {
        let file_type = match (self.external_attributes >> 16) & UNIX_FILE_TYPE_MASK {
            0 if self.is_dir() => UNIX_DIRECTORY,
            0 => UNIX_REGULAR,
            t => t,
        };
        let low = self.external_attributes & 0xFFFF;
        self.external_attributes = ((file_type | (mode & 0o7777)) << 16) | low;
        self.version_made_by = (HOST_UNIX << 8) | (self.version_made_by & 0xFF);
        self
    }

    pub fn external_attributes(mut self, attributes: u32) -> Self {
        self.external_attributes = attributes;
        self
    }

    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Append an extra field record. Zip64 and extended timestamp records
    /// are managed by the writer and should not be added here.
    ///
    /// Oversized data is kept whole; the writer rejects the entry.
    pub fn extra_field(mut self, id: u16, data: &[u8]) -> Self {
        let len = u16::try_from(data.len()).unwrap_or(u16::MAX);
        self.extra.extend_from_slice(&id.to_le_bytes());
        self.extra.extend_from_slice(&len.to_le_bytes());
        self.extra.extend_from_slice(data);
        self
    }

    /// Write Zip64 size fields up front. Needed for streamed entries that may
    /// exceed 4 GiB, since their sizes are unknown when the header is written.
    pub fn large_file(mut self, large: bool) -> Self {
        self.large_file = large;
        self
    }

    /// Give the entry a new UTF-8 name.
    pub fn rename(mut self, path: &str) -> Self {
        self.path = path.as_bytes().to_vec();
        self.utf8 = !path.is_ascii();
        self
    }

    pub fn path(&self) -> &[u8] {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.path.ends_with(b"/")
    }

    pub fn compression_method(&self) -> CompressionMethod {
        self.method
    }

    pub fn data(&self) -> &EntryData<'a> {
        &self.data
    }
}

/// Flag bits a copied entry keeps. Traditional encryption checks its header
/// against the DOS time instead of the CRC when bit 3 is set, so encrypted
/// entries keep their data descriptor too.
fn pass_through_flags(source: u16) -> u16 {
    let mut kept = source & (flags::ENCRYPTED | flags::COMPRESSION_OPTIONS);
    if source & flags::ENCRYPTED != 0 {
        kept |= source & flags::DATA_DESCRIPTOR;
    }
    kept
}
