//! Archive writer.
//!
//! Writing happens in two phases. [`ZipWriter::write_entry`] streams each
//! entry's local header and data to the output and remembers where it went;
//! [`ZipWriter::finish`] then emits the central directory and end records from
//! what was remembered. The output is never seeked, so any append-only
//! [`ChannelOutput`] works.

use std::borrow::Cow;
use std::io::{self, Read, Write};

use tracing::{debug, trace};

use super::archive::Archive;
use super::codec::{self, DEFAULT_LEVEL, Encoder};
use super::entry::{EntryData, RawPayload, WriteEntry};
use super::extra;
use super::structures::*;
use super::time::DosDateTime;
use crate::error::{Error, Result};
use crate::io::{CHUNK_SIZE, ChannelInput, ChannelOutput, ChannelWriter, copy_range};

/// Room kept in the 16-bit extra field length for the records this crate adds.
const RESERVED_EXTRA: usize = 64;

/// What the central directory needs to know about a written entry.
#[derive(Debug)]
struct CentralRecord {
    path: Vec<u8>,
    flags: u16,
    method: u16,
    last_modified: DosDateTime,
    timestamp: Option<[u8; 9]>,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    external_attributes: u32,
    version_made_by: u16,
    comment: Vec<u8>,
    extra: Vec<u8>,
    large_file: bool,
}

/// Sizes and checksum of a payload once it has been written.
struct Written {
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
}

/// Streams entries into a [`ChannelOutput`] it owns until [`finish`](Self::finish).
///
/// ```
/// use zipkit::{Archive, MemoryChannelOutput, WriteEntry, ZipWriter};
///
/// # fn main() -> zipkit::Result<()> {
/// let mut writer = ZipWriter::new(MemoryChannelOutput::new()).comment("built by zipkit");
/// writer.write_entry(WriteEntry::directory("docs"))?;
/// writer.write_entry(WriteEntry::file("docs/hello.txt", &b"Hello, world!"[..]))?;
/// let output = writer.finish()?;
///
/// let archive = Archive::open(output.into_input())?;
/// assert_eq!(archive.len(), 2);
/// # Ok(())
/// # }
/// ```
pub struct ZipWriter<O: ChannelOutput> {
    output: O,
    records: Vec<CentralRecord>,
    level: u32,
    comment: Vec<u8>,
    any_zip64: bool,
}

impl<O: ChannelOutput> ZipWriter<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            records: Vec::new(),
            level: DEFAULT_LEVEL,
            comment: Vec::new(),
            any_zip64: false,
        }
    }

    /// Deflate level, 0 (fastest) to 9 (smallest).
    pub fn compression_level(mut self, level: u32) -> Self {
        self.level = level.min(9);
        self
    }

    /// Archive comment, written after the end of central directory record.
    pub fn comment(mut self, comment: impl Into<Vec<u8>>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn entries_written(&self) -> usize {
        self.records.len()
    }

    /// Write one entry: local header, data and, for streamed data, a data
    /// descriptor.
    ///
    /// Invalid entries are rejected before anything is written. An I/O error
    /// leaves the output partially written; cleaning it up is up to the caller.
    pub fn write_entry(&mut self, entry: WriteEntry<'_>) -> Result<()> {
        check_archive_comment(&self.comment)?;
        validate(&entry)?;

        let lfh_offset = self.output.current_offset();
        let WriteEntry {
            path,
            utf8,
            method,
            last_modified,
            modified_utc,
            external_attributes,
            version_made_by,
            comment,
            extra,
            large_file,
            source_flags,
            data,
        } = entry;

        let mut flags = source_flags;
        if utf8 {
            flags |= flags::UTF8;
        }
        let timestamp = modified_utc.as_ref().and_then(extra::extended_timestamp);
        let header = LocalHeader {
            path: &path,
            flags,
            method,
            last_modified,
            timestamp: timestamp.as_ref(),
            extra: &extra,
        };

        let (written, flags, zip64) = match data {
            EntryData::PassThrough(payload) => {
                let zip64 = large_file
                    || needs_zip64(payload.compressed_size)
                    || needs_zip64(payload.uncompressed_size);
                let written = Written {
                    crc32: payload.crc32,
                    compressed_size: payload.compressed_size,
                    uncompressed_size: payload.uncompressed_size,
                };
                self.copy_payload(&header, payload, &written, zip64)?;
                (written, flags, zip64)
            }
            EntryData::Bytes(bytes) if method == CompressionMethod::Stored => {
                let zip64 = large_file || needs_zip64(bytes.len() as u64);
                let written = self.store_bytes(&header, &bytes, zip64)?;
                (written, flags, zip64)
            }
            EntryData::Bytes(bytes) => {
                let zip64 = large_file || needs_zip64(deflate_bound(bytes.len() as u64));
                let header = LocalHeader {
                    flags: flags | flags::DATA_DESCRIPTOR,
                    ..header
                };
                let written = self.stream_payload(&header, &mut &bytes[..], zip64)?;
                (written, header.flags, zip64)
            }
            EntryData::Reader(mut reader) => {
                let header = LocalHeader {
                    flags: flags | flags::DATA_DESCRIPTOR,
                    ..header
                };
                // The size is unknown until the reader is drained, so the local
                // header always announces Zip64 and the descriptor is 64-bit.
                let written = self.stream_payload(&header, &mut reader, true)?;
                (written, header.flags, large_file)
            }
        };

        let record = CentralRecord {
            path,
            flags,
            method: method.as_u16(),
            last_modified,
            timestamp,
            crc32: written.crc32,
            compressed_size: written.compressed_size,
            uncompressed_size: written.uncompressed_size,
            lfh_offset,
            external_attributes,
            version_made_by,
            comment,
            extra,
            large_file: zip64,
        };
        trace!(
            path = %String::from_utf8_lossy(&record.path),
            offset = lfh_offset,
            compressed = record.compressed_size,
            uncompressed = record.uncompressed_size,
            "wrote entry"
        );
        self.records.push(record);
        Ok(())
    }

    /// Write the central directory and end records, close the output and
    /// return it.
    pub fn finish(mut self) -> Result<O> {
        check_archive_comment(&self.comment)?;

        let cd_offset = self.output.current_offset();
        for record in &self.records {
            let mut buf = Vec::with_capacity(
                CentralDirectoryHeader::SIZE + record.path.len() + record.extra.len() + 64,
            );
            self.any_zip64 |= write_central_record(&mut buf, record)?;
            self.output.write(&buf)?;
        }
        let cd_end = self.output.current_offset();
        let cd_size = cd_end - cd_offset;
        let count = self.records.len() as u64;

        let zip64 = self.any_zip64
            || count >= u64::from(ZIP64_ENTRY_SENTINEL)
            || needs_zip64(cd_offset)
            || needs_zip64(cd_size);

        let mut tail = Vec::with_capacity(
            Zip64EOCD::MIN_SIZE + Zip64EOCDLocator::SIZE + EndOfCentralDirectory::SIZE,
        );
        if zip64 {
            debug!(entries = count, cd_offset, cd_size, "writing zip64 end records");
            Zip64EOCD {
                eocd64_size: Zip64EOCD::FIXED_RECORD_SIZE,
                version_made_by: (HOST_UNIX << 8) | VERSION_ZIP64,
                version_needed: VERSION_ZIP64,
                disk_number: 0,
                disk_with_cd: 0,
                disk_entries: count,
                total_entries: count,
                cd_size,
                cd_offset,
            }
            .write_to(&mut tail)?;
            Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset: cd_end,
                total_disks: 1,
            }
            .write_to(&mut tail)?;
        }

        // With Zip64 end records present every field points there.
        let (entries, size, offset) = if zip64 {
            (ZIP64_ENTRY_SENTINEL, ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (count as u16, cd_size as u32, cd_offset as u32)
        };
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size: size,
            cd_offset: offset,
            comment_len: self.comment.len() as u16,
        }
        .write_to(&mut tail)?;
        tail.extend_from_slice(&self.comment);

        self.output.write(&tail)?;
        self.output.close()?;
        debug!(entries = count, zip64, "finished archive");
        Ok(self.output)
    }

    fn write_local_header(
        &mut self,
        header: &LocalHeader<'_>,
        known: Option<&Written>,
        zip64: bool,
    ) -> Result<()> {
        let (crc32, compressed, uncompressed) = known
            .map(|w| (w.crc32, w.compressed_size, w.uncompressed_size))
            .unwrap_or((0, 0, 0));

        let mut extra_field = Vec::new();
        if zip64 {
            extra::write_zip64(&mut extra_field, &[uncompressed, compressed])?;
        }
        if let Some(timestamp) = header.timestamp {
            extra_field.extend_from_slice(timestamp);
        }
        extra_field.extend_from_slice(header.extra);

        let (compressed_field, uncompressed_field) = if zip64 {
            (ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (compressed as u32, uncompressed as u32)
        };

        let mut buf =
            Vec::with_capacity(LocalFileHeader::SIZE + header.path.len() + extra_field.len());
        LocalFileHeader {
            version_needed: if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT },
            flags: header.flags,
            compression_method: header.method.as_u16(),
            last_mod_time: header.last_modified.time,
            last_mod_date: header.last_modified.date,
            crc32,
            compressed_size: compressed_field,
            uncompressed_size: uncompressed_field,
            file_name_len: header.path.len() as u16,
            extra_len: extra_field.len() as u16,
        }
        .write_to(&mut buf)?;
        buf.extend_from_slice(header.path);
        buf.extend_from_slice(&extra_field);
        self.output.write(&buf)?;
        Ok(())
    }

    /// Copy compressed bytes as they are. A source that carried a data
    /// descriptor (kept for encrypted entries) gets one again after the data.
    fn copy_payload(
        &mut self,
        header: &LocalHeader<'_>,
        payload: RawPayload<'_>,
        known: &Written,
        zip64: bool,
    ) -> Result<()> {
        let descriptor = header.flags & flags::DATA_DESCRIPTOR != 0;
        self.write_local_header(header, (!descriptor).then_some(known), zip64)?;
        let source: &dyn ChannelInput = payload.source;
        copy_range(
            source,
            payload.data_offset,
            payload.compressed_size,
            &mut self.output,
        )?;
        if descriptor {
            self.write_descriptor(header, known, zip64)?;
        }
        Ok(())
    }

    fn store_bytes(
        &mut self,
        header: &LocalHeader<'_>,
        bytes: &[u8],
        zip64: bool,
    ) -> Result<Written> {
        let written = Written {
            crc32: crc32fast::hash(bytes),
            compressed_size: bytes.len() as u64,
            uncompressed_size: bytes.len() as u64,
        };
        self.write_local_header(header, Some(&written), zip64)?;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            self.output.write(chunk)?;
        }
        Ok(written)
    }

    /// Compress `reader` straight into the output, then write a data
    /// descriptor with the CRC-32 and sizes seen on the way.
    ///
    /// `zip64` must be set whenever the sizes could pass 4 GiB: it puts a
    /// Zip64 field in the local header and selects the 64-bit descriptor.
    fn stream_payload(
        &mut self,
        header: &LocalHeader<'_>,
        reader: &mut dyn Read,
        zip64: bool,
    ) -> Result<Written> {
        self.write_local_header(header, None, zip64)?;

        let level = self.level;
        let start = self.output.current_offset();
        let mut hasher = crc32fast::Hasher::new();
        let mut uncompressed_size = 0u64;
        let mut encoder = Encoder::new(header.method, ChannelWriter::new(&mut self.output), level)?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            uncompressed_size += n as u64;
            encoder.write_all(&buf[..n])?;
        }
        encoder.finish()?;

        let written = Written {
            crc32: hasher.finalize(),
            compressed_size: self.output.current_offset() - start,
            uncompressed_size,
        };

        self.write_descriptor(header, &written, zip64)?;
        Ok(written)
    }

    /// The descriptor is 64-bit exactly when the local header has a Zip64
    /// field, which is how streaming readers pick its layout.
    fn write_descriptor(
        &mut self,
        header: &LocalHeader<'_>,
        written: &Written,
        zip64: bool,
    ) -> Result<()> {
        let overflowed =
            needs_zip64(written.compressed_size) || needs_zip64(written.uncompressed_size);
        if !zip64 && overflowed {
            return Err(Error::InvalidEntry {
                path: String::from_utf8_lossy(header.path).into_owned(),
                reason: "entry passed 4 GiB without Zip64 fields in its local header",
            });
        }
        let mut descriptor = Vec::with_capacity(DataDescriptor::MAX_SIZE);
        DataDescriptor {
            crc32: written.crc32,
            compressed_size: written.compressed_size,
            uncompressed_size: written.uncompressed_size,
        }
        .write_to(&mut descriptor, zip64)?;
        self.output.write(&descriptor)?;
        Ok(())
    }
}

/// Fields shared by every local header variant.
#[derive(Clone, Copy)]
struct LocalHeader<'h> {
    path: &'h [u8],
    flags: u16,
    method: CompressionMethod,
    last_modified: DosDateTime,
    timestamp: Option<&'h [u8; 9]>,
    extra: &'h [u8],
}

/// Upper bound on the deflated size of `len` input bytes, with room to spare
/// over zlib's `deflateBound`.
fn deflate_bound(len: u64) -> u64 {
    len.saturating_add(len >> 10).saturating_add(64)
}

fn check_archive_comment(comment: &[u8]) -> Result<()> {
    if comment.len() > usize::from(u16::MAX) {
        return Err(Error::InvalidEntry {
            path: "(archive comment)".to_string(),
            reason: "comment longer than 65535 bytes",
        });
    }
    Ok(())
}

fn validate(entry: &WriteEntry<'_>) -> Result<()> {
    let invalid = |reason: &'static str| Error::InvalidEntry {
        path: String::from_utf8_lossy(&entry.path).into_owned(),
        reason,
    };

    if entry.path.is_empty() {
        return Err(invalid("empty path"));
    }
    if entry.path.len() > usize::from(u16::MAX) {
        return Err(invalid("path longer than 65535 bytes"));
    }
    if entry.path.starts_with(b"/") {
        return Err(invalid("absolute path"));
    }
    if entry.comment.len() > usize::from(u16::MAX) {
        return Err(invalid("comment longer than 65535 bytes"));
    }
    if entry.extra.len() > usize::from(u16::MAX) - RESERVED_EXTRA {
        return Err(invalid("extra field too long"));
    }
    if entry.is_dir() {
        let has_payload = match &entry.data {
            EntryData::PassThrough(payload) => payload.uncompressed_size > 0,
            EntryData::Bytes(bytes) => !bytes.is_empty(),
            EntryData::Reader(_) => false,
        };
        if has_payload {
            return Err(invalid("directory with payload"));
        }
    }
    if !matches!(entry.data, EntryData::PassThrough(_)) {
        codec::ensure_supported(entry.method)?;
    }
    Ok(())
}

/// Serialize one central directory record. Returns whether it used Zip64.
fn write_central_record(buf: &mut Vec<u8>, record: &CentralRecord) -> io::Result<bool> {
    let force = record.large_file;
    let wide_uncompressed = force || needs_zip64(record.uncompressed_size);
    let wide_compressed = force || needs_zip64(record.compressed_size);
    let wide_offset = needs_zip64(record.lfh_offset);

    // Values appear in this fixed order, and only for saturated fields.
    let mut zip64_values = Vec::with_capacity(3);
    if wide_uncompressed {
        zip64_values.push(record.uncompressed_size);
    }
    if wide_compressed {
        zip64_values.push(record.compressed_size);
    }
    if wide_offset {
        zip64_values.push(record.lfh_offset);
    }
    let zip64 = !zip64_values.is_empty();

    let mut extra_field = Vec::new();
    if zip64 {
        extra::write_zip64(&mut extra_field, &zip64_values)?;
    }
    if let Some(timestamp) = &record.timestamp {
        extra_field.extend_from_slice(timestamp);
    }
    extra_field.extend_from_slice(&record.extra);

    let saturate = |wide: bool, value: u64| if wide { ZIP64_SENTINEL } else { value as u32 };
    let version_needed = if zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };
    let version_made_by = if zip64 && record.version_made_by & 0xFF < VERSION_ZIP64 {
        (record.version_made_by & 0xFF00) | VERSION_ZIP64
    } else {
        record.version_made_by
    };

    CentralDirectoryHeader {
        version_made_by,
        version_needed,
        flags: record.flags,
        compression_method: record.method,
        last_mod_time: record.last_modified.time,
        last_mod_date: record.last_modified.date,
        crc32: record.crc32,
        compressed_size: saturate(wide_compressed, record.compressed_size),
        uncompressed_size: saturate(wide_uncompressed, record.uncompressed_size),
        file_name_len: record.path.len() as u16,
        extra_len: extra_field.len() as u16,
        comment_len: record.comment.len() as u16,
        disk_number_start: 0,
        internal_attrs: 0,
        external_attrs: record.external_attributes,
        lfh_offset: saturate(wide_offset, record.lfh_offset),
    }
    .write_to(buf)?;
    buf.extend_from_slice(&record.path);
    buf.extend_from_slice(&extra_field);
    buf.extend_from_slice(&record.comment);
    Ok(zip64)
}

/// Write `entries` in order as a complete archive.
pub fn write_archive<'a, O: ChannelOutput>(
    entries: impl IntoIterator<Item = WriteEntry<'a>>,
    output: O,
) -> Result<O> {
    let mut writer = ZipWriter::new(output);
    for entry in entries {
        writer.write_entry(entry)?;
    }
    writer.finish()
}

/// An ordered, editable list of entries to write.
///
/// Start from an existing archive with [`from_archive`](Self::from_archive) to
/// edit it: untouched entries are copied without recompression. The source
/// archive stays borrowed until [`write_to`](Self::write_to) is done with it.
///
/// Paths are matched byte for byte. When several entries share a path, the
/// editing methods act on the last one.
#[derive(Debug)]
pub struct ArchiveBuilder<'a> {
    entries: Vec<WriteEntry<'a>>,
    comment: Vec<u8>,
    level: u32,
}

impl Default for ArchiveBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            comment: Vec::new(),
            level: DEFAULT_LEVEL,
        }
    }

    /// Every entry of `archive` as a pass-through copy, plus its comment.
    pub fn from_archive<C: ChannelInput>(archive: &'a Archive<C>) -> Result<Self> {
        let entries = archive
            .iter()
            .map(|entry| entry.pass_through())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            entries,
            comment: archive.comment().to_vec(),
            level: DEFAULT_LEVEL,
        })
    }

    pub fn push(&mut self, entry: WriteEntry<'a>) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Remove every entry stored under `path`. Returns how many were removed.
    pub fn remove(&mut self, path: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.path != path.as_bytes());
        before - self.entries.len()
    }

    /// Put `entry` in place of the entry at `path`, keeping its position.
    ///
    /// Returns `false`, dropping `entry`, if nothing is stored under `path`.
    pub fn replace(&mut self, path: &str, entry: WriteEntry<'a>) -> bool {
        match self.position(path) {
            Some(index) => {
                self.entries[index] = entry;
                true
            }
            None => false,
        }
    }

    /// Change the path of an entry. Returns `false` if `from` is not present.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.position(from) {
            Some(index) => {
                let entry = &mut self.entries[index];
                entry.path = to.as_bytes().to_vec();
                entry.utf8 = !to.is_ascii();
                true
            }
            None => false,
        }
    }

    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) -> &mut Self {
        self.comment = comment.into();
        self
    }

    pub fn compression_level(&mut self, level: u32) -> &mut Self {
        self.level = level;
        self
    }

    pub fn entries(&self) -> &[WriteEntry<'a>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.position(path).is_some()
    }

    /// Write the entries in order to `output`.
    pub fn write_to<O: ChannelOutput>(self, output: O) -> Result<O> {
        let mut writer = ZipWriter::new(output)
            .compression_level(self.level)
            .comment(self.comment);
        for entry in self.entries {
            writer.write_entry(entry)?;
        }
        writer.finish()
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.entries
            .iter()
            .rposition(|entry| entry.path == path.as_bytes())
    }
}

impl<'a> Extend<WriteEntry<'a>> for ArchiveBuilder<'a> {
    fn extend<T: IntoIterator<Item = WriteEntry<'a>>>(&mut self, iter: T) {
        self.entries.extend(iter);
    }
}

impl<'a> From<Vec<WriteEntry<'a>>> for ArchiveBuilder<'a> {
    fn from(entries: Vec<WriteEntry<'a>>) -> Self {
        Self {
            entries,
            ..Self::new()
        }
    }
}

/// Shorthand for a stored, in-memory entry.
pub fn stored<'a>(path: &str, data: impl Into<Cow<'a, [u8]>>) -> WriteEntry<'a> {
    WriteEntry::file(path, data).method(CompressionMethod::Stored)
}
