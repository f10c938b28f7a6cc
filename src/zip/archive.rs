//! Opened archives and lazy access to their entries.

use std::fmt;
use std::io::{self, BufReader, Read};
use std::ops::Deref;

use tracing::{debug, trace};

use super::codec::{self, Decoder};
use super::entry::{Entry, RawPayload, WriteEntry};
use super::parser::{DirectoryInfo, ZipParser};
use super::structures::{DataDescriptor, LocalFileHeader, flags};
use crate::error::{FormatError, Result};
use crate::io::{CHUNK_SIZE, ChannelInput, ChannelReader};

/// Upper bound on the up-front allocation for [`Archive::read_entry`]; the
/// declared size is not trusted beyond it.
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

/// A parsed archive over a channel it owns.
///
/// Opening reads the central directory only. Payloads stay in the channel and
/// are located, decompressed and checked when an entry is read, so a failure
/// there affects that entry alone.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use zipkit::{Archive, FileChannelInput};
///
/// # fn main() -> zipkit::Result<()> {
/// let archive = Archive::open(FileChannelInput::open(Path::new("bundle.zip"))?)?;
/// for entry in archive.iter() {
///     println!("{} ({} bytes)", entry.path(), entry.uncompressed_size);
/// }
/// if let Some(readme) = archive.by_path("README.md") {
///     let text = readme.read()?;
///     println!("{}", String::from_utf8_lossy(&text));
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Archive<C: ChannelInput> {
    channel: C,
    entries: Vec<Entry>,
    comment: Vec<u8>,
    info: DirectoryInfo,
}

impl<C: ChannelInput> Archive<C> {
    /// Parse the central directory of `channel`.
    ///
    /// Fails as a whole if the directory is malformed; no partial archive is
    /// returned.
    pub fn open(channel: C) -> Result<Self> {
        let directory = ZipParser::new(&channel).read_central_directory()?;
        debug!(
            entries = directory.entries.len(),
            zip64 = directory.info.zip64,
            cd_offset = directory.info.cd_offset,
            "opened archive"
        );
        Ok(Self {
            channel,
            entries: directory.entries,
            comment: directory.comment,
            info: directory.info,
        })
    }

    /// Entry metadata in central directory order. Reads no payload.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Archive comment bytes.
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    pub fn info(&self) -> &DirectoryInfo {
        &self.info
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = EntryRef<'_>> + '_ {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| EntryRef::new(&self.channel, entry, index))
    }

    pub fn entry(&self, index: usize) -> Option<EntryRef<'_>> {
        self.entries
            .get(index)
            .map(|entry| EntryRef::new(&self.channel, entry, index))
    }

    /// The last entry stored under `path`.
    ///
    /// Archives may hold several entries with the same name; extractors
    /// conventionally let the last one win.
    pub fn by_path(&self, path: impl AsRef<[u8]>) -> Option<EntryRef<'_>> {
        let path = path.as_ref();
        self.entries
            .iter()
            .rposition(|entry| entry.path == path)
            .and_then(|index| self.entry(index))
    }

    /// Decompress an entry fully into memory, checking its CRC-32.
    pub fn read_entry(&self, entry: &Entry) -> Result<Vec<u8>> {
        read_to_vec(&self.channel, entry)
    }

    /// Streaming decompressor for an entry.
    pub fn entry_reader(&self, entry: &Entry) -> Result<EntryReader<'_>> {
        EntryReader::new(&self.channel, entry)
    }

    /// Locate an entry's compressed bytes, for copying them elsewhere as is.
    pub fn raw_payload(&self, entry: &Entry) -> Result<RawPayload<'_>> {
        locate_payload(&self.channel, entry)
    }

    /// Decompress every entry, collecting one result per entry.
    ///
    /// Does not stop at the first failure.
    pub fn verify_all(&self) -> Vec<Result<()>> {
        self.entries
            .iter()
            .map(|entry| -> Result<()> {
                let mut reader = EntryReader::new(&self.channel, entry)?;
                io::copy(&mut reader, &mut io::sink())?;
                Ok(())
            })
            .collect()
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }
}

/// Borrowed view of one entry and the channel holding its payload.
///
/// Cannot outlive the [`Archive`] it came from.
#[derive(Clone, Copy)]
pub struct EntryRef<'a> {
    channel: &'a dyn ChannelInput,
    entry: &'a Entry,
    index: usize,
}

impl<'a> EntryRef<'a> {
    fn new(channel: &'a dyn ChannelInput, entry: &'a Entry, index: usize) -> Self {
        Self {
            channel,
            entry,
            index,
        }
    }

    /// Position in the central directory.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn metadata(&self) -> &'a Entry {
        self.entry
    }

    pub fn raw_payload(&self) -> Result<RawPayload<'a>> {
        locate_payload(self.channel, self.entry)
    }

    pub fn reader(&self) -> Result<EntryReader<'a>> {
        EntryReader::new(self.channel, self.entry)
    }

    pub fn read(&self) -> Result<Vec<u8>> {
        read_to_vec(self.channel, self.entry)
    }

    /// A write source copying this entry without recompressing it.
    pub fn pass_through(&self) -> Result<WriteEntry<'a>> {
        Ok(WriteEntry::pass_through(self.entry, self.raw_payload()?))
    }
}

impl Deref for EntryRef<'_> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        self.entry
    }
}

impl fmt::Debug for EntryRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("index", &self.index)
            .field("entry", self.entry)
            .finish()
    }
}

fn read_to_vec(channel: &dyn ChannelInput, entry: &Entry) -> Result<Vec<u8>> {
    let mut reader = EntryReader::new(channel, entry)?;
    let mut data = Vec::with_capacity(entry.uncompressed_size.min(MAX_PREALLOCATION) as usize);
    reader.read_to_end(&mut data)?;
    Ok(data)
}

/// Resolve the local header of `entry` to the range of its compressed bytes.
///
/// Sizes come from the central directory. Every offset is checked against the
/// channel length before it is used. A trailing data descriptor is not
/// looked at here; [`EntryReader`] checks it once the data has been verified.
fn locate_payload<'a>(channel: &'a dyn ChannelInput, entry: &Entry) -> Result<RawPayload<'a>> {
    let lfh_offset = entry.lfh_offset;
    let length = channel.length();
    let header_end = lfh_offset.checked_add(LocalFileHeader::SIZE as u64);
    if header_end.is_none_or(|end| end > length) {
        return Err(
            FormatError::corrupt(lfh_offset, "local file header outside the archive").into(),
        );
    }

    let buf = channel.read(lfh_offset, LocalFileHeader::SIZE)?;
    let header = LocalFileHeader::from_bytes(&buf).ok_or_else(|| {
        FormatError::corrupt(lfh_offset, "invalid local file header signature")
    })?;

    let data_offset = lfh_offset + LocalFileHeader::SIZE as u64 + header.variable_len();
    let data_end = data_offset
        .checked_add(entry.compressed_size)
        .filter(|end| *end <= length)
        .ok_or_else(|| {
            FormatError::corrupt(lfh_offset, "entry data runs past the end of the archive")
        })?;
    let descriptor = (header.flags | entry.flags) & flags::DATA_DESCRIPTOR != 0;

    trace!(path = %entry.path(), data_offset, "located entry data");
    Ok(RawPayload {
        source: channel,
        data_offset,
        descriptor_offset: descriptor.then_some(data_end),
        compressed_size: entry.compressed_size,
        uncompressed_size: entry.uncompressed_size,
        crc32: entry.crc32,
        method: entry.compression_method,
    })
}

/// Streaming decompressor for one entry.
///
/// Yields the entry's uncompressed bytes and checks them at the end: a CRC-32
/// mismatch fails with [`FormatError::ChecksumMismatch`], a size mismatch
/// with [`FormatError::CorruptEntry`], and so does a data descriptor that
/// disagrees with the verified CRC. Errors arrive as [`io::Error`]s wrapping
/// the [`FormatError`]; converting them into [`Error`] recovers it.
pub struct EntryReader<'a> {
    channel: &'a dyn ChannelInput,
    decoder: Decoder<BufReader<ChannelReader<'a>>>,
    descriptor_offset: Option<u64>,
    hasher: crc32fast::Hasher,
    produced: u64,
    expected_size: u64,
    expected_crc: u32,
    lfh_offset: u64,
    verified: bool,
}

impl<'a> EntryReader<'a> {
    fn new(channel: &'a dyn ChannelInput, entry: &Entry) -> Result<Self> {
        if entry.is_encrypted() {
            return Err(FormatError::Encrypted.into());
        }
        codec::ensure_supported(entry.compression_method)?;

        let payload = locate_payload(channel, entry)?;
        let source = ChannelReader::new(channel, payload.data_offset, payload.compressed_size);
        let decoder = Decoder::new(
            entry.compression_method,
            BufReader::with_capacity(CHUNK_SIZE, source),
        )?;

        Ok(Self {
            channel,
            decoder,
            descriptor_offset: payload.descriptor_offset,
            hasher: crc32fast::Hasher::new(),
            produced: 0,
            expected_size: entry.uncompressed_size,
            expected_crc: entry.crc32,
            lfh_offset: entry.lfh_offset,
            verified: false,
        })
    }

    /// Uncompressed bytes produced so far.
    pub fn position(&self) -> u64 {
        self.produced
    }

    fn verify(&mut self) -> io::Result<()> {
        if self.verified {
            return Ok(());
        }
        let actual = self.hasher.clone().finalize();
        if actual != self.expected_crc {
            return Err(FormatError::ChecksumMismatch {
                expected: self.expected_crc,
                actual,
            }
            .into());
        }
        if self.produced != self.expected_size {
            return Err(FormatError::corrupt(
                self.lfh_offset,
                format!(
                    "entry decompressed to {} bytes, expected {}",
                    self.produced, self.expected_size
                ),
            )
            .into());
        }
        if let Some(offset) = self.descriptor_offset {
            let available = (self.channel.length() - offset).min(DataDescriptor::MAX_SIZE as u64);
            let descriptor = self.channel.read(offset, available as usize)?;
            if !DataDescriptor::crc_matches(&descriptor, self.expected_crc) {
                return Err(FormatError::corrupt(
                    offset,
                    "data descriptor does not match the central directory",
                )
                .into());
            }
        }
        self.verified = true;
        Ok(())
    }
}

impl Read for EntryReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = self.decoder.read(buf)?;
        if n == 0 {
            self.verify()?;
            return Ok(0);
        }
        self.produced += n as u64;
        if self.produced > self.expected_size {
            return Err(FormatError::corrupt(
                self.lfh_offset,
                "entry decompresses to more bytes than declared",
            )
            .into());
        }
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

impl fmt::Debug for EntryReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryReader")
            .field("produced", &self.produced)
            .field("expected_size", &self.expected_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemoryChannelInput, MemoryChannelOutput};
    use crate::zip::entry::WriteEntry;
    use crate::zip::structures::CompressionMethod;
    use crate::zip::writer::ZipWriter;

    fn sample() -> Archive<MemoryChannelInput> {
        let mut writer = ZipWriter::new(MemoryChannelOutput::new());
        writer
            .write_entry(WriteEntry::file("a.txt", &b"first"[..]).method(CompressionMethod::Stored))
            .unwrap();
        writer
            .write_entry(WriteEntry::file("b.txt", b"second".repeat(50)))
            .unwrap();
        writer
            .write_entry(WriteEntry::file("a.txt", &b"third"[..]))
            .unwrap();
        let output = writer.finish().unwrap();
        Archive::open(output.into_input()).unwrap()
    }

    #[test]
    fn by_path_prefers_last_duplicate() {
        let archive = sample();
        assert_eq!(archive.len(), 3);
        let entry = archive.by_path("a.txt").unwrap();
        assert_eq!(entry.index(), 2);
        assert_eq!(entry.read().unwrap(), b"third");
        assert!(archive.by_path("missing").is_none());
    }

    #[test]
    fn reader_reports_position() {
        let archive = sample();
        let entry = archive.entry(1).unwrap();
        let mut reader = entry.reader().unwrap();
        let mut buf = [0u8; 12];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"secondsecond");
        assert_eq!(reader.position(), 12);
    }

    #[test]
    fn raw_payload_of_stored_entry_is_content() {
        let archive = sample();
        let entry = archive.entry(0).unwrap();
        let payload = entry.raw_payload().unwrap();
        assert_eq!(payload.read_compressed().unwrap(), b"first");
    }

    #[test]
    fn entry_reader_and_channel_hand_back() {
        let archive = sample();
        let length = archive.channel().length();
        let entry = archive.entries()[1].clone();
        let mut content = Vec::new();
        archive
            .entry_reader(&entry)
            .unwrap()
            .read_to_end(&mut content)
            .unwrap();
        assert_eq!(content, b"second".repeat(50));
        assert_eq!(archive.into_channel().length(), length);
    }

    #[test]
    fn verify_all_passes_on_clean_archive() {
        let archive = sample();
        assert!(archive.verify_all().iter().all(|r| r.is_ok()));
    }
}
