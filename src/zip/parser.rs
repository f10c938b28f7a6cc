//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ChannelInput`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//!
//! Local headers are left alone; they are only visited when an entry's
//! payload is read or copied.

use tracing::debug;

use super::entry::Entry;
use super::extra;
use super::structures::*;
use super::time::DosDateTime;
use crate::error::{FormatError, Result};
use crate::io::ChannelInput;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory was found and how it was described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryInfo {
    /// Offset of the first central directory record in the channel.
    pub cd_offset: u64,
    pub cd_size: u64,
    pub total_entries: u64,
    /// Whether the Zip64 end of central directory record was used.
    pub zip64: bool,
    /// Bytes found before the archive proper, e.g. a self-extractor stub.
    pub prepended_bytes: u64,
}

/// Result of parsing a central directory.
#[derive(Debug, Clone)]
pub struct CentralDirectory {
    pub entries: Vec<Entry>,
    pub comment: Vec<u8>,
    pub info: DirectoryInfo,
}

/// Low-level ZIP file parser.
///
/// Typically used through [`Archive::open`](crate::Archive::open) rather than
/// directly.
pub struct ZipParser<'a> {
    /// The underlying data source
    reader: &'a dyn ChannelInput,
    /// Total size of the archive in bytes
    size: u64,
}

impl<'a> ZipParser<'a> {
    pub fn new(reader: &'a dyn ChannelInput) -> Self {
        let size = reader.length();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Returns the record, its offset and the archive comment that follows it.
    pub fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64, Vec<u8>)> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(FormatError::NoCentralDirectory.into());
        }

        // Optimization: First try the simple case where there's no comment.
        let offset = self.size - eocd_size;
        let buf = self.reader.read(offset, EndOfCentralDirectory::SIZE)?;
        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            if let Some(eocd) = EndOfCentralDirectory::from_bytes(&buf) {
                return Ok((eocd, offset, Vec::new()));
            }
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;
        let buf = self.reader.read(search_start, search_size as usize)?;

        // Prefer a record whose comment ends exactly at the end of the file;
        // otherwise take the last one whose comment fits, which tolerates
        // trailing junk.
        let mut fallback = None;
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            let comment_start = i + EndOfCentralDirectory::SIZE;
            if comment_start + comment_len == buf.len() {
                fallback = Some(i);
                break;
            }
            if fallback.is_none() && comment_start + comment_len < buf.len() {
                fallback = Some(i);
            }
        }

        let i = fallback.ok_or(FormatError::NoCentralDirectory)?;
        let eocd = EndOfCentralDirectory::from_bytes(&buf[i..])
            .ok_or(FormatError::NoCentralDirectory)?;
        let comment_start = i + EndOfCentralDirectory::SIZE;
        let comment = buf[comment_start..comment_start + usize::from(eocd.comment_len)].to_vec();
        Ok((eocd, search_start + i as u64, comment))
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Returns `None` when there is no locator before the EOCD. Otherwise
    /// returns the record and the offset it was actually found at.
    pub fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Option<(Zip64EOCD, u64)>> {
        let locator_size = Zip64EOCDLocator::SIZE as u64;
        if eocd_offset < locator_size {
            return Ok(None);
        }

        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset - locator_size;
        let locator_buf = self.reader.read(locator_offset, Zip64EOCDLocator::SIZE)?;
        let Some(locator) = Zip64EOCDLocator::from_bytes(&locator_buf) else {
            return Ok(None);
        };
        if locator.total_disks > 1 || locator.disk_with_eocd64 != 0 {
            return Err(FormatError::MultiVolume.into());
        }

        // The locator's offset does not account for prepended data, so fall
        // back to the spot right before the locator.
        let record_size = Zip64EOCD::MIN_SIZE as u64;
        let mut candidates = vec![locator.eocd64_offset];
        if let Some(adjacent) = locator_offset.checked_sub(record_size) {
            if adjacent != locator.eocd64_offset {
                candidates.push(adjacent);
            }
        }

        for position in candidates {
            if position.saturating_add(record_size) > locator_offset {
                continue;
            }
            let buf = self.reader.read(position, Zip64EOCD::MIN_SIZE)?;
            if let Some(record) = Zip64EOCD::from_bytes(&buf) {
                debug!(offset = position, "found zip64 end of central directory");
                return Ok(Some((record, position)));
            }
        }

        Err(FormatError::UnsupportedZip64(
            "zip64 end of central directory record not found".to_string(),
        )
        .into())
    }

    /// Parse the whole central directory.
    pub fn read_central_directory(&self) -> Result<CentralDirectory> {
        let (eocd, eocd_offset, comment) = self.find_eocd()?;
        debug!(offset = eocd_offset, "found end of central directory");

        let zip64 = if eocd.is_zip64() {
            self.read_zip64_eocd(eocd_offset)?
        } else {
            None
        };

        // Get Central Directory info, using ZIP64 if needed
        let (cd_offset, cd_size, total_entries, directory_end) = match &zip64 {
            Some((record, position)) => {
                if record.disk_number != 0 || record.disk_with_cd != 0 {
                    return Err(FormatError::MultiVolume.into());
                }
                (record.cd_offset, record.cd_size, record.total_entries, *position)
            }
            None => {
                if eocd.cd_offset == ZIP64_SENTINEL || eocd.cd_size == ZIP64_SENTINEL {
                    return Err(FormatError::UnsupportedZip64(
                        "zip64 end of central directory locator not found".to_string(),
                    )
                    .into());
                }
                if eocd.disk_number != 0 || eocd.disk_with_cd != 0 {
                    return Err(FormatError::MultiVolume.into());
                }
                (
                    u64::from(eocd.cd_offset),
                    u64::from(eocd.cd_size),
                    u64::from(eocd.total_entries),
                    eocd_offset,
                )
            }
        };

        let declared_end = cd_offset
            .checked_add(cd_size)
            .filter(|end| *end <= directory_end)
            .ok_or_else(|| {
                FormatError::corrupt(
                    eocd_offset,
                    "central directory overlaps the end of central directory record",
                )
            })?;
        let prepended_bytes =
            self.prepended_bytes(cd_offset, directory_end - declared_end, total_entries)?;
        let cd_start = cd_offset + prepended_bytes;

        // Read the entire Central Directory in one request
        // (efficient for HTTP as it's a single Range request)
        let cd_data = self.reader.read(cd_start, cd_size as usize)?;

        // Every record is at least 46 bytes, so a count the directory cannot
        // hold is caught by the parse below without a huge allocation here.
        let capacity = total_entries.min(cd_size / CentralDirectoryHeader::SIZE as u64) as usize;
        let mut entries = Vec::with_capacity(capacity);
        let mut pos = 0usize;
        for _ in 0..total_entries {
            let entry = self.parse_cdfh(&cd_data, &mut pos, cd_start, prepended_bytes)?;
            entries.push(entry);
        }

        Ok(CentralDirectory {
            entries,
            comment,
            info: DirectoryInfo {
                cd_offset: cd_start,
                cd_size,
                total_entries,
                zip64: zip64.is_some(),
                prepended_bytes,
            },
        })
    }

    /// Size of any data in front of the archive.
    ///
    /// Offsets in the directory are relative to the start of the archive. If
    /// the directory ends `gap` bytes before the end record, either data was
    /// prepended to the archive or something sits between the two; a central
    /// directory signature at the declared offset settles which.
    fn prepended_bytes(&self, cd_offset: u64, gap: u64, total_entries: u64) -> Result<u64> {
        if gap == 0 || total_entries == 0 {
            return Ok(0);
        }
        let signature_len = CentralDirectoryHeader::SIGNATURE.len();
        if cd_offset + signature_len as u64 <= self.size {
            let at_declared = self.reader.read(cd_offset, signature_len)?;
            if at_declared == CentralDirectoryHeader::SIGNATURE {
                return Ok(0);
            }
        }
        debug!(bytes = gap, "archive has prepended data");
        Ok(gap)
    }

    /// Parse one Central Directory File Header at `*pos` of `data`.
    ///
    /// `cd_start` is the channel offset of `data`, used in error reports.
    fn parse_cdfh(
        &self,
        data: &[u8],
        pos: &mut usize,
        cd_start: u64,
        prepended_bytes: u64,
    ) -> Result<Entry> {
        let record_offset = cd_start + *pos as u64;
        let rest = &data[*pos..];
        if rest.len() < CentralDirectoryHeader::SIZE {
            return Err(
                FormatError::corrupt(record_offset, "central directory record truncated").into(),
            );
        }
        let header = CentralDirectoryHeader::from_bytes(rest).ok_or_else(|| {
            FormatError::corrupt(record_offset, "invalid central directory header signature")
        })?;

        let record_len = CentralDirectoryHeader::SIZE + header.variable_len();
        if rest.len() < record_len {
            return Err(FormatError::corrupt(
                record_offset,
                "name, extra field or comment runs past the central directory",
            )
            .into());
        }

        let name_start = CentralDirectoryHeader::SIZE;
        let extra_start = name_start + usize::from(header.file_name_len);
        let comment_start = extra_start + usize::from(header.extra_len);
        let path = rest[name_start..extra_start].to_vec();
        let extra_field = &rest[extra_start..comment_start];
        let comment = rest[comment_start..record_len].to_vec();

        let mut compressed_size = u64::from(header.compressed_size);
        let mut uncompressed_size = u64::from(header.uncompressed_size);
        let mut lfh_offset = u64::from(header.lfh_offset);

        let need_uncompressed = header.uncompressed_size == ZIP64_SENTINEL;
        let need_compressed = header.compressed_size == ZIP64_SENTINEL;
        let need_offset = header.lfh_offset == ZIP64_SENTINEL;
        if need_uncompressed || need_compressed || need_offset {
            let values = extra::find(extra_field, extra::ZIP64_EXTRA_ID)
                .and_then(|data| {
                    extra::parse_zip64(data, need_uncompressed, need_compressed, need_offset)
                })
                .ok_or_else(|| {
                    FormatError::corrupt(record_offset, "missing zip64 extended information")
                })?;
            uncompressed_size = values.uncompressed_size.unwrap_or(uncompressed_size);
            compressed_size = values.compressed_size.unwrap_or(compressed_size);
            lfh_offset = values.lfh_offset.unwrap_or(lfh_offset);
        }

        let modified_utc = extra::find(extra_field, extra::EXTENDED_TIMESTAMP_ID)
            .and_then(extra::parse_extended_timestamp);

        let lfh_offset = lfh_offset.checked_add(prepended_bytes).ok_or_else(|| {
            FormatError::corrupt(record_offset, "local header offset overflows")
        })?;

        *pos += record_len;

        Ok(Entry {
            path,
            compression_method: CompressionMethod::from_u16(header.compression_method),
            compressed_size,
            uncompressed_size,
            crc32: header.crc32,
            last_modified: DosDateTime::new(header.last_mod_date, header.last_mod_time),
            modified_utc,
            external_attributes: header.external_attrs,
            version_made_by: header.version_made_by,
            flags: header.flags,
            comment,
            extra: extra::opaque_fields(extra_field),
            lfh_offset,
        })
    }
}
