use std::fmt;
use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Saturated value of a 32-bit size or offset field; the real value lives in
/// the Zip64 extra field or Zip64 end of central directory record.
pub const ZIP64_SENTINEL: u32 = 0xFFFF_FFFF;

/// Saturated value of a 16-bit entry count.
pub const ZIP64_ENTRY_SENTINEL: u16 = 0xFFFF;

/// Version needed to extract: deflate, directories.
pub const VERSION_DEFAULT: u16 = 20;
/// Version needed to extract: Zip64 fields.
pub const VERSION_ZIP64: u16 = 45;
/// "Version made by" host byte for Unix, whose external attributes carry a mode.
pub const HOST_UNIX: u16 = 3;

/// General purpose flag bits.
pub mod flags {
    pub const ENCRYPTED: u16 = 0x0001;
    /// Bits 1 and 2: deflate compression option hints.
    pub const COMPRESSION_OPTIONS: u16 = 0x0006;
    /// CRC-32 and sizes follow the data in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 0x0008;
    /// Name and comment are UTF-8.
    pub const UTF8: u16 = 0x0800;
}

/// Whether a 64-bit value has to go into a Zip64 field.
pub fn needs_zip64(value: u64) -> bool {
    value >= u64::from(ZIP64_SENTINEL)
}

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionMethod::Stored => f.write_str("stored"),
            CompressionMethod::Deflate => f.write_str("deflate"),
            CompressionMethod::Unknown(v) => write!(f, "method {v}"),
        }
    }
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }
        Self::read_fields(&mut Cursor::new(&data[4..])).ok()
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_ENTRY_SENTINEL
            || self.total_entries == ZIP64_ENTRY_SENTINEL
            || self.cd_size == ZIP64_SENTINEL
            || self.cd_offset == ZIP64_SENTINEL
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }
        Self::read_fields(&mut Cursor::new(&data[4..])).ok()
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        w.write_u64::<LittleEndian>(self.eocd64_offset)?;
        w.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;
    /// Value of `eocd64_size` for a record without extensible data: it does
    /// not count the leading signature and size field.
    pub const FIXED_RECORD_SIZE: u64 = 44;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }
        Self::read_fields(&mut Cursor::new(&data[4..])).ok()
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u64::<LittleEndian>(self.eocd64_size)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u32::<LittleEndian>(self.disk_number)?;
        w.write_u32::<LittleEndian>(self.disk_with_cd)?;
        w.write_u64::<LittleEndian>(self.disk_entries)?;
        w.write_u64::<LittleEndian>(self.total_entries)?;
        w.write_u64::<LittleEndian>(self.cd_size)?;
        w.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
///
/// Only the fixed part; name, extra field and comment follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_len: u16,
    pub comment_len: u16,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x01\x02";
    pub const SIZE: usize = 46;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }
        Self::read_fields(&mut Cursor::new(&data[4..])).ok()
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_len: cursor.read_u16::<LittleEndian>()?,
            extra_len: cursor.read_u16::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
            disk_number_start: cursor.read_u16::<LittleEndian>()?,
            internal_attrs: cursor.read_u16::<LittleEndian>()?,
            external_attrs: cursor.read_u32::<LittleEndian>()?,
            lfh_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_made_by)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.compression_method)?;
        w.write_u16::<LittleEndian>(self.last_mod_time)?;
        w.write_u16::<LittleEndian>(self.last_mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.file_name_len)?;
        w.write_u16::<LittleEndian>(self.extra_len)?;
        w.write_u16::<LittleEndian>(self.comment_len)?;
        w.write_u16::<LittleEndian>(self.disk_number_start)?;
        w.write_u16::<LittleEndian>(self.internal_attrs)?;
        w.write_u32::<LittleEndian>(self.external_attrs)?;
        w.write_u32::<LittleEndian>(self.lfh_offset)
    }

    /// Length of the name, extra field and comment that follow the fixed part.
    pub fn variable_len(&self) -> usize {
        usize::from(self.file_name_len)
            + usize::from(self.extra_len)
            + usize::from(self.comment_len)
    }
}

/// Local File Header (LFH) - 30 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_len: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: &'static [u8] = b"PK\x03\x04";
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return None;
        }
        Self::read_fields(&mut Cursor::new(&data[4..])).ok()
    }

    fn read_fields(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            compression_method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            file_name_len: cursor.read_u16::<LittleEndian>()?,
            extra_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.version_needed)?;
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.compression_method)?;
        w.write_u16::<LittleEndian>(self.last_mod_time)?;
        w.write_u16::<LittleEndian>(self.last_mod_date)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        w.write_u16::<LittleEndian>(self.file_name_len)?;
        w.write_u16::<LittleEndian>(self.extra_len)
    }

    /// Length of the name and extra field that follow the fixed part.
    pub fn variable_len(&self) -> u64 {
        u64::from(self.file_name_len) + u64::from(self.extra_len)
    }
}

/// Trailing CRC-32 and sizes of an entry written with
/// [`flags::DATA_DESCRIPTOR`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIGNATURE: &'static [u8] = b"PK\x07\x08";
    /// Largest descriptor: signature, CRC and two 64-bit sizes.
    pub const MAX_SIZE: usize = 24;

    /// Write with signature, using 64-bit sizes when `zip64` is set.
    pub fn write_to<W: Write>(&self, w: &mut W, zip64: bool) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            w.write_u64::<LittleEndian>(self.compressed_size)?;
            w.write_u64::<LittleEndian>(self.uncompressed_size)
        } else {
            w.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            w.write_u32::<LittleEndian>(self.uncompressed_size as u32)
        }
    }

    /// Whether the descriptor at the start of `data` carries `crc32`.
    ///
    /// The signature is optional in the wild, so both layouts are accepted.
    pub fn crc_matches(data: &[u8], crc32: u32) -> bool {
        let crc_at = |start: usize| {
            data.get(start..start + 4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        };
        if data.starts_with(Self::SIGNATURE) && crc_at(4) == Some(crc32) {
            return true;
        }
        crc_at(0) == Some(crc32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eocd_fields_are_little_endian() {
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 2,
            total_entries: 2,
            cd_size: 0x0102_0304,
            cd_offset: 0x1000,
            comment_len: 5,
        };
        let mut bytes = Vec::new();
        eocd.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);
        assert_eq!(&bytes[12..16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(EndOfCentralDirectory::from_bytes(&bytes), Some(eocd));
    }

    #[test]
    fn eocd_sentinels_flag_zip64() {
        let mut eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 1,
            total_entries: 1,
            cd_size: 46,
            cd_offset: 100,
            comment_len: 0,
        };
        assert!(!eocd.is_zip64());
        eocd.cd_offset = ZIP64_SENTINEL;
        assert!(eocd.is_zip64());
    }

    #[test]
    fn bad_signature_is_rejected() {
        let mut bytes = vec![0u8; LocalFileHeader::SIZE];
        bytes[..4].copy_from_slice(CentralDirectoryHeader::SIGNATURE);
        assert!(LocalFileHeader::from_bytes(&bytes).is_none());
        assert!(CentralDirectoryHeader::from_bytes(&bytes).is_none());
    }

    #[test]
    fn zip64_records_have_fixed_sizes() {
        let record = Zip64EOCD {
            eocd64_size: Zip64EOCD::FIXED_RECORD_SIZE,
            version_made_by: VERSION_ZIP64,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: 3,
            total_entries: 3,
            cd_size: 1 << 33,
            cd_offset: 1 << 34,
        };
        let mut bytes = Vec::new();
        record.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Zip64EOCD::MIN_SIZE);
        assert_eq!(Zip64EOCD::from_bytes(&bytes), Some(record));

        let locator = Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: 1 << 35,
            total_disks: 1,
        };
        let mut bytes = Vec::new();
        locator.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Zip64EOCDLocator::SIZE);
        assert_eq!(Zip64EOCDLocator::from_bytes(&bytes), Some(locator));
    }

    #[test]
    fn descriptor_crc_with_and_without_signature() {
        let descriptor = DataDescriptor {
            crc32: 0xDEAD_BEEF,
            compressed_size: 10,
            uncompressed_size: 20,
        };
        let mut bytes = Vec::new();
        descriptor.write_to(&mut bytes, false).unwrap();
        assert_eq!(bytes.len(), 16);
        assert!(DataDescriptor::crc_matches(&bytes, 0xDEAD_BEEF));
        assert!(DataDescriptor::crc_matches(&bytes[4..], 0xDEAD_BEEF));
        assert!(!DataDescriptor::crc_matches(&bytes, 0x1234_5678));

        let mut bytes = Vec::new();
        descriptor.write_to(&mut bytes, true).unwrap();
        assert_eq!(bytes.len(), DataDescriptor::MAX_SIZE);
    }

    #[test]
    fn sentinel_threshold() {
        assert!(!needs_zip64(0xFFFF_FFFE));
        assert!(needs_zip64(0xFFFF_FFFF));
        assert!(needs_zip64(0x1_0000_0000));
    }
}
