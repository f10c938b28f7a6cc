//! Extra field records carried by local and central headers.
//!
//! An extra field is a sequence of `(id: u16, len: u16, data)` records. Two are
//! interpreted here: Zip64 extended information (`0x0001`) and the extended
//! timestamp (`0x5455`). Everything else is kept as opaque bytes.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Utc};

/// Zip64 extended information.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;
/// Extended timestamp ("UT"), Unix seconds.
pub const EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// Iterator over the records of an extra field.
///
/// Stops at the first record whose declared length runs past the end, since
/// some writers pad the field with garbage.
#[derive(Debug, Clone)]
pub struct ExtraFields<'a> {
    data: &'a [u8],
}

impl<'a> ExtraFields<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for ExtraFields<'a> {
    /// `(id, data, raw record including its 4-byte header)`
    type Item = (u16, &'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 4 {
            return None;
        }
        let id = u16::from_le_bytes([self.data[0], self.data[1]]);
        let len = usize::from(u16::from_le_bytes([self.data[2], self.data[3]]));
        if self.data.len() < 4 + len {
            self.data = &[];
            return None;
        }
        let (record, rest) = self.data.split_at(4 + len);
        self.data = rest;
        Some((id, &record[4..], record))
    }
}

/// Data of the first record with the given id.
pub fn find(extra: &[u8], id: u16) -> Option<&[u8]> {
    ExtraFields::new(extra)
        .find(|(field_id, _, _)| *field_id == id)
        .map(|(_, data, _)| data)
}

/// The records this crate does not interpret, byte for byte.
pub fn opaque_fields(extra: &[u8]) -> Vec<u8> {
    ExtraFields::new(extra)
        .filter(|(id, _, _)| *id != ZIP64_EXTRA_ID && *id != EXTENDED_TIMESTAMP_ID)
        .flat_map(|(_, _, raw)| raw.iter().copied())
        .collect()
}

/// Values recovered from a Zip64 extended information record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Values {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub lfh_offset: Option<u64>,
}

/// Parse a Zip64 record.
///
/// The record only holds the values whose 32-bit header fields are
/// saturated, always in the order uncompressed size, compressed size, local
/// header offset. Returns `None` if a requested value is missing.
pub fn parse_zip64(
    data: &[u8],
    uncompressed: bool,
    compressed: bool,
    offset: bool,
) -> Option<Zip64Values> {
    let mut rest = data;
    let mut next = |wanted: bool| -> Option<Option<u64>> {
        if !wanted {
            return Some(None);
        }
        let (value, tail) = rest.split_first_chunk::<8>()?;
        rest = tail;
        Some(Some(u64::from_le_bytes(*value)))
    };

    Some(Zip64Values {
        uncompressed_size: next(uncompressed)?,
        compressed_size: next(compressed)?,
        lfh_offset: next(offset)?,
    })
}

/// Write a Zip64 record holding `values` in order.
pub fn write_zip64<W: Write>(w: &mut W, values: &[u64]) -> io::Result<()> {
    w.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
    w.write_u16::<LittleEndian>((values.len() * 8) as u16)?;
    for value in values {
        w.write_u64::<LittleEndian>(*value)?;
    }
    Ok(())
}

/// Modification time from an extended timestamp record, if it has one.
pub fn parse_extended_timestamp(data: &[u8]) -> Option<DateTime<Utc>> {
    let (&flags, rest) = data.split_first()?;
    if flags & 0x01 == 0 {
        return None;
    }
    let secs = rest.first_chunk::<4>().map(|b| i32::from_le_bytes(*b))?;
    DateTime::from_timestamp(i64::from(secs), 0)
}

/// Extended timestamp record carrying only the modification time.
///
/// `None` when the time does not fit the 32-bit field.
pub fn extended_timestamp(mtime: &DateTime<Utc>) -> Option<[u8; 9]> {
    let secs = i32::try_from(mtime.timestamp()).ok()?;
    let mut record = [0u8; 9];
    record[0..2].copy_from_slice(&EXTENDED_TIMESTAMP_ID.to_le_bytes());
    record[2..4].copy_from_slice(&5u16.to_le_bytes());
    record[4] = 0x01;
    record[5..9].copy_from_slice(&secs.to_le_bytes());
    Some(record)
}
