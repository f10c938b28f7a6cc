//! MS-DOS timestamps.
//!
//! Headers store the modification time as two 16-bit fields with two second
//! resolution, covering 1980 through 2107. Times are wall-clock values with no
//! zone; this crate treats them as UTC.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Packed MS-DOS date and time fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// 2107-12-31 23:59:58
    pub const MAX: DosDateTime = DosDateTime {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    pub fn new(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Pack a date and time, rounding seconds down to even and clamping to
    /// the representable range.
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        let year = dt.year();
        if year < 1980 {
            return Self::MIN;
        }
        if year > 2107 {
            return Self::MAX;
        }
        let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
        let time =
            ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
        Self { date, time }
    }

    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// `None` if the fields do not form a valid date and time.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let (year, month, day) = self.mod_date();
        let (hour, minute, second) = self.mod_time();
        NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))?.and_hms_opt(
            u32::from(hour),
            u32::from(minute),
            u32::from(second),
        )
    }
}

impl Default for DosDateTime {
    fn default() -> Self {
        Self::MIN
    }
}

impl From<DateTime<Utc>> for DosDateTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_datetime(&dt.naive_utc())
    }
}
