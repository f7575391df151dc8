//! Host metadata in guest terms: DOS date/time words and attribute bits.

use std::fs::Metadata;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::gemdos::attrib;

/// A packed DOS time/date pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DosStamp {
    /// `sec / 2 | min << 5 | hour << 11`
    pub time: u16,
    /// `day | month << 5 | (year - 1980) << 9`
    pub date: u16,
}

impl DosStamp {
    /// Convert a host timestamp using the host's local time zone.
    pub fn from_system_time(t: SystemTime) -> Self {
        let secs = match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as libc::time_t,
            Err(_) => 0,
        };
        let tm = local_time(secs);
        Self::from_parts(
            tm.tm_year + 1900,
            tm.tm_mon + 1,
            tm.tm_mday,
            tm.tm_hour,
            tm.tm_min,
            tm.tm_sec,
        )
    }

    /// Pack calendar fields; years before 1980 clamp to 1980.
    pub fn from_parts(year: i32, month: i32, day: i32, hour: i32, min: i32, sec: i32) -> Self {
        let year = (year - 1980).clamp(0, 0x7F) as u16;
        let date = (day as u16 & 0x1F) | ((month as u16 & 0x0F) << 5) | (year << 9);
        let time = ((sec / 2) as u16 & 0x1F) | ((min as u16 & 0x3F) << 5) | ((hour as u16 & 0x1F) << 11);
        Self { time, date }
    }

    pub fn year(&self) -> i32 {
        1980 + (self.date >> 9) as i32
    }

    pub fn month(&self) -> i32 {
        ((self.date >> 5) & 0x0F) as i32
    }

    pub fn day(&self) -> i32 {
        (self.date & 0x1F) as i32
    }

    pub fn hour(&self) -> i32 {
        (self.time >> 11) as i32
    }

    pub fn minute(&self) -> i32 {
        ((self.time >> 5) & 0x3F) as i32
    }

    pub fn second(&self) -> i32 {
        ((self.time & 0x1F) * 2) as i32
    }

    /// Interpret the stamp as host local time. Returns None for dates the
    /// host cannot represent.
    pub fn to_system_time(&self) -> Option<SystemTime> {
        // SAFETY: an all-zero tm is a valid value to fill in.
        let mut tm: libc::tm = unsafe { std::mem::zeroed() };
        tm.tm_year = self.year() - 1900;
        tm.tm_mon = self.month() - 1;
        tm.tm_mday = self.day();
        tm.tm_hour = self.hour();
        tm.tm_min = self.minute();
        tm.tm_sec = self.second();
        tm.tm_isdst = -1;
        // SAFETY: tm is fully initialised and mktime only normalises it.
        let secs = unsafe { libc::mktime(&mut tm) };
        if secs < 0 {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_secs(secs as u64))
    }
}

fn local_time(secs: libc::time_t) -> libc::tm {
    // SAFETY: localtime_r writes into the tm we own; both pointers are valid.
    unsafe {
        let mut tm: libc::tm = std::mem::zeroed();
        libc::localtime_r(&secs, &mut tm);
        tm
    }
}

/// Modification stamp of a host file, or the epoch stamp if the host has none.
pub fn modified_stamp(meta: &Metadata) -> DosStamp {
    meta.modified()
        .map(DosStamp::from_system_time)
        .unwrap_or_else(|_| DosStamp::from_system_time(UNIX_EPOCH))
}

/// Map host type and permission bits to guest attribute bits.
pub fn attributes(meta: &Metadata) -> u8 {
    let mut bits = 0;
    if meta.is_dir() {
        bits |= attrib::SUBDIRECTORY;
    }
    if meta.permissions().readonly() {
        bits |= attrib::READONLY;
    }
    bits
}

/// Guest-visible size: files larger than the guest can count are clamped.
pub fn guest_size(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0
    } else {
        meta.len().min(u32::MAX as u64) as u32
    }
}
