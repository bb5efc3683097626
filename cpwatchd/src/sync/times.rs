use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Truncates a device timestamp to the millisecond resolution used locally.
pub fn ns_to_ms(ns: i64) -> i64 {
    ns / NANOS_PER_MILLI
}

pub fn system_time_to_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
        Err(before) => -i64::try_from(before.duration().as_millis()).unwrap_or(i64::MAX),
    }
}

/// Sets the local mtime from a device timestamp. Non-positive values mean the
/// device did not know the time and leave the file untouched.
pub fn set_mtime_from_ns(path: &Path, modified_ns: i64) -> io::Result<()> {
    if modified_ns <= 0 {
        return Ok(());
    }
    let ms = ns_to_ms(modified_ns);
    let mtime = FileTime::from_unix_time(
        ms.div_euclid(1000),
        (ms.rem_euclid(1000) * NANOS_PER_MILLI) as u32,
    );
    filetime::set_file_mtime(path, mtime)
}

/// RFC 3339 rendering for log fields.
pub fn format_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * i128::from(NANOS_PER_MILLI))
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}
