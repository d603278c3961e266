//! Tick/time conversion.
//!
//! Times on the wire are signed 64-bit tick counts of 100ns intervals since
//! `0001-01-01T00:00:00Z`. Tick 0 is the NULL time.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Ticks per second (100ns resolution).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Seconds between `0001-01-01T00:00:00Z` and the Unix epoch.
const EPOCH_OFFSET_SECS: i64 = 62_135_596_800;

/// Wire ticks of the latest time a segment may cover
/// (`9999-12-31T23:59:59.9999999Z`).
pub const MAX_TICKS: i64 = 3_155_378_975_999_999_999;

/// Earliest representable pass time; also the NULL time sentinel.
pub fn min_time() -> DateTime<Utc> {
    Utc.timestamp_opt(-EPOCH_OFFSET_SECS, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Latest time a segment may cover.
pub fn max_time() -> DateTime<Utc> {
    datetime_from_ticks(MAX_TICKS).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert a UTC time to wire ticks. Sub-tick precision is truncated.
///
/// `None` when the time lies outside `0..=MAX_TICKS`.
pub fn checked_ticks_from_datetime(time: DateTime<Utc>) -> Option<i64> {
    let ticks = time
        .timestamp()
        .checked_add(EPOCH_OFFSET_SECS)?
        .checked_mul(TICKS_PER_SECOND)?
        .checked_add(i64::from(time.timestamp_subsec_nanos() / 100))?;
    (0..=MAX_TICKS).contains(&ticks).then_some(ticks)
}

/// Convert a UTC time to wire ticks, clamping to `0..=MAX_TICKS`.
///
/// For times already known to be in range, such as segment bounds.
pub fn ticks_from_datetime(time: DateTime<Utc>) -> i64 {
    checked_ticks_from_datetime(time).unwrap_or(if time < min_time() { 0 } else { MAX_TICKS })
}

/// Convert wire ticks back to a UTC time.
///
/// Returns `None` for ticks outside `0..=MAX_TICKS`.
pub fn datetime_from_ticks(ticks: i64) -> Option<DateTime<Utc>> {
    if !(0..=MAX_TICKS).contains(&ticks) {
        return None;
    }
    let secs = ticks.div_euclid(TICKS_PER_SECOND) - EPOCH_OFFSET_SECS;
    let nanos = (ticks.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Check that a pass can be stored at `time`.
///
/// Segments tile `[min_time, max_time)`, so `max_time` itself is rejected.
pub fn check_pass_time(time: DateTime<Utc>) -> Result<()> {
    if min_time() <= time && time < max_time() {
        Ok(())
    } else {
        Err(Error::TimeOutOfRange(time.to_rfc3339()))
    }
}
