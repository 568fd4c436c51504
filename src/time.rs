//! Conversions between `SystemTime` and the on-store millisecond timestamps.

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn time_now_ms() -> u64 {
    ms_from_system_time(SystemTime::now())
}

/// Converts a `SystemTime` to milliseconds since the Unix epoch.
///
/// The on-store field is unsigned, so times before the epoch clamp to 0 and
/// durations past `u64::MAX` milliseconds saturate.
pub(crate) fn ms_from_system_time(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

/// Converts milliseconds since the Unix epoch back to a `SystemTime`.
pub(crate) fn system_time_from_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
