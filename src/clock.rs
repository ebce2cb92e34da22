use std::time::{SystemTime, UNIX_EPOCH};

/// A source of item identifiers.
///
/// Identifiers are nanoseconds since the UNIX epoch. They double as the FIFO
/// ordering key, so a clock must not go backwards between two enqueues on
/// the same engine. Two reads resolving to the same nanosecond produce the
/// same identifier; nothing breaks the tie.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current timestamp in nanoseconds since the UNIX epoch.
    fn now(&self) -> i64;
}

/// Wall-clock time from `std::time::SystemTime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        // A clock set before 1970 or past 2262 is clamped rather than wrapped.
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
            Err(_) => 0,
        }
    }
}

/// Current wall-clock second, used for journal file names.
pub(crate) fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
