use time::OffsetDateTime;

/// The queue's view of the current time.
///
/// Wall-clock time is captured once and then advanced with a monotonic [tokio::time::Instant],
/// so paused tokio time in tests moves the queue's clock as well.
#[derive(Clone, Debug)]
pub struct Time {
    start_instant: tokio::time::Instant,
    start_time: OffsetDateTime,
}

impl Time {
    pub(crate) fn new() -> Self {
        let start_instant = tokio::time::Instant::now();
        let start_time = OffsetDateTime::now_utc();

        Time {
            start_instant,
            start_time,
        }
    }

    /// The current time.
    pub fn now(&self) -> OffsetDateTime {
        let now = self.start_instant.elapsed();
        self.start_time + now
    }

    /// The current time, in seconds since the Unix epoch.
    pub fn now_timestamp(&self) -> i64 {
        self.now().unix_timestamp()
    }
}

/// The last second of 9999-12-31, the latest instant [OffsetDateTime] can always represent.
pub(crate) const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// `now` plus `seconds`, with negative delays treated as zero and the result capped at
/// [MAX_TIMESTAMP] so it can always be read back.
pub(crate) fn delayed(now: i64, seconds: i64) -> i64 {
    now.saturating_add(seconds.max(0)).min(MAX_TIMESTAMP)
}

/// Convert a stored epoch-seconds column into a timestamp.
pub(crate) fn from_timestamp(ts: i64, column: &'static str) -> crate::Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).map_err(|_| crate::Error::TimestampOutOfRange(column))
}
