use chrono::{DateTime, DurationRound, Duration, Utc};

/// Source of "now" for window computation, swappable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Floor `ts` to a multiple of `unit` since the Unix epoch (UTC).
pub fn truncate(ts: DateTime<Utc>, unit: Duration) -> DateTime<Utc> {
    ts.duration_trunc(unit).unwrap_or(ts)
}
