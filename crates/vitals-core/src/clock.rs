//! Injectable time source.
//!
//! Every time-dependent decision in the core (token issuance, session
//! markers, rate-limit windows) reads the current instant through [`Clock`]
//! so tests can drive time explicitly.

use chrono::{DateTime, Utc};

/// Supplies the current UTC instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Shared behind an `Arc` between the components under test, so the
/// instant is kept in an atomic rather than behind `&mut self`.
#[cfg(any(test, feature = "test-seams"))]
#[derive(Debug)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicI64,
}

#[cfg(any(test, feature = "test-seams"))]
impl ManualClock {
    /// Creates a clock frozen at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            millis: std::sync::atomic::AtomicI64::new(now.timestamp_millis()),
        }
    }

    /// Creates a clock frozen at `secs` seconds after the Unix epoch.
    pub fn at_unix(secs: i64) -> Self {
        Self {
            millis: std::sync::atomic::AtomicI64::new(secs * 1000),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.millis
            .store(now.timestamp_millis(), std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-seams"))]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(std::sync::atomic::Ordering::SeqCst);
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }
}
