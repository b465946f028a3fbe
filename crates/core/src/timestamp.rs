//! Nanosecond-precision timestamp type
//!
//! Every tag event carries an origin timestamp. Timestamps are stored as
//! signed nanoseconds since Unix epoch, matching the on-disk event encoding.
//!
//! Never expose raw arithmetic. Use explicit constructors:
//!
//! ```
//! use entitydb_core::Timestamp;
//!
//! let now = Timestamp::now();
//! let t = Timestamp::from_nanos(1_000_000_000);
//! assert_eq!(t.as_secs(), 1);
//! ```

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanosecond-precision timestamp
///
/// Represents a point in time as signed nanoseconds since Unix epoch.
/// This is the canonical time representation in the engine; ISO-8601
/// conversion happens only at the HTTP boundary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Unix epoch (1970-01-01 00:00:00 UTC)
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Maximum representable timestamp
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Create a timestamp for the current moment
    ///
    /// Returns epoch if the system clock is before Unix epoch.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_nanos().min(i64::MAX as u128) as i64)
    }

    /// Create a timestamp from nanoseconds since epoch
    #[inline]
    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    /// Create a timestamp from seconds since epoch
    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Timestamp(secs.saturating_mul(1_000_000_000))
    }

    /// Get nanoseconds since Unix epoch
    #[inline]
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Get seconds since Unix epoch (truncates)
    #[inline]
    pub const fn as_secs(&self) -> i64 {
        self.0 / 1_000_000_000
    }

    /// Add a duration, saturating at `Timestamp::MAX`
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Timestamp(
            self.0
                .saturating_add(duration.as_nanos().min(i64::MAX as u128) as i64),
        )
    }

    /// Subtract a duration, saturating at `Timestamp::EPOCH`
    pub fn saturating_sub(&self, duration: Duration) -> Self {
        Timestamp(
            self.0
                .saturating_sub(duration.as_nanos().min(i64::MAX as u128) as i64)
                .max(0),
        )
    }

    /// Check if this timestamp is strictly before another
    #[inline]
    pub fn is_before(&self, other: Timestamp) -> bool {
        self.0 < other.0
    }

    /// Check if this timestamp is strictly after another
    #[inline]
    pub fn is_after(&self, other: Timestamp) -> bool {
        self.0 > other.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_epoch() {
        assert!(Timestamp::now().is_after(Timestamp::EPOCH));
    }

    #[test]
    fn test_from_secs() {
        let t = Timestamp::from_secs(2);
        assert_eq!(t.as_nanos(), 2_000_000_000);
        assert_eq!(t.as_secs(), 2);
    }

    #[test]
    fn test_ordering() {
        let a = Timestamp::from_nanos(1);
        let b = Timestamp::from_nanos(2);
        assert!(a.is_before(b));
        assert!(b.is_after(a));
        assert!(a < b);
    }

    #[test]
    fn test_saturating_ops() {
        let t = Timestamp::from_nanos(100);
        assert_eq!(t.saturating_sub(Duration::from_secs(1)), Timestamp::EPOCH);
        assert_eq!(
            Timestamp::MAX.saturating_add(Duration::from_nanos(1)),
            Timestamp::MAX
        );
    }

    #[test]
    fn test_serde_transparent() {
        let t = Timestamp::from_nanos(42);
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "42");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
