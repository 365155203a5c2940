//! Time abstraction for testability.
//!
//! This module provides a `Clock` trait that abstracts over wall-clock time,
//! enabling deterministic testing of token expiry.
//!
//! # Example
//!
//! ```
//! use chrono::{DateTime, Duration};
//! use confirmable_core::time::{Clock, MockClock};
//!
//! let start = DateTime::from_timestamp(0, 0).unwrap_or_default();
//! let clock = MockClock::starting_at(start);
//!
//! clock.advance(Duration::seconds(86_400));
//! assert_eq!(clock.now().timestamp(), 86_400);
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Abstraction over wall-clock time for testability.
///
/// In production, use [`SystemClock`] which delegates to `Utc::now`.
/// In tests, use [`MockClock`] to control time deterministically.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// System clock that uses real time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A mock clock for testing time-dependent code.
///
/// The clock stands still until it is advanced or set manually.
#[derive(Debug)]
pub struct MockClock {
    current: Mutex<DateTime<Utc>>,
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClock {
    /// Creates a mock clock frozen at the current time.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Creates a mock clock frozen at the given instant.
    #[must_use]
    pub const fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Creates a mock clock that can be shared across threads.
    #[must_use]
    pub fn shared(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self::starting_at(start))
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *current += duration;
    }

    /// Moves the clock to a specific instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        self.as_ref().now()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn epoch() -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let before = Utc::now();
        let from_clock = clock.now();
        let after = Utc::now();

        assert!(from_clock >= before);
        assert!(from_clock <= after);
    }

    #[test]
    fn test_mock_clock_is_frozen() {
        let clock = MockClock::starting_at(epoch());
        assert_eq!(clock.now(), epoch());
        assert_eq!(clock.now(), epoch());
    }

    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::starting_at(epoch());

        clock.advance(Duration::seconds(10));
        assert_eq!(clock.now().timestamp(), 10);

        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now().timestamp(), 15);
    }

    #[test]
    fn test_mock_clock_set() {
        let clock = MockClock::starting_at(epoch());

        clock.set(DateTime::from_timestamp(90000, 0).unwrap());
        assert_eq!(clock.now().timestamp(), 90000);

        clock.set(epoch());
        assert_eq!(clock.now(), epoch());
    }

    #[test]
    fn test_shared_mock_clock() {
        let clock = MockClock::shared(epoch());
        let clock2 = Arc::clone(&clock);

        clock2.advance(Duration::seconds(10));

        assert_eq!(clock.now().timestamp(), 10);
        assert_eq!(Clock::now(&clock2).timestamp(), 10);
    }
}
