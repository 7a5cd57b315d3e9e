//! # Agrisure Testing
//!
//! Deterministic in-memory infrastructure for pipeline tests:
//! - [`InMemoryEventBus`]: ordered per-topic log with replay-from-start
//!   subscriptions
//! - [`InMemoryRecordStore`] / [`InMemoryApplicationStore`]: compare-and-swap
//!   stores with switchable outage simulation
//! - [`InMemoryBlobStore`]: key-to-bytes file storage
//! - [`FixedClock`] / [`test_clock`]: reproducible time
//! - [`fixtures`]: a realistic crop-insurance application schema plus valid
//!   documents and uploads
//!
//! ## Example
//!
//! ```ignore
//! use agrisure_testing::{fixtures, test_clock, InMemoryEventBus};
//!
//! #[tokio::test]
//! async fn submission_reaches_the_bus() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     // ... wire a SubmissionProcessor with in-memory collaborators ...
//!     let events = bus.published(LIFECYCLE_TOPIC);
//!     assert_eq!(events.len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;

use agrisure_core::environment::Clock;

pub mod bus;
pub mod fixtures;
pub mod store;

pub use bus::InMemoryEventBus;
pub use store::{InMemoryApplicationStore, InMemoryBlobStore, InMemoryRecordStore};

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use agrisure_testing::FixedClock;
/// use agrisure_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// let time1 = clock.now();
/// let time2 = clock.now();
/// assert_eq!(time1, time2); // Always the same!
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> Arc<dyn Clock> {
    Arc::new(FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    ))
}

/// Install a fmt tracing subscriber for a test run, honoring `RUST_LOG`.
///
/// Defaults to `info` when no filter is set. Safe to call from every test;
/// only the first call installs a subscriber.
pub fn init_test_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }
}
