//! Injected dependencies for stage environments.
//!
//! All external dependencies are abstracted behind traits and injected via
//! each stage's environment struct, never read from ambient process state.

use chrono::{DateTime, Utc};

/// Clock trait that abstracts time operations for testability.
///
/// Timestamps on envelopes and records always come through the injected
/// clock; business logic never calls `Utc::now()` directly.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
