//! Compare-and-swap persistence for stage-local records.
//!
//! Each stage owns exactly one record set (verification records, inspection
//! records, policies, claims), keyed by submission id: a correlation, never a
//! foreign key across service boundaries. No distributed lock is taken
//! anywhere in the pipeline; the concurrency-control primitive is the
//! `version` counter on each record, checked at write time.
//!
//! A write whose expected version no longer matches fails with
//! [`StoreError::VersionConflict`]. The caller reloads the record and
//! re-evaluates its precondition: if the record has already moved past the
//! state the event expects, the redelivery resolves as a benign no-op.

use crate::ids::SubmissionId;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during record store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the record changed under us.
    #[error("version conflict for {submission_id}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The record that conflicted.
        submission_id: SubmissionId,
        /// The version the writer read.
        expected: u64,
        /// The version currently persisted.
        actual: u64,
    },

    /// First-touch insert found an existing record for the submission.
    #[error("record already exists for {0}")]
    AlreadyExists(SubmissionId),

    /// No record for the submission.
    #[error("record not found for {0}")]
    NotFound(SubmissionId),

    /// The datastore is unreachable. Retried with backoff by the consumer.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A status-bearing entity owned by one stage and correlated by submission id.
pub trait StageRecord: Clone + Send + Sync + 'static {
    /// The correlation key this record is stored under.
    fn submission_id(&self) -> SubmissionId;

    /// Current optimistic-concurrency version.
    fn version(&self) -> u64;

    /// Increment the version ahead of a compare-and-swap write.
    fn bump_version(&mut self);
}

/// Keyed compare-and-swap store for one stage's record set.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so stage environments can hold
/// `Arc<dyn RecordStore<R>>`.
pub trait RecordStore<R: StageRecord>: Send + Sync {
    /// Load the record for a submission, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the datastore cannot be
    /// reached.
    fn find(
        &self,
        submission_id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<R>, StoreError>> + Send + '_>>;

    /// Create the record on first relevant event.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyExists`] if a record for the submission exists
    ///   (a redelivered first-touch event, which callers treat as a no-op)
    /// - [`StoreError::Unavailable`] if the datastore cannot be reached
    fn insert(
        &self,
        record: R,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// Write the record conditioned on `expected_version` matching what is
    /// persisted.
    ///
    /// The record passed in already carries its bumped version; only the
    /// comparison uses `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::VersionConflict`] on a stale read: reload and
    ///   re-evaluate the precondition, never propagate blindly
    /// - [`StoreError::NotFound`] if the record was never created
    /// - [`StoreError::Unavailable`] if the datastore cannot be reached
    fn update(
        &self,
        record: R,
        expected_version: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;
}

impl StoreError {
    /// Whether the error is transient and worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_display() {
        let id = SubmissionId::random();
        let err = StoreError::VersionConflict {
            submission_id: id,
            expected: 3,
            actual: 5,
        };
        let display = err.to_string();
        assert!(display.contains("expected 3"));
        assert!(display.contains("found 5"));
    }

    #[test]
    fn only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("connection refused".into()).is_transient());
        assert!(!StoreError::NotFound(SubmissionId::random()).is_transient());
        assert!(!StoreError::AlreadyExists(SubmissionId::random()).is_transient());
    }
}
