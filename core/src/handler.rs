//! The shape every stage handler follows.
//!
//! A stage handler (1) consumes one event, (2) loads or lazily creates its
//! stage-local record, (3) checks a precondition on the record's current local
//! status, (4) applies the local change with a versioned compare-and-swap
//! write, and (5) emits zero or more follow-on events.
//!
//! The precondition check exists because the bus delivers at-least-once:
//! redelivery of an already-applied event finds the record past the expected
//! state and fails with [`StageError::InvalidTransition`]. The consumer loop
//! asks [`StageError::is_benign_duplicate`] whether that rejection is a
//! redelivery no-op (logged, not retried) or a genuine ordering violation
//! (dead-lettered).

use crate::bus::EventBusError;
use crate::envelope::EventEnvelope;
use crate::ids::SubmissionId;
use crate::store::StoreError;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Whether a rejected transition was caused by a record already past the
/// expected state (redelivery) or not yet at it (ordering violation).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransitionSkew {
    /// The record already moved past the state the event expects.
    AlreadyApplied,
    /// The record has not reached the state the event expects.
    NotYetReady,
}

/// Errors surfaced by stage handlers.
#[derive(Error, Debug)]
pub enum StageError {
    /// The record is not in the state the event expects.
    #[error("invalid transition for {submission_id}: expected {expected}, record is {actual}")]
    InvalidTransition {
        /// The submission whose record rejected the transition.
        submission_id: SubmissionId,
        /// The local status the event expected.
        expected: String,
        /// The local status actually persisted.
        actual: String,
        /// Which side of the expected state the record sits on.
        skew: TransitionSkew,
    },

    /// An operation that requires an existing record found none.
    #[error("no stage record for {0}")]
    RecordNotFound(SubmissionId),

    /// The stage-local datastore failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Publishing a follow-on event failed.
    #[error(transparent)]
    Publish(#[from] EventBusError),
}

impl StageError {
    /// True when the error is a redelivery of an already-applied event.
    ///
    /// Benign duplicates are logged and dropped; everything else is either
    /// retried (transient store/bus failures) or dead-lettered (ordering
    /// violations).
    #[must_use]
    pub const fn is_benign_duplicate(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition {
                skew: TransitionSkew::AlreadyApplied,
                ..
            }
        )
    }

    /// True when the error is transient infrastructure trouble worth a
    /// backoff retry.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Publish(_) => true,
            Self::InvalidTransition { .. } | Self::RecordNotFound(_) => false,
        }
    }
}

/// A consumer of lifecycle events owned by one service.
///
/// Handlers hold no in-memory state across events for the same submission;
/// a rebalance may hand consecutive events of one submission to different
/// group members.
pub trait StageHandler: Send + Sync {
    /// Consumer group this stage subscribes under.
    fn consumer_group(&self) -> &'static str;

    /// Whether this stage reacts to the given event type.
    ///
    /// The shared topic carries every event type; stages skip the ones they
    /// do not own without touching their record store.
    fn wants(&self, event_type: &str) -> bool;

    /// Process one envelope and return the follow-on events to publish.
    ///
    /// # Errors
    ///
    /// - [`StageError::InvalidTransition`] when the local precondition fails
    /// - [`StageError::Store`] / [`StageError::Publish`] on infrastructure
    ///   failures (retried by the consumer loop)
    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, StageError>> + Send + 'a>>;
}
