//! Verification stage: document review of submitted applications.

use crate::records::VerificationRecord;
use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
use agrisure_core::envelope::{EventEnvelope, LifecycleEvent, VerificationStatus};
use agrisure_core::environment::Clock;
use agrisure_core::handler::{StageError, StageHandler, TransitionSkew};
use agrisure_core::ids::{SubmissionId, UserId};
use agrisure_core::store::{RecordStore, StoreError};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Terminal outcome a verifier records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The documents check out; the application moves on.
    Verified,
    /// The application is refused; terminal for the whole lifecycle.
    Rejected,
}

impl VerificationOutcome {
    const fn status(self) -> VerificationStatus {
        match self {
            Self::Verified => VerificationStatus::Verified,
            Self::Rejected => VerificationStatus::Rejected,
        }
    }
}

const fn rank(status: VerificationStatus) -> u8 {
    match status {
        VerificationStatus::Pending => 0,
        VerificationStatus::UnderReview => 1,
        VerificationStatus::Verified | VerificationStatus::Rejected => 2,
    }
}

fn skew(expected: VerificationStatus, actual: VerificationStatus) -> TransitionSkew {
    if rank(actual) > rank(expected) {
        TransitionSkew::AlreadyApplied
    } else {
        TransitionSkew::NotYetReady
    }
}

/// Owns the verification record set.
///
/// Consumes `ApplicationSubmitted`; exposes the reviewer operations
/// [`start_review`](Self::start_review) and [`complete`](Self::complete).
pub struct VerificationHandler {
    store: Arc<dyn RecordStore<VerificationRecord>>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl VerificationHandler {
    /// Wire up the stage.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore<VerificationRecord>>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, bus, clock }
    }

    /// A reviewer picked up the submission: `Pending -> UnderReview`.
    ///
    /// # Errors
    ///
    /// - [`StageError::RecordNotFound`] if no review exists yet
    /// - [`StageError::InvalidTransition`] if the review already moved on
    /// - [`StageError::Store`] on infrastructure failure
    pub async fn start_review(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
    ) -> Result<VerificationRecord, StageError> {
        let mut record = self.load(submission_id).await?;
        if record.status != VerificationStatus::Pending {
            return Err(invalid(&record, VerificationStatus::Pending));
        }
        let expected = record.version;
        record.status = VerificationStatus::UnderReview;
        record.updated_at = self.clock.now();
        record.version += 1;
        self.store.update(record.clone(), expected).await?;
        tracing::info!(
            submission_id = %submission_id,
            reviewer = %user_id,
            "verification review started"
        );
        Ok(record)
    }

    /// Record the terminal review outcome and publish
    /// `VerificationCompleted`.
    ///
    /// Accepted from `Pending` as well as `UnderReview`, so a reviewer can
    /// close a submission without an explicit pick-up step.
    ///
    /// # Errors
    ///
    /// - [`StageError::RecordNotFound`] if no review exists yet
    /// - [`StageError::InvalidTransition`] if the review is already closed
    /// - [`StageError::Store`] / [`StageError::Publish`] on infrastructure
    ///   failure
    pub async fn complete(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        outcome: VerificationOutcome,
        report: Option<String>,
        rejection_reason: Option<String>,
    ) -> Result<VerificationRecord, StageError> {
        let mut record = self.load(submission_id).await?;
        if !matches!(
            record.status,
            VerificationStatus::Pending | VerificationStatus::UnderReview
        ) {
            return Err(invalid(&record, VerificationStatus::UnderReview));
        }
        let now = self.clock.now();
        let expected = record.version;
        record.status = outcome.status();
        record.report = report;
        record.rejection_reason = if outcome == VerificationOutcome::Rejected {
            rejection_reason
        } else {
            None
        };
        record.updated_at = now;
        record.version += 1;
        self.store.update(record.clone(), expected).await?;

        let envelope = EventEnvelope::new(
            submission_id,
            user_id,
            now,
            LifecycleEvent::VerificationCompleted {
                status: record.status,
                rejection_reason: record.rejection_reason.clone(),
                verified_at: now,
            },
        );
        self.bus.publish(LIFECYCLE_TOPIC, &envelope).await?;
        tracing::info!(
            submission_id = %submission_id,
            status = %record.status,
            "verification completed"
        );
        Ok(record)
    }

    async fn load(&self, submission_id: SubmissionId) -> Result<VerificationRecord, StageError> {
        self.store
            .find(submission_id)
            .await?
            .ok_or(StageError::RecordNotFound(submission_id))
    }

    async fn on_submitted(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<Vec<EventEnvelope>, StageError> {
        let now = self.clock.now();
        let record = VerificationRecord::pending(envelope.submission_id, now);
        match self.store.insert(record).await {
            Ok(()) => {
                tracing::info!(
                    submission_id = %envelope.submission_id,
                    "verification record opened"
                );
            },
            // Redelivered first-touch event. The record stands; re-emitting
            // VerificationStarted keeps the follow-on at-least-once in case
            // the first emission never committed.
            Err(StoreError::AlreadyExists(_)) => {
                tracing::debug!(
                    submission_id = %envelope.submission_id,
                    "duplicate ApplicationSubmitted, record already open"
                );
            },
            Err(e) => return Err(e.into()),
        }
        Ok(vec![EventEnvelope::new(
            envelope.submission_id,
            envelope.user_id,
            now,
            LifecycleEvent::VerificationStarted { started_at: now },
        )])
    }
}

fn invalid(record: &VerificationRecord, expected: VerificationStatus) -> StageError {
    StageError::InvalidTransition {
        submission_id: record.submission_id,
        expected: expected.to_string(),
        actual: record.status.to_string(),
        skew: skew(expected, record.status),
    }
}

impl StageHandler for VerificationHandler {
    fn consumer_group(&self) -> &'static str {
        "verification-service"
    }

    fn wants(&self, event_type: &str) -> bool {
        event_type == "ApplicationSubmitted"
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, StageError>> + Send + 'a>> {
        Box::pin(async move {
            match &envelope.event {
                LifecycleEvent::ApplicationSubmitted { .. } => self.on_submitted(envelope).await,
                _ => Ok(Vec::new()),
            }
        })
    }
}
