//! Application status projection.
//!
//! The application record is mutated by the submission gate at creation and,
//! from then on, only through status updates projected off the lifecycle
//! stream. Each downstream event maps to one [`ApplicationStatus`]; the
//! forward-only state machine on [`Application`] turns redelivered or
//! already-applied events into benign duplicates.

use crate::application::{ApplicationStatus, ApplicationStore};
use agrisure_core::envelope::{EventEnvelope, LifecycleEvent, VerificationStatus};
use agrisure_core::environment::Clock;
use agrisure_core::handler::{StageError, StageHandler, TransitionSkew};
use agrisure_core::store::StoreError;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Projects lifecycle events onto the application's `status` field.
///
/// Emits no follow-on events; the stream it consumes is already the source
/// of truth. The projection is how a status query (and the applicant) sees
/// the submission progress without joining every stage's record set.
pub struct StatusProjector {
    store: Arc<dyn ApplicationStore>,
    clock: Arc<dyn Clock>,
}

impl StatusProjector {
    /// Wire up the projection.
    #[must_use]
    pub fn new(store: Arc<dyn ApplicationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The status a lifecycle event projects to, if any.
    ///
    /// `ApplicationSubmitted` is the record's birth status and projects
    /// nothing; `ClaimProcessed` belongs to the independent claim sub-flow
    /// and leaves the application at `PolicyIssued`.
    #[must_use]
    pub const fn target_status(event: &LifecycleEvent) -> Option<ApplicationStatus> {
        match event {
            LifecycleEvent::VerificationStarted { .. } => Some(ApplicationStatus::UnderReview),
            LifecycleEvent::VerificationCompleted { status, .. } => match status {
                VerificationStatus::Verified => Some(ApplicationStatus::Verified),
                VerificationStatus::Rejected => Some(ApplicationStatus::Rejected),
                VerificationStatus::Pending | VerificationStatus::UnderReview => None,
            },
            LifecycleEvent::ApplicationSentToProvider { .. } => {
                Some(ApplicationStatus::SentToProvider)
            },
            LifecycleEvent::ApplicationReceivedByProvider { .. } => {
                Some(ApplicationStatus::ReceivedByProvider)
            },
            LifecycleEvent::InspectionScheduled { .. } => {
                Some(ApplicationStatus::InspectionScheduled)
            },
            // An invalid inspection still closes the inspection step; the
            // outcome itself lives on the inspection record.
            LifecycleEvent::InspectionCompleted { .. } => {
                Some(ApplicationStatus::InspectionCompleted)
            },
            LifecycleEvent::PolicyIssued { .. } => Some(ApplicationStatus::PolicyIssued),
            LifecycleEvent::ApplicationSubmitted { .. } | LifecycleEvent::ClaimProcessed { .. } => {
                None
            },
        }
    }

    async fn project(
        &self,
        envelope: &EventEnvelope,
        next: ApplicationStatus,
    ) -> Result<(), StageError> {
        loop {
            let mut application = self
                .store
                .find(envelope.submission_id)
                .await?
                .ok_or(StageError::RecordNotFound(envelope.submission_id))?;
            let expected = application.version;
            if !application.transition_to(next, self.clock.now()) {
                // The record already sits at or past the projected status:
                // a redelivery, or an event type this submission has long
                // moved beyond.
                return Err(StageError::InvalidTransition {
                    submission_id: envelope.submission_id,
                    expected: next.to_string(),
                    actual: application.status.to_string(),
                    skew: TransitionSkew::AlreadyApplied,
                });
            }
            match self.store.update(application, expected).await {
                Ok(()) => {
                    tracing::info!(
                        submission_id = %envelope.submission_id,
                        status = %next,
                        "application status projected"
                    );
                    return Ok(());
                },
                // A concurrent projection landed first; reload and
                // re-evaluate against the fresher record.
                Err(StoreError::VersionConflict { .. }) => {},
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl StageHandler for StatusProjector {
    fn consumer_group(&self) -> &'static str {
        "application-status-projection"
    }

    fn wants(&self, event_type: &str) -> bool {
        matches!(
            event_type,
            "VerificationStarted"
                | "VerificationCompleted"
                | "ApplicationSentToProvider"
                | "ApplicationReceivedByProvider"
                | "InspectionScheduled"
                | "InspectionCompleted"
                | "PolicyIssued"
        )
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, StageError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(next) = Self::target_status(&envelope.event) {
                self.project(envelope, next).await?;
            }
            Ok(Vec::new())
        })
    }
}
