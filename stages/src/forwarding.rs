//! Review-forwarding stage: hands verified applications to the provider.
//!
//! This stage is deployed next to verification and reads the same record
//! set, but owns no records of its own; its whole job is turning a
//! `Verified` completion into an `ApplicationSentToProvider` hand-off. A
//! `Rejected` completion ends the lifecycle here, silently.

use crate::records::VerificationRecord;
use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
use agrisure_core::envelope::{EventEnvelope, LifecycleEvent, VerificationStatus};
use agrisure_core::environment::Clock;
use agrisure_core::handler::{StageError, StageHandler, TransitionSkew};
use agrisure_core::ids::{SubmissionId, UserId};
use agrisure_core::store::RecordStore;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Forwards verified applications to the receiving provider.
pub struct ForwardingHandler {
    verifications: Arc<dyn RecordStore<VerificationRecord>>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    provider: String,
}

impl ForwardingHandler {
    /// Wire up the stage. `provider` names the receiving insurer.
    #[must_use]
    pub fn new(
        verifications: Arc<dyn RecordStore<VerificationRecord>>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            verifications,
            bus,
            clock,
            provider: provider.into(),
        }
    }

    /// Explicitly forward a submission to the provider.
    ///
    /// Normally forwarding rides on the `VerificationCompleted` event; this
    /// operation exists for manual re-sends. It refuses any submission whose
    /// verification record is not `Verified`.
    ///
    /// # Errors
    ///
    /// - [`StageError::RecordNotFound`] if verification never saw the
    ///   submission
    /// - [`StageError::InvalidTransition`] if it is not verified
    /// - [`StageError::Publish`] on bus failure
    pub async fn forward(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
    ) -> Result<(), StageError> {
        let record = self
            .verifications
            .find(submission_id)
            .await?
            .ok_or(StageError::RecordNotFound(submission_id))?;
        if record.status != VerificationStatus::Verified {
            return Err(StageError::InvalidTransition {
                submission_id,
                expected: VerificationStatus::Verified.to_string(),
                actual: record.status.to_string(),
                skew: TransitionSkew::NotYetReady,
            });
        }
        let envelope = self.sent_envelope(submission_id, user_id);
        self.bus.publish(LIFECYCLE_TOPIC, &envelope).await?;
        tracing::info!(
            submission_id = %submission_id,
            provider = %self.provider,
            "application forwarded to provider"
        );
        Ok(())
    }

    fn sent_envelope(&self, submission_id: SubmissionId, user_id: UserId) -> EventEnvelope {
        let now = self.clock.now();
        EventEnvelope::new(
            submission_id,
            user_id,
            now,
            LifecycleEvent::ApplicationSentToProvider {
                provider: self.provider.clone(),
                sent_at: now,
            },
        )
    }
}

impl StageHandler for ForwardingHandler {
    fn consumer_group(&self) -> &'static str {
        "review-forwarding-service"
    }

    fn wants(&self, event_type: &str) -> bool {
        event_type == "VerificationCompleted"
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, StageError>> + Send + 'a>> {
        Box::pin(async move {
            match &envelope.event {
                LifecycleEvent::VerificationCompleted { status, .. } => match status {
                    VerificationStatus::Verified => Ok(vec![
                        self.sent_envelope(envelope.submission_id, envelope.user_id)
                    ]),
                    _ => {
                        tracing::info!(
                            submission_id = %envelope.submission_id,
                            status = %status,
                            "submission not verified, lifecycle ends here"
                        );
                        Ok(Vec::new())
                    },
                },
                _ => Ok(Vec::new()),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use agrisure_testing::{test_clock, InMemoryEventBus, InMemoryRecordStore};
    use chrono::Utc;

    fn handler() -> (
        ForwardingHandler,
        Arc<InMemoryRecordStore<VerificationRecord>>,
        Arc<InMemoryEventBus>,
    ) {
        let store = Arc::new(InMemoryRecordStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let handler = ForwardingHandler::new(
            Arc::clone(&store) as Arc<dyn RecordStore<VerificationRecord>>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            test_clock(),
            "PCIC",
        );
        (handler, store, bus)
    }

    fn completed(submission_id: SubmissionId, status: VerificationStatus) -> EventEnvelope {
        EventEnvelope::new(
            submission_id,
            UserId::random(),
            Utc::now(),
            LifecycleEvent::VerificationCompleted {
                status,
                rejection_reason: None,
                verified_at: Utc::now(),
            },
        )
    }

    #[tokio::test]
    async fn verified_completion_forwards_to_the_provider() {
        let (handler, _, _) = handler();
        let id = SubmissionId::random();
        let follow_ons = handler
            .handle(&completed(id, VerificationStatus::Verified))
            .await
            .unwrap();
        assert_eq!(follow_ons.len(), 1);
        match &follow_ons[0].event {
            LifecycleEvent::ApplicationSentToProvider { provider, .. } => {
                assert_eq!(provider, "PCIC");
            },
            other => panic!("unexpected event {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn rejected_completion_is_terminal() {
        let (handler, _, _) = handler();
        let follow_ons = handler
            .handle(&completed(
                SubmissionId::random(),
                VerificationStatus::Rejected,
            ))
            .await
            .unwrap();
        assert!(follow_ons.is_empty());
    }

    #[tokio::test]
    async fn explicit_forward_requires_a_verified_record() {
        let (handler, store, bus) = handler();
        let id = SubmissionId::random();
        let user = UserId::random();

        let err = handler.forward(user, id).await.unwrap_err();
        assert!(matches!(err, StageError::RecordNotFound(_)));

        let record = VerificationRecord::pending(id, Utc::now());
        store.insert(record.clone()).await.unwrap();
        let err = handler.forward(user, id).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::InvalidTransition {
                skew: TransitionSkew::NotYetReady,
                ..
            }
        ));

        let mut verified = record;
        verified.status = VerificationStatus::Verified;
        verified.version += 1;
        store.update(verified, 1).await.unwrap();
        handler.forward(user, id).await.unwrap();
        assert_eq!(bus.published(LIFECYCLE_TOPIC).len(), 1);
    }
}
