//! Inspection stage, as deployed by the combined insurer service.
//!
//! Besides acknowledging receipt and running the field inspection, this
//! handler owns the issuance step: when an inspection closes as `Completed`,
//! the policy and the claim are created in the same local step. The record
//! flip is the commit point. Issuance runs only after the flip and re-runs
//! on a redelivered close, with `AlreadyExists` absorbing the partial work,
//! so coverage can never outlive a close that lost its write race.

use crate::claim::ClaimSettlement;
use crate::policy::PolicyIssuer;
use crate::records::{Claim, InspectionRecord, Policy};
use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
use agrisure_core::envelope::{EventEnvelope, InspectionStatus, LifecycleEvent};
use agrisure_core::environment::Clock;
use agrisure_core::handler::{StageError, StageHandler, TransitionSkew};
use agrisure_core::ids::{SubmissionId, UserId};
use agrisure_core::store::{RecordStore, StoreError};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Terminal outcome an inspector records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InspectionOutcome {
    /// The field inspection confirmed the application; coverage follows.
    Completed,
    /// The inspection found the application invalid; no coverage.
    Invalid,
}

impl InspectionOutcome {
    const fn status(self) -> InspectionStatus {
        match self {
            Self::Completed => InspectionStatus::Completed,
            Self::Invalid => InspectionStatus::Invalid,
        }
    }
}

const fn rank(status: InspectionStatus) -> u8 {
    match status {
        InspectionStatus::Pending => 0,
        InspectionStatus::Scheduled => 1,
        InspectionStatus::Completed | InspectionStatus::Invalid => 2,
    }
}

fn invalid(record: &InspectionRecord, expected: InspectionStatus) -> StageError {
    let skew = if rank(record.status) > rank(expected) {
        TransitionSkew::AlreadyApplied
    } else {
        TransitionSkew::NotYetReady
    };
    StageError::InvalidTransition {
        submission_id: record.submission_id,
        expected: expected.to_string(),
        actual: record.status.to_string(),
        skew,
    }
}

/// Owns the inspection record set plus policy and claim issuance.
pub struct InspectionHandler {
    inspections: Arc<dyn RecordStore<InspectionRecord>>,
    policies: Arc<dyn RecordStore<Policy>>,
    claims: Arc<dyn RecordStore<Claim>>,
    issuer: PolicyIssuer,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    provider: String,
}

impl InspectionHandler {
    /// Wire up the stage. `provider` names this insurer in receipt events.
    #[must_use]
    pub fn new(
        inspections: Arc<dyn RecordStore<InspectionRecord>>,
        policies: Arc<dyn RecordStore<Policy>>,
        claims: Arc<dyn RecordStore<Claim>>,
        issuer: PolicyIssuer,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            inspections,
            policies,
            claims,
            issuer,
            bus,
            clock,
            provider: provider.into(),
        }
    }

    /// Book the field inspection: `Pending -> Scheduled`, publishes
    /// `InspectionScheduled`.
    ///
    /// A second schedule attempt finds the record `Scheduled` and fails as a
    /// benign duplicate without emitting another event.
    ///
    /// # Errors
    ///
    /// - [`StageError::RecordNotFound`] if receipt was never acknowledged
    /// - [`StageError::InvalidTransition`] if the inspection is already
    ///   booked or closed
    /// - [`StageError::Store`] / [`StageError::Publish`] on infrastructure
    ///   failure
    pub async fn schedule(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        schedule_date: DateTime<Utc>,
    ) -> Result<InspectionRecord, StageError> {
        let mut record = self.load(submission_id).await?;
        if record.status != InspectionStatus::Pending {
            return Err(invalid(&record, InspectionStatus::Pending));
        }
        let now = self.clock.now();
        let expected = record.version;
        let schedule_id = Uuid::new_v4();
        record.status = InspectionStatus::Scheduled;
        record.schedule_id = Some(schedule_id);
        record.schedule_date = Some(schedule_date);
        record.updated_at = now;
        record.version += 1;
        self.inspections.update(record.clone(), expected).await?;

        let envelope = EventEnvelope::new(
            submission_id,
            user_id,
            now,
            LifecycleEvent::InspectionScheduled {
                schedule_id,
                schedule_date,
            },
        );
        self.bus.publish(LIFECYCLE_TOPIC, &envelope).await?;
        tracing::info!(
            submission_id = %submission_id,
            schedule_date = %schedule_date,
            "inspection scheduled"
        );
        Ok(record)
    }

    /// Close the inspection and, on a `Completed` outcome, issue the policy
    /// and open the claim.
    ///
    /// Accepted from `Scheduled` or directly from `Pending` (walk-in
    /// inspections). The record flip is the commit point: issuance and the
    /// closing events run only after it, and re-run when a close is
    /// redelivered, so an `Invalid` inspection can never end up with live
    /// coverage next to it.
    ///
    /// # Errors
    ///
    /// - [`StageError::RecordNotFound`] if receipt was never acknowledged
    /// - [`StageError::InvalidTransition`] if the inspection is already
    ///   closed (benign on redelivery)
    /// - [`StageError::Store`] / [`StageError::Publish`] on infrastructure
    ///   failure
    pub async fn complete(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        outcome: InspectionOutcome,
        comments: impl Into<String>,
    ) -> Result<InspectionRecord, StageError> {
        let mut record = self.load(submission_id).await?;
        if record.is_closed() {
            // Redelivered close. A crash may have separated the flip from
            // the issuance that follows it, so settle a record that closed
            // as Completed before reporting the duplicate.
            if record.status == InspectionStatus::Completed {
                self.settle_completed(user_id, &record).await?;
            }
            return Err(invalid(&record, InspectionStatus::Scheduled));
        }
        let now = self.clock.now();

        let expected = record.version;
        record.status = outcome.status();
        record.comments = Some(comments.into());
        record.updated_at = now;
        record.version += 1;
        match self.inspections.update(record.clone(), expected).await {
            Ok(()) => {},
            Err(StoreError::VersionConflict { .. }) => {
                // Lost the race to a concurrent close. Nothing has been
                // inserted or published yet, so the winner's outcome stands
                // untouched.
                let current = self.load(submission_id).await?;
                return Err(invalid(&current, InspectionStatus::Scheduled));
            },
            Err(e) => return Err(e.into()),
        }

        if record.status == InspectionStatus::Completed {
            self.settle_completed(user_id, &record).await?;
        } else {
            self.publish_closed(user_id, &record).await?;
            tracing::info!(
                submission_id = %submission_id,
                status = %record.status,
                "inspection closed without coverage"
            );
        }
        Ok(record)
    }

    /// Issue coverage for a record already flipped to `Completed` and publish
    /// the closing events. Safe to re-run: the inserts absorb
    /// `AlreadyExists` and the log is at-least-once, so a retried close
    /// produces duplicates downstream at worst, never a gap.
    async fn settle_completed(
        &self,
        user_id: UserId,
        record: &InspectionRecord,
    ) -> Result<(), StageError> {
        let (policy, claim) = self
            .issue_coverage(record.submission_id, record.updated_at)
            .await?;
        self.publish_closed(user_id, record).await?;

        let issued_event = EventEnvelope::new(
            record.submission_id,
            user_id,
            record.updated_at,
            LifecycleEvent::PolicyIssued {
                policy_id: policy.policy_id,
                policy_number: policy.policy_number.clone(),
                coverage_amount: policy.coverage_amount,
                issued_at: policy.issued_at,
            },
        );
        self.bus.publish(LIFECYCLE_TOPIC, &issued_event).await?;

        let claim_event = EventEnvelope::new(
            record.submission_id,
            user_id,
            record.updated_at,
            LifecycleEvent::ClaimProcessed {
                claim_id: claim.claim_id,
                payout_status: claim.payout_status,
                claim_amount: claim.claim_amount,
                processed_at: claim.opened_at,
            },
        );
        self.bus.publish(LIFECYCLE_TOPIC, &claim_event).await?;
        tracing::info!(
            submission_id = %record.submission_id,
            policy_number = %policy.policy_number,
            "inspection completed, coverage issued"
        );
        Ok(())
    }

    async fn publish_closed(
        &self,
        user_id: UserId,
        record: &InspectionRecord,
    ) -> Result<(), StageError> {
        let envelope = EventEnvelope::new(
            record.submission_id,
            user_id,
            record.updated_at,
            LifecycleEvent::InspectionCompleted {
                status: record.status,
                comments: record.comments.clone().unwrap_or_default(),
                inspected_at: record.updated_at,
            },
        );
        self.bus.publish(LIFECYCLE_TOPIC, &envelope).await?;
        Ok(())
    }

    /// Insert the policy and the claim, absorbing redelivered partial work.
    async fn issue_coverage(
        &self,
        submission_id: SubmissionId,
        now: DateTime<Utc>,
    ) -> Result<(Policy, Claim), StageError> {
        let policy = self.issuer.issue(submission_id, now);
        let policy = match self.policies.insert(policy.clone()).await {
            Ok(()) => policy,
            Err(StoreError::AlreadyExists(_)) => self
                .policies
                .find(submission_id)
                .await?
                .ok_or(StageError::RecordNotFound(submission_id))?,
            Err(e) => return Err(e.into()),
        };
        let claim = ClaimSettlement::open(&policy, now);
        let claim = match self.claims.insert(claim.clone()).await {
            Ok(()) => claim,
            Err(StoreError::AlreadyExists(_)) => self
                .claims
                .find(submission_id)
                .await?
                .ok_or(StageError::RecordNotFound(submission_id))?,
            Err(e) => return Err(e.into()),
        };
        Ok((policy, claim))
    }

    async fn load(&self, submission_id: SubmissionId) -> Result<InspectionRecord, StageError> {
        self.inspections
            .find(submission_id)
            .await?
            .ok_or(StageError::RecordNotFound(submission_id))
    }

    async fn on_sent(&self, envelope: &EventEnvelope) -> Result<Vec<EventEnvelope>, StageError> {
        let now = self.clock.now();
        let record = InspectionRecord::pending(envelope.submission_id, now);
        match self.inspections.insert(record).await {
            Ok(()) => {
                tracing::info!(
                    submission_id = %envelope.submission_id,
                    provider = %self.provider,
                    "application received, inspection pending"
                );
            },
            // Redelivered hand-off; the acknowledgement below re-publishes
            // in case the first one never committed.
            Err(StoreError::AlreadyExists(_)) => {
                tracing::debug!(
                    submission_id = %envelope.submission_id,
                    "duplicate ApplicationSentToProvider, record already open"
                );
            },
            Err(e) => return Err(e.into()),
        }
        Ok(vec![EventEnvelope::new(
            envelope.submission_id,
            envelope.user_id,
            now,
            LifecycleEvent::ApplicationReceivedByProvider {
                provider: self.provider.clone(),
                status: InspectionStatus::Pending,
                received_at: now,
            },
        )])
    }
}

impl StageHandler for InspectionHandler {
    fn consumer_group(&self) -> &'static str {
        "inspection-service"
    }

    fn wants(&self, event_type: &str) -> bool {
        event_type == "ApplicationSentToProvider"
    }

    fn handle<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, StageError>> + Send + 'a>> {
        Box::pin(async move {
            match &envelope.event {
                LifecycleEvent::ApplicationSentToProvider { .. } => self.on_sent(envelope).await,
                _ => Ok(Vec::new()),
            }
        })
    }
}
