//! Claim settlement: opening claims against policies and settling payouts.

use crate::records::{Claim, Policy};
use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
use agrisure_core::envelope::{EventEnvelope, LifecycleEvent, PayoutStatus};
use agrisure_core::environment::Clock;
use agrisure_core::handler::{StageError, TransitionSkew};
use agrisure_core::ids::{SubmissionId, UserId};
use agrisure_core::store::RecordStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

const fn rank(status: PayoutStatus) -> u8 {
    match status {
        PayoutStatus::Pending => 0,
        PayoutStatus::Approved | PayoutStatus::Denied => 1,
        PayoutStatus::Paid => 2,
    }
}

const fn allowed(from: PayoutStatus, to: PayoutStatus) -> bool {
    matches!(
        (from, to),
        (PayoutStatus::Pending, PayoutStatus::Approved | PayoutStatus::Denied)
            | (PayoutStatus::Approved, PayoutStatus::Paid)
    )
}

/// Settles claims independently of the main lifecycle chain.
///
/// A claim is opened by the inspection stage in the same step that issues
/// the policy; from there the payout moves `Pending -> Approved -> Paid`
/// (or `Pending -> Denied`) through [`process_claim`](ClaimSettlement::process_claim),
/// which is driven by settlement staff rather than by lifecycle events.
pub struct ClaimSettlement {
    claims: Arc<dyn RecordStore<Claim>>,
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
}

impl ClaimSettlement {
    /// Wire up the settlement service.
    #[must_use]
    pub fn new(
        claims: Arc<dyn RecordStore<Claim>>,
        bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { claims, bus, clock }
    }

    /// The initial claim for a freshly issued policy: payout pending, claim
    /// amount defaulted to the covered amount.
    #[must_use]
    pub fn open(policy: &Policy, now: DateTime<Utc>) -> Claim {
        Claim {
            submission_id: policy.submission_id,
            claim_id: Uuid::new_v4(),
            policy_id: policy.policy_id,
            payout_status: PayoutStatus::Pending,
            claim_amount: policy.coverage_amount,
            opened_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Move the claim's payout to `decision` and publish `ClaimProcessed`.
    ///
    /// # Errors
    ///
    /// - [`StageError::RecordNotFound`] if no claim was opened for the
    ///   submission
    /// - [`StageError::InvalidTransition`] if the payout state machine
    ///   forbids the move (a repeat of an applied decision is benign)
    /// - [`StageError::Store`] / [`StageError::Publish`] on infrastructure
    ///   failure
    pub async fn process_claim(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
        decision: PayoutStatus,
    ) -> Result<Claim, StageError> {
        let mut claim = self
            .claims
            .find(submission_id)
            .await?
            .ok_or(StageError::RecordNotFound(submission_id))?;
        if !allowed(claim.payout_status, decision) {
            let skew = if rank(claim.payout_status) >= rank(decision) {
                TransitionSkew::AlreadyApplied
            } else {
                TransitionSkew::NotYetReady
            };
            return Err(StageError::InvalidTransition {
                submission_id,
                expected: decision.to_string(),
                actual: claim.payout_status.to_string(),
                skew,
            });
        }
        let now = self.clock.now();
        let expected = claim.version;
        claim.payout_status = decision;
        claim.updated_at = now;
        claim.version += 1;
        self.claims.update(claim.clone(), expected).await?;

        let envelope = EventEnvelope::new(
            submission_id,
            user_id,
            now,
            LifecycleEvent::ClaimProcessed {
                claim_id: claim.claim_id,
                payout_status: claim.payout_status,
                claim_amount: claim.claim_amount,
                processed_at: now,
            },
        );
        self.bus.publish(LIFECYCLE_TOPIC, &envelope).await?;
        tracing::info!(
            submission_id = %submission_id,
            payout_status = %claim.payout_status,
            "claim processed"
        );
        Ok(claim)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::policy::PolicyIssuer;
    use agrisure_core::ids::Money;
    use agrisure_testing::{test_clock, InMemoryEventBus, InMemoryRecordStore};

    fn settlement() -> (
        ClaimSettlement,
        Arc<InMemoryRecordStore<Claim>>,
        Arc<InMemoryEventBus>,
    ) {
        let claims = Arc::new(InMemoryRecordStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let settlement = ClaimSettlement::new(
            Arc::clone(&claims) as Arc<dyn RecordStore<Claim>>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            test_clock(),
        );
        (settlement, claims, bus)
    }

    async fn open_claim(claims: &InMemoryRecordStore<Claim>) -> Claim {
        let policy = PolicyIssuer::new(Money::from_cents(2_500_000))
            .issue(SubmissionId::random(), Utc::now());
        let claim = ClaimSettlement::open(&policy, Utc::now());
        claims.insert(claim.clone()).await.unwrap();
        claim
    }

    #[tokio::test]
    async fn payout_walks_pending_approved_paid() {
        let (settlement, claims, bus) = settlement();
        let claim = open_claim(&claims).await;
        let user = UserId::random();

        let approved = settlement
            .process_claim(user, claim.submission_id, PayoutStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.payout_status, PayoutStatus::Approved);

        let paid = settlement
            .process_claim(user, claim.submission_id, PayoutStatus::Paid)
            .await
            .unwrap();
        assert_eq!(paid.payout_status, PayoutStatus::Paid);
        assert_eq!(bus.published(LIFECYCLE_TOPIC).len(), 2);
    }

    #[tokio::test]
    async fn denied_claims_cannot_be_paid() {
        let (settlement, claims, _) = settlement();
        let claim = open_claim(&claims).await;
        let user = UserId::random();

        settlement
            .process_claim(user, claim.submission_id, PayoutStatus::Denied)
            .await
            .unwrap();
        let err = settlement
            .process_claim(user, claim.submission_id, PayoutStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn repeated_approval_is_a_benign_duplicate() {
        let (settlement, claims, _) = settlement();
        let claim = open_claim(&claims).await;
        let user = UserId::random();

        settlement
            .process_claim(user, claim.submission_id, PayoutStatus::Approved)
            .await
            .unwrap();
        let err = settlement
            .process_claim(user, claim.submission_id, PayoutStatus::Approved)
            .await
            .unwrap_err();
        assert!(err.is_benign_duplicate());
    }
}
