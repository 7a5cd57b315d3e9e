//! End-to-end choreography over the in-memory bus.
//!
//! These tests wire every stage handler plus the status projection against
//! one shared lifecycle topic and pump published events through the
//! handlers the way the consumer loop would, interleaved with the explicit
//! reviewer/inspector operations that drive a submission forward.

#![allow(clippy::unwrap_used, clippy::panic)]

use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
use agrisure_core::envelope::{
    EventEnvelope, InspectionStatus, LifecycleEvent, PayoutStatus, VerificationStatus,
};
use agrisure_core::handler::StageHandler;
use agrisure_core::ids::{Money, SubmissionId, UserId};
use agrisure_core::store::RecordStore;
use agrisure_schema::{BlobStore, SchemaRegistry};
use agrisure_stages::records::{Claim, InspectionRecord, Policy, VerificationRecord};
use agrisure_stages::{
    ClaimSettlement, ForwardingHandler, InspectionHandler, InspectionOutcome, PolicyIssuer,
    VerificationHandler, VerificationOutcome,
};
use agrisure_submission::{
    Application, ApplicationStatus, ApplicationStore, StatusProjector, SubmissionProcessor,
};
use agrisure_testing::{
    fixtures, test_clock, InMemoryApplicationStore, InMemoryBlobStore, InMemoryEventBus,
    InMemoryRecordStore,
};
use chrono::Utc;
use std::sync::Arc;

const COVERAGE: Money = Money::from_cents(5_000_000);

struct Pipeline {
    registry: Arc<SchemaRegistry>,
    bus: Arc<InMemoryEventBus>,
    applications: Arc<InMemoryApplicationStore>,
    verifications: Arc<InMemoryRecordStore<VerificationRecord>>,
    inspections: Arc<InMemoryRecordStore<InspectionRecord>>,
    policies: Arc<InMemoryRecordStore<Policy>>,
    claims: Arc<InMemoryRecordStore<Claim>>,
    processor: SubmissionProcessor,
    verification: Arc<VerificationHandler>,
    forwarding: Arc<ForwardingHandler>,
    inspection: Arc<InspectionHandler>,
    settlement: ClaimSettlement,
    consumers: Vec<Arc<dyn StageHandler>>,
    cursor: usize,
}

impl Pipeline {
    fn new() -> Self {
        agrisure_testing::init_test_logging();
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .register(fixtures::crop_insurance_schema())
            .unwrap();
        let bus = Arc::new(InMemoryEventBus::new());
        let applications = Arc::new(InMemoryApplicationStore::new());
        let verifications = Arc::new(InMemoryRecordStore::new());
        let inspections = Arc::new(InMemoryRecordStore::new());
        let policies = Arc::new(InMemoryRecordStore::new());
        let claims = Arc::new(InMemoryRecordStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let clock = test_clock();

        let processor = SubmissionProcessor::new(
            Arc::clone(&registry),
            Arc::clone(&applications) as Arc<dyn ApplicationStore>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            blobs as Arc<dyn BlobStore>,
            Arc::clone(&clock),
        );
        let projector = Arc::new(StatusProjector::new(
            Arc::clone(&applications) as Arc<dyn ApplicationStore>,
            Arc::clone(&clock),
        ));
        let verification = Arc::new(VerificationHandler::new(
            Arc::clone(&verifications) as Arc<dyn RecordStore<VerificationRecord>>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&clock),
        ));
        let forwarding = Arc::new(ForwardingHandler::new(
            Arc::clone(&verifications) as Arc<dyn RecordStore<VerificationRecord>>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&clock),
            "PCIC",
        ));
        let inspection = Arc::new(InspectionHandler::new(
            Arc::clone(&inspections) as Arc<dyn RecordStore<InspectionRecord>>,
            Arc::clone(&policies) as Arc<dyn RecordStore<Policy>>,
            Arc::clone(&claims) as Arc<dyn RecordStore<Claim>>,
            PolicyIssuer::new(COVERAGE),
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&clock),
            "PCIC",
        ));
        let settlement = ClaimSettlement::new(
            Arc::clone(&claims) as Arc<dyn RecordStore<Claim>>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            clock,
        );

        let consumers: Vec<Arc<dyn StageHandler>> = vec![
            projector,
            Arc::clone(&verification) as Arc<dyn StageHandler>,
            Arc::clone(&forwarding) as Arc<dyn StageHandler>,
            Arc::clone(&inspection) as Arc<dyn StageHandler>,
        ];

        Self {
            registry,
            bus,
            applications,
            verifications,
            inspections,
            policies,
            claims,
            processor,
            verification,
            forwarding,
            inspection,
            settlement,
            consumers,
            cursor: 0,
        }
    }

    /// Deliver every event published since the last drain to each consumer
    /// group, publishing follow-ons, until the topic is quiescent.
    ///
    /// Benign duplicates are dropped the way the consumer loop drops them;
    /// any other handler error fails the test.
    async fn drain(&mut self) {
        loop {
            let log = self.bus.published(LIFECYCLE_TOPIC);
            if self.cursor >= log.len() {
                return;
            }
            let envelope = log[self.cursor].clone();
            self.cursor += 1;
            for consumer in &self.consumers {
                if !consumer.wants(envelope.event_type()) {
                    continue;
                }
                match consumer.handle(&envelope).await {
                    Ok(follow_ons) => {
                        for follow_on in follow_ons {
                            self.bus.publish(LIFECYCLE_TOPIC, &follow_on).await.unwrap();
                        }
                    },
                    Err(err) if err.is_benign_duplicate() => {},
                    Err(err) => panic!(
                        "{} failed on {}: {err}",
                        consumer.consumer_group(),
                        envelope.event_type()
                    ),
                }
            }
        }
    }

    async fn submit(&self, user: UserId) -> SubmissionId {
        self.processor
            .submit(
                user,
                fixtures::CROP_INSURANCE.into(),
                fixtures::valid_crop_document(),
                fixtures::crop_upload(),
            )
            .await
            .unwrap()
            .id
    }

    fn application(&self, id: SubmissionId) -> Application {
        self.applications.find_sync(id).unwrap()
    }

    fn event_types(&self) -> Vec<&'static str> {
        self.bus
            .published(LIFECYCLE_TOPIC)
            .iter()
            .map(EventEnvelope::event_type)
            .collect()
    }
}

#[tokio::test]
async fn happy_path_runs_from_submission_to_paid_claim() {
    let mut p = Pipeline::new();
    let farmer = UserId::random();
    let staff = UserId::random();

    let id = p.submit(farmer).await;
    p.drain().await;
    assert_eq!(p.application(id).status, ApplicationStatus::UnderReview);

    p.verification
        .complete(staff, id, VerificationOutcome::Verified, None, None)
        .await
        .unwrap();
    p.drain().await;
    // Forwarding rode on the completion; the provider acknowledged.
    assert_eq!(p.application(id).status, ApplicationStatus::ReceivedByProvider);
    assert_eq!(
        p.inspections.find_sync(id).unwrap().status,
        InspectionStatus::Pending
    );

    p.inspection.schedule(staff, id, Utc::now()).await.unwrap();
    p.drain().await;
    assert_eq!(
        p.application(id).status,
        ApplicationStatus::InspectionScheduled
    );

    p.inspection
        .complete(staff, id, InspectionOutcome::Completed, "healthy crop")
        .await
        .unwrap();
    p.drain().await;
    assert_eq!(p.application(id).status, ApplicationStatus::PolicyIssued);

    let policy = p.policies.find_sync(id).unwrap();
    let claim = p.claims.find_sync(id).unwrap();
    assert_eq!(policy.coverage_amount, COVERAGE);
    assert_eq!(claim.policy_id, policy.policy_id);
    assert_eq!(claim.payout_status, PayoutStatus::Pending);

    // The claim sub-flow runs independently of the main chain.
    p.settlement
        .process_claim(staff, id, PayoutStatus::Approved)
        .await
        .unwrap();
    let paid = p
        .settlement
        .process_claim(staff, id, PayoutStatus::Paid)
        .await
        .unwrap();
    assert_eq!(paid.payout_status, PayoutStatus::Paid);
    p.drain().await;
    assert_eq!(p.application(id).status, ApplicationStatus::PolicyIssued);

    assert_eq!(
        p.event_types(),
        vec![
            "ApplicationSubmitted",
            "VerificationStarted",
            "VerificationCompleted",
            "ApplicationSentToProvider",
            "ApplicationReceivedByProvider",
            "InspectionScheduled",
            "InspectionCompleted",
            "PolicyIssued",
            "ClaimProcessed",
            "ClaimProcessed",
            "ClaimProcessed",
        ]
    );
}

#[tokio::test]
async fn applications_stay_pinned_to_their_submission_time_schema() {
    let mut p = Pipeline::new();
    let first = p.submit(UserId::random()).await;

    // The schema evolves after the first filing.
    let second_version = p
        .registry
        .register(fixtures::crop_insurance_schema())
        .unwrap();
    let second = p.submit(UserId::random()).await;
    p.drain().await;

    let key = fixtures::CROP_INSURANCE.into();
    assert_eq!(
        p.application(first).schema_version,
        agrisure_schema::SchemaVersion::INITIAL
    );
    assert_eq!(p.application(second).schema_version, second_version);
    // The pinned version stays resolvable after the update.
    assert!(p
        .registry
        .at(&key, agrisure_schema::SchemaVersion::INITIAL)
        .is_ok());
}

#[tokio::test]
async fn rejected_verification_ends_the_lifecycle() {
    let mut p = Pipeline::new();
    let id = p.submit(UserId::random()).await;
    p.drain().await;

    p.verification
        .complete(
            UserId::random(),
            id,
            VerificationOutcome::Rejected,
            None,
            Some("land title does not match parcel".to_string()),
        )
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(p.application(id).status, ApplicationStatus::Rejected);
    assert!(p.inspections.find_sync(id).is_none());
    assert!(p.policies.find_sync(id).is_none());
    // No hand-off left the verification service.
    assert!(!p.event_types().contains(&"ApplicationSentToProvider"));
}

#[tokio::test]
async fn invalid_inspection_closes_without_coverage() {
    let mut p = Pipeline::new();
    let staff = UserId::random();
    let id = p.submit(UserId::random()).await;
    p.drain().await;
    p.verification
        .complete(staff, id, VerificationOutcome::Verified, None, None)
        .await
        .unwrap();
    p.drain().await;
    p.inspection.schedule(staff, id, Utc::now()).await.unwrap();
    p.drain().await;

    p.inspection
        .complete(staff, id, InspectionOutcome::Invalid, "wrong parcel")
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(
        p.application(id).status,
        ApplicationStatus::InspectionCompleted
    );
    assert_eq!(
        p.inspections.find_sync(id).unwrap().status,
        InspectionStatus::Invalid
    );
    assert!(p.policies.find_sync(id).is_none());
    assert!(p.claims.find_sync(id).is_none());
}

#[tokio::test]
async fn redelivered_first_touch_event_changes_nothing() {
    let mut p = Pipeline::new();
    let id = p.submit(UserId::random()).await;
    p.drain().await;

    let verification_version = p.verifications.find_sync(id).unwrap().version;
    let application_version = p.application(id).version;

    // Redeliver the original ApplicationSubmitted as a crashed consumer
    // would see it after an uncommitted offset.
    let submitted = p.bus.published(LIFECYCLE_TOPIC)[0].clone();
    p.bus.publish(LIFECYCLE_TOPIC, &submitted).await.unwrap();
    p.drain().await;

    // The verification record was not reset and the re-emitted
    // VerificationStarted was absorbed by the projection as a duplicate.
    assert_eq!(
        p.verifications.find_sync(id).unwrap().version,
        verification_version
    );
    assert_eq!(p.application(id).version, application_version);
    assert_eq!(p.application(id).status, ApplicationStatus::UnderReview);
}

#[tokio::test]
async fn concurrent_submissions_keep_their_own_lifecycles() {
    let mut p = Pipeline::new();
    let staff = UserId::random();
    let first = p.submit(UserId::random()).await;
    let second = p.submit(UserId::random()).await;
    p.drain().await;

    p.verification
        .complete(staff, first, VerificationOutcome::Verified, None, None)
        .await
        .unwrap();
    p.verification
        .complete(
            staff,
            second,
            VerificationOutcome::Rejected,
            None,
            Some("duplicate filing".to_string()),
        )
        .await
        .unwrap();
    p.drain().await;

    assert_eq!(
        p.application(first).status,
        ApplicationStatus::ReceivedByProvider
    );
    assert_eq!(p.application(second).status, ApplicationStatus::Rejected);
    assert!(p.inspections.find_sync(first).is_some());
    assert!(p.inspections.find_sync(second).is_none());
}

#[tokio::test]
async fn explicit_forward_resend_is_absorbed_downstream() {
    let mut p = Pipeline::new();
    let staff = UserId::random();
    let id = p.submit(UserId::random()).await;
    p.drain().await;
    p.verification
        .complete(staff, id, VerificationOutcome::Verified, None, None)
        .await
        .unwrap();
    p.drain().await;

    let inspection_version = p.inspections.find_sync(id).unwrap().version;

    // A manual re-send duplicates the hand-off; the provider re-acknowledges
    // without resetting its record.
    p.forwarding.forward(staff, id).await.unwrap();
    p.drain().await;

    assert_eq!(
        p.inspections.find_sync(id).unwrap().version,
        inspection_version
    );
    assert_eq!(
        p.application(id).status,
        ApplicationStatus::ReceivedByProvider
    );
}
