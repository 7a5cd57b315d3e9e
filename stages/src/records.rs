//! Stage-local records, each keyed by submission id.
//!
//! These are four separate record sets owned by three services; the
//! submission id is a correlation value, never a foreign key. Each record
//! carries its own optimistic-concurrency version.

use agrisure_core::envelope::{InspectionStatus, PayoutStatus, VerificationStatus};
use agrisure_core::ids::{Money, SubmissionId};
use agrisure_core::store::StageRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The verification stage's view of one submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    /// Correlation key.
    pub submission_id: SubmissionId,
    /// Local review status.
    pub status: VerificationStatus,
    /// Kind of review performed, e.g. `DOCUMENT`.
    pub verification_type: String,
    /// Free-form reviewer report, set on completion.
    pub report: Option<String>,
    /// Populated only for rejections.
    pub rejection_reason: Option<String>,
    /// Optimistic-concurrency counter.
    pub version: u64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl VerificationRecord {
    /// A fresh pending review, created on first `ApplicationSubmitted`.
    #[must_use]
    pub fn pending(submission_id: SubmissionId, now: DateTime<Utc>) -> Self {
        Self {
            submission_id,
            status: VerificationStatus::Pending,
            verification_type: "DOCUMENT".to_string(),
            report: None,
            rejection_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

impl StageRecord for VerificationRecord {
    fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// The inspection stage's view of one submission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InspectionRecord {
    /// Correlation key.
    pub submission_id: SubmissionId,
    /// Local inspection status.
    pub status: InspectionStatus,
    /// Set when the inspection is booked.
    pub schedule_id: Option<Uuid>,
    /// Booked inspection date.
    pub schedule_date: Option<DateTime<Utc>>,
    /// Inspector's remarks, set on completion.
    pub comments: Option<String>,
    /// Optimistic-concurrency counter.
    pub version: u64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl InspectionRecord {
    /// A fresh pending inspection, created on `ApplicationSentToProvider`.
    #[must_use]
    pub fn pending(submission_id: SubmissionId, now: DateTime<Utc>) -> Self {
        Self {
            submission_id,
            status: InspectionStatus::Pending,
            schedule_id: None,
            schedule_date: None,
            comments: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the inspection reached a terminal status.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(
            self.status,
            InspectionStatus::Completed | InspectionStatus::Invalid
        )
    }
}

impl StageRecord for InspectionRecord {
    fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// An issued policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Correlation key.
    pub submission_id: SubmissionId,
    /// Identifier of this policy.
    pub policy_id: Uuid,
    /// Human-readable policy number.
    pub policy_number: String,
    /// Covered amount in cents.
    pub coverage_amount: Money,
    /// When coverage was issued.
    pub issued_at: DateTime<Utc>,
    /// Optimistic-concurrency counter.
    pub version: u64,
}

impl StageRecord for Policy {
    fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// A claim opened against an issued policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    /// Correlation key.
    pub submission_id: SubmissionId,
    /// Identifier of this claim.
    pub claim_id: Uuid,
    /// The policy the claim is opened against.
    pub policy_id: Uuid,
    /// Settlement state of the payout.
    pub payout_status: PayoutStatus,
    /// Claimed amount in cents.
    pub claim_amount: Money,
    /// When the claim was opened.
    pub opened_at: DateTime<Utc>,
    /// Last settlement change.
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter.
    pub version: u64,
}

impl StageRecord for Claim {
    fn submission_id(&self) -> SubmissionId {
        self.submission_id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}
