//! The application record and its status lifecycle.

use agrisure_core::ids::{SubmissionId, UserId};
use agrisure_core::store::{RecordStore, StageRecord, StoreError};
use agrisure_schema::{SchemaKey, SchemaVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Lifecycle status of an application, projected from the event stream.
///
/// Movement is forward-only: once a submission reaches a status it never
/// returns to an earlier one, though intermediate statuses may be skipped
/// when a stage resolves in a single step. `Rejected`, `Cancelled` and
/// `PolicyIssued` are terminal (claim settlement runs off the policy, not
/// the application).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    /// Accepted by the submission gate; verification has not started.
    Submitted,
    /// A verifier is actively reviewing the submission.
    UnderReview,
    /// Verification succeeded.
    Verified,
    /// Verification failed; terminal.
    Rejected,
    /// Forwarded to the insurance provider.
    SentToProvider,
    /// The provider acknowledged receipt; an inspection is pending.
    ReceivedByProvider,
    /// A field inspection has been booked.
    InspectionScheduled,
    /// The inspection concluded.
    InspectionCompleted,
    /// Coverage is active; terminal.
    PolicyIssued,
    /// Withdrawn by the applicant; terminal. The record is kept, never
    /// deleted.
    Cancelled,
}

impl ApplicationStatus {
    /// Position in the forward chain, if the status is on it.
    const fn rank(self) -> Option<u8> {
        match self {
            Self::Submitted => Some(0),
            Self::UnderReview => Some(1),
            Self::Verified => Some(2),
            Self::SentToProvider => Some(3),
            Self::ReceivedByProvider => Some(4),
            Self::InspectionScheduled => Some(5),
            Self::InspectionCompleted => Some(6),
            Self::PolicyIssued => Some(7),
            Self::Rejected | Self::Cancelled => None,
        }
    }

    /// Whether no further transition is permitted from this status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Cancelled | Self::PolicyIssued)
    }

    /// Whether moving from `self` to `next` respects the forward-only state
    /// machine.
    ///
    /// Skipping ahead is allowed (a stage may resolve several steps in one
    /// event); moving backwards or out of a terminal status is not.
    /// Rejection is only reachable while verification is still open, and
    /// cancellation from any non-terminal status.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Cancelled => true,
            Self::Rejected => matches!(self, Self::Submitted | Self::UnderReview),
            _ => match (self.rank(), next.rank()) {
                (Some(current), Some(target)) => target > current,
                _ => false,
            },
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Submitted => "SUBMITTED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
            Self::SentToProvider => "SENT_TO_PROVIDER",
            Self::ReceivedByProvider => "RECEIVED_BY_PROVIDER",
            Self::InspectionScheduled => "INSPECTION_SCHEDULED",
            Self::InspectionCompleted => "INSPECTION_COMPLETED",
            Self::PolicyIssued => "POLICY_ISSUED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{label}")
    }
}

/// A farmer's application: the dynamic document plus lifecycle bookkeeping.
///
/// `dynamic_fields` is the enriched document: file fields already rewritten
/// to storage references. `schema_version` pins the schema the document was
/// validated against, so later registry updates never reinterpret it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Application {
    /// Correlation key for the whole lifecycle.
    pub id: SubmissionId,
    /// The application type this submission instantiates.
    pub application_type: SchemaKey,
    /// Registry version the document was validated against.
    pub schema_version: SchemaVersion,
    /// The applicant.
    pub submitted_by: UserId,
    /// Validated, enriched field values keyed by field key.
    pub dynamic_fields: Map<String, Value>,
    /// Current lifecycle status.
    pub status: ApplicationStatus,
    /// Whether the `ApplicationSubmitted` event has reached the bus.
    pub published: bool,
    /// Optimistic-concurrency counter.
    pub version: u64,
    /// When the submission was accepted.
    pub submitted_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// A freshly accepted application, not yet published.
    #[must_use]
    pub fn new(
        id: SubmissionId,
        application_type: SchemaKey,
        schema_version: SchemaVersion,
        submitted_by: UserId,
        dynamic_fields: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            application_type,
            schema_version,
            submitted_by,
            dynamic_fields,
            status: ApplicationStatus::Submitted,
            published: false,
            version: 1,
            submitted_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, bumping the version for a compare-and-swap write.
    ///
    /// Returns `false` (and leaves the record untouched) when the state
    /// machine forbids the move.
    pub fn transition_to(&mut self, next: ApplicationStatus, now: DateTime<Utc>) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = now;
        self.bump_version();
        true
    }
}

impl StageRecord for Application {
    fn submission_id(&self) -> SubmissionId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn bump_version(&mut self) {
        self.version += 1;
    }
}

/// Compare-and-swap store for applications, with the extra query the
/// publish-after-persist intent needs.
pub trait ApplicationStore: RecordStore<Application> {
    /// Applications whose `ApplicationSubmitted` event never reached the bus.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the datastore cannot be
    /// reached.
    fn find_unpublished(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Application>, StoreError>> + Send + '_>>;
}
