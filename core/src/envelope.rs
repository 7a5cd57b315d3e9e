//! Lifecycle event envelope, the wire contract for every stage transition.
//!
//! A single logical topic carries every event type for the whole lifecycle;
//! consumers filter by event type. The envelope is serialized as a
//! self-describing JSON document tagged with `eventType` so that any consumer
//! can dispatch without knowing the producer.
//!
//! # Invariant
//!
//! Every event for a given submission carries the same `submissionId`. The bus
//! partitions by it, so all events for one submission arrive at each consumer
//! group in publication order even though different submissions interleave
//! arbitrarily.
//!
//! # Example
//!
//! ```
//! use agrisure_core::envelope::{EventEnvelope, LifecycleEvent};
//! use agrisure_core::ids::{SubmissionId, UserId};
//! use chrono::Utc;
//!
//! let now = Utc::now();
//! let envelope = EventEnvelope::new(
//!     SubmissionId::random(),
//!     UserId::random(),
//!     now,
//!     LifecycleEvent::VerificationStarted { started_at: now },
//! );
//! assert_eq!(envelope.event_type(), "VerificationStarted");
//!
//! let json = envelope.to_json().unwrap();
//! let back = EventEnvelope::from_json(&json).unwrap();
//! assert_eq!(back.event_id, envelope.event_id);
//! ```

use crate::ids::{Money, SubmissionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Payload compatibility marker stamped on every envelope.
pub const SCHEMA_VERSION: u16 = 1;

/// Errors raised while encoding or decoding envelopes.
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// The envelope could not be serialized to JSON.
    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// The bytes on the wire are not a valid envelope.
    #[error("failed to decode envelope: {0}")]
    Decode(String),
}

/// Outcome of a verification review.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Record created, review not yet started.
    Pending,
    /// A reviewer has picked the submission up.
    UnderReview,
    /// Review passed.
    Verified,
    /// Review failed. Terminal for the main flow.
    Rejected,
}

/// Local status of an inspection record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionStatus {
    /// Received by the provider, awaiting a schedule.
    Pending,
    /// A field inspection has been scheduled.
    Scheduled,
    /// Inspection finished successfully.
    Completed,
    /// Inspection found the application invalid. Terminal.
    Invalid,
}

/// Settlement state of a claim.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    /// Claim created, payout not yet decided.
    Pending,
    /// Payout approved, awaiting disbursement.
    Approved,
    /// Payout denied.
    Denied,
    /// Payout disbursed.
    Paid,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::UnderReview => write!(f, "UNDER_REVIEW"),
            Self::Verified => write!(f, "VERIFIED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

impl fmt::Display for InspectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Scheduled => write!(f, "SCHEDULED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Invalid => write!(f, "INVALID"),
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Denied => write!(f, "DENIED"),
            Self::Paid => write!(f, "PAID"),
        }
    }
}

/// Type-specific payload of a lifecycle event.
///
/// The serde representation tags the variant as `eventType` and nests the
/// fields under `payload`, which is exactly what lands on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload")]
pub enum LifecycleEvent {
    /// A valid submission was persisted by the submission processor.
    ApplicationSubmitted {
        /// Key of the application type the submission was validated against.
        application_type: String,
        /// Schema version the submission is pinned to.
        schema_version: u32,
        /// Producer-side submission timestamp.
        submitted_at: DateTime<Utc>,
    },
    /// The verification stage created its record and began work.
    VerificationStarted {
        /// When the review was opened.
        started_at: DateTime<Utc>,
    },
    /// Verification reached a terminal outcome.
    VerificationCompleted {
        /// `Verified` or `Rejected`.
        status: VerificationStatus,
        /// Populated only when the outcome is `Rejected`.
        rejection_reason: Option<String>,
        /// When the outcome was recorded.
        verified_at: DateTime<Utc>,
    },
    /// A verified application was forwarded to the receiving provider.
    ApplicationSentToProvider {
        /// Name of the receiving provider.
        provider: String,
        /// When the hand-off was published.
        sent_at: DateTime<Utc>,
    },
    /// The receiving provider acknowledged the application.
    ApplicationReceivedByProvider {
        /// Name of the receiving provider.
        provider: String,
        /// Initial local inspection status (always `Pending`).
        status: InspectionStatus,
        /// When the provider created its record.
        received_at: DateTime<Utc>,
    },
    /// A field inspection was scheduled.
    InspectionScheduled {
        /// Identifier of the created schedule.
        schedule_id: Uuid,
        /// When the inspection will take place.
        schedule_date: DateTime<Utc>,
    },
    /// The inspection reached a terminal outcome.
    InspectionCompleted {
        /// `Completed` or `Invalid`.
        status: InspectionStatus,
        /// Inspector's remarks.
        comments: String,
        /// When the inspection was closed.
        inspected_at: DateTime<Utc>,
    },
    /// A policy was issued for a completed inspection.
    PolicyIssued {
        /// Identifier of the policy record.
        policy_id: Uuid,
        /// Human-readable policy number.
        policy_number: String,
        /// Covered amount in cents.
        coverage_amount: Money,
        /// When the policy was issued.
        issued_at: DateTime<Utc>,
    },
    /// A claim was settled (independent sub-flow, not strictly chained).
    ClaimProcessed {
        /// Identifier of the claim record.
        claim_id: Uuid,
        /// Settlement state of the payout.
        payout_status: PayoutStatus,
        /// Claimed amount in cents.
        claim_amount: Money,
        /// When the claim was processed.
        processed_at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Stable discriminator used for consumer-side dispatch.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ApplicationSubmitted { .. } => "ApplicationSubmitted",
            Self::VerificationStarted { .. } => "VerificationStarted",
            Self::VerificationCompleted { .. } => "VerificationCompleted",
            Self::ApplicationSentToProvider { .. } => "ApplicationSentToProvider",
            Self::ApplicationReceivedByProvider { .. } => "ApplicationReceivedByProvider",
            Self::InspectionScheduled { .. } => "InspectionScheduled",
            Self::InspectionCompleted { .. } => "InspectionCompleted",
            Self::PolicyIssued { .. } => "PolicyIssued",
            Self::ClaimProcessed { .. } => "ClaimProcessed",
        }
    }
}

/// Common metadata wrapper around every lifecycle event payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Globally unique event identity.
    pub event_id: Uuid,
    /// Correlation key, identical for every event of one submission.
    pub submission_id: SubmissionId,
    /// Subject of the event.
    pub user_id: UserId,
    /// Producer-side timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Payload compatibility marker.
    pub schema_version: u16,
    /// The type-tagged payload.
    #[serde(flatten)]
    pub event: LifecycleEvent,
}

impl EventEnvelope {
    /// Build an envelope with a fresh event id and the current schema version.
    #[must_use]
    pub fn new(
        submission_id: SubmissionId,
        user_id: UserId,
        occurred_at: DateTime<Utc>,
        event: LifecycleEvent,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            submission_id,
            user_id,
            occurred_at,
            schema_version: SCHEMA_VERSION,
            event,
        }
    }

    /// Discriminator of the wrapped payload.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        self.event.event_type()
    }

    /// Serialize for the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Encode`] if JSON serialization fails, which
    /// only happens for non-string map keys and similar defects the envelope
    /// types cannot contain.
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Encode(e.to_string()))
    }

    /// Deserialize from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Decode`] if the bytes are not a valid
    /// envelope: corrupted payload, unknown `eventType`, or an incompatible
    /// schema change.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Decode(e.to_string()))
    }
}

impl fmt::Display for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {{ event_id: {}, submission: {} }}",
            self.event_type(),
            self.event_id,
            self.submission_id
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn sample_envelope(event: LifecycleEvent) -> EventEnvelope {
        EventEnvelope::new(SubmissionId::random(), UserId::random(), Utc::now(), event)
    }

    #[test]
    fn envelope_json_roundtrip() {
        let envelope = sample_envelope(LifecycleEvent::PolicyIssued {
            policy_id: Uuid::new_v4(),
            policy_number: "POL-2025-000042".to_string(),
            coverage_amount: Money::from_units(50_000),
            issued_at: Utc::now(),
        });

        let bytes = envelope.to_json().unwrap();
        let back = EventEnvelope::from_json(&bytes).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn wire_format_is_tagged_with_event_type() {
        let envelope = sample_envelope(LifecycleEvent::VerificationStarted {
            started_at: Utc::now(),
        });

        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["eventType"], "VerificationStarted");
        assert!(value["payload"]["started_at"].is_string());
        assert_eq!(value["schema_version"], 1);
    }

    #[test]
    fn unknown_event_type_is_a_decode_error() {
        let bogus = br#"{"event_id":"8c5f0a70-0000-0000-0000-000000000000",
            "submission_id":"8c5f0a70-0000-0000-0000-000000000001",
            "user_id":"8c5f0a70-0000-0000-0000-000000000002",
            "occurred_at":"2025-01-01T00:00:00Z","schema_version":1,
            "eventType":"SomethingElse","payload":{}}"#;
        assert!(matches!(
            EventEnvelope::from_json(bogus),
            Err(EnvelopeError::Decode(_))
        ));
    }

    #[test]
    fn verification_completed_carries_rejection_reason() {
        let envelope = sample_envelope(LifecycleEvent::VerificationCompleted {
            status: VerificationStatus::Rejected,
            rejection_reason: Some("missing land title".to_string()),
            verified_at: Utc::now(),
        });

        let bytes = envelope.to_json().unwrap();
        let back = EventEnvelope::from_json(&bytes).unwrap();
        match back.event {
            LifecycleEvent::VerificationCompleted {
                status,
                rejection_reason,
                ..
            } => {
                assert_eq!(status, VerificationStatus::Rejected);
                assert_eq!(rejection_reason.as_deref(), Some("missing land title"));
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
