//! Policy issuance: number generation and coverage computation.

use crate::records::Policy;
use agrisure_core::ids::{Money, SubmissionId};
use chrono::{DateTime, Datelike, Utc};
use uuid::Uuid;

/// Issues policies for completed inspections.
///
/// Coverage is a flat amount configured per deployment; premium tiers are a
/// provider-side concern and never ride on the event stream.
pub struct PolicyIssuer {
    coverage_amount: Money,
}

impl PolicyIssuer {
    /// Issuer with the deployment's configured coverage amount.
    #[must_use]
    pub const fn new(coverage_amount: Money) -> Self {
        Self { coverage_amount }
    }

    /// Build the policy record for a submission.
    ///
    /// The policy number embeds the issuance year and a fragment of the
    /// policy id, e.g. `POL-2025-9F3A01BC`.
    #[must_use]
    pub fn issue(&self, submission_id: SubmissionId, now: DateTime<Utc>) -> Policy {
        let policy_id = Uuid::new_v4();
        let policy_number = Self::policy_number(policy_id, now);
        Policy {
            submission_id,
            policy_id,
            policy_number,
            coverage_amount: self.coverage_amount,
            issued_at: now,
            version: 1,
        }
    }

    fn policy_number(policy_id: Uuid, now: DateTime<Utc>) -> String {
        let fragment = policy_id.simple().to_string();
        let fragment = fragment.get(..8).unwrap_or_default().to_uppercase();
        format!("POL-{}-{fragment}", now.year())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn policy_number_carries_year_and_id_fragment() {
        let issuer = PolicyIssuer::new(Money::from_cents(5_000_000));
        let now = "2025-01-01T00:00:00Z".parse().unwrap();
        let policy = issuer.issue(SubmissionId::random(), now);

        assert!(policy.policy_number.starts_with("POL-2025-"));
        assert_eq!(policy.policy_number.len(), "POL-2025-".len() + 8);
        assert_eq!(policy.coverage_amount, Money::from_cents(5_000_000));
    }

    #[test]
    fn each_policy_gets_a_distinct_number() {
        let issuer = PolicyIssuer::new(Money::from_cents(1));
        let now = Utc::now();
        let a = issuer.issue(SubmissionId::random(), now);
        let b = issuer.issue(SubmissionId::random(), now);
        assert_ne!(a.policy_number, b.policy_number);
    }
}
