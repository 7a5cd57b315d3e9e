//! Stage handlers for the application lifecycle.
//!
//! Each handler owns one slice of the choreography and one record set:
//!
//! - [`VerificationHandler`]: reacts to `ApplicationSubmitted`, runs the
//!   document review, closes with `VerificationCompleted`
//! - [`ForwardingHandler`]: hands verified applications to the receiving
//!   provider
//! - [`InspectionHandler`]: acknowledges receipt, books and closes the field
//!   inspection, and on a completed inspection issues the policy and opens
//!   the claim in the same local step
//! - [`PolicyIssuer`] / [`ClaimSettlement`]: policy-number generation,
//!   coverage computation and the independent claim settlement operation
//!
//! No handler reads another stage's records to make a decision; the only
//! coupling between stages is the event stream, correlated by submission id.
//! Every consume path re-checks its local status precondition, so redelivered
//! events resolve as benign duplicates instead of double-applying.

pub mod claim;
pub mod forwarding;
pub mod inspection;
pub mod policy;
pub mod records;
pub mod verification;

pub use claim::ClaimSettlement;
pub use forwarding::ForwardingHandler;
pub use inspection::{InspectionHandler, InspectionOutcome};
pub use policy::PolicyIssuer;
pub use records::{Claim, InspectionRecord, Policy, VerificationRecord};
pub use verification::{VerificationHandler, VerificationOutcome};
