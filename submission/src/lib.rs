//! Submission entry point for the application pipeline.
//!
//! This crate owns the single gate through which farmer applications enter
//! the lifecycle: [`SubmissionProcessor::submit`] validates a dynamic
//! document against the latest registered schema, persists the
//! [`Application`] record, and publishes exactly one `ApplicationSubmitted`
//! event to the lifecycle topic.
//!
//! Submission is atomic from the submitter's point of view: an invalid
//! document is rejected with the full list of field errors and leaves no
//! trace: no record, no stored file, no event. A valid document takes full
//! effect. Because publishing happens after persistence, a crash in between
//! leaves the application flagged unpublished; [`SubmissionProcessor::republish_pending`]
//! replays the intent, and downstream consumers absorb the duplicate.
//!
//! After submission the record is mutated only through status updates: the
//! [`StatusProjector`] folds downstream lifecycle events back onto
//! [`Application::status`] so the applicant sees the submission progress.

pub mod application;
pub mod processor;
pub mod projection;

pub use application::{Application, ApplicationStatus, ApplicationStore};
pub use processor::{SubmissionError, SubmissionProcessor};
pub use projection::StatusProjector;
