//! Runtime plumbing shared by every stage deployment.
//!
//! A stage binary wires its [`agrisure_core::handler::StageHandler`] into a
//! [`StageConsumer`], which subscribes to the lifecycle topic under the
//! stage's consumer group and drives the at-least-once contract:
//!
//! - events the stage does not own are skipped without touching its store
//! - transient store/bus failures are retried with exponential backoff
//! - benign duplicates (redeliveries that find the work already applied)
//!   are logged and dropped
//! - genuine ordering violations and exhausted retries go to the
//!   [`DeadLetterSink`], never silently lost

pub mod consumer;
pub mod dead_letter;
pub mod retry;

pub use consumer::StageConsumer;
pub use dead_letter::{DeadLetterSink, InMemoryDeadLetter, LoggingDeadLetter};
pub use retry::{retry_with_backoff, RetryPolicy};
