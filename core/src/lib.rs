//! # Agrisure Core
//!
//! Shared contracts for the agrisure application lifecycle.
//!
//! Agrisure moves a submitted crop-insurance application through verification,
//! inspection, policy issuance, and claim settlement. Each stage is owned by an
//! independent service; stages communicate exclusively through an append-only,
//! at-least-once event log keyed by a stable submission identifier.
//!
//! This crate defines the pieces every service shares:
//!
//! - [`envelope`]: the wire contract for lifecycle events: identity,
//!   correlation, causality, and a type-tagged JSON payload
//! - [`bus`]: the publish/subscribe abstraction over the partitioned event log
//! - [`store`]: compare-and-swap persistence for stage-local records, the
//!   concurrency-control primitive of the whole pipeline
//! - [`handler`]: the shape every stage handler follows: consume, check the
//!   local precondition, apply, emit
//! - [`ids`]: strongly typed correlation keys and money amounts
//! - [`environment`]: injected dependencies such as the clock
//!
//! ## Delivery model
//!
//! The bus delivers at-least-once and in per-submission order (the submission
//! id is the partition key). Handlers must therefore be safe to invoke twice
//! with the same event: the local status precondition plus the versioned
//! compare-and-swap write make a redelivery a no-op rather than a double
//! effect.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod bus;
pub mod envelope;
pub mod environment;
pub mod handler;
pub mod ids;
pub mod store;
