//! Event bus abstraction over the partitioned lifecycle log.
//!
//! One logical ordered-per-key topic carries every event type for the whole
//! lifecycle. The message key is the submission id, so all events for one
//! submission reach each consumer group in publication order. Delivery is
//! at-least-once: subscribers must tolerate duplicates (see
//! [`crate::handler`]).
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (in `agrisure-testing`): fast, deterministic tests
//! - `RedpandaEventBus` (in `agrisure-redpanda`): Kafka-compatible production
//!   bus with manual offset commits
//!
//! # Example
//!
//! ```rust,ignore
//! use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
//! use futures::StreamExt;
//!
//! async fn example(bus: &dyn EventBus) {
//!     let mut stream = bus
//!         .subscribe(LIFECYCLE_TOPIC, "verification-group")
//!         .await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(envelope) => println!("received {}", envelope.event_type()),
//!             Err(e) => tracing::error!("stream error: {e}"),
//!         }
//!     }
//! }
//! ```

use crate::envelope::EventEnvelope;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// The single logical topic carrying the whole application lifecycle.
pub const LIFECYCLE_TOPIC: &str = "application-lifecycle";

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic.
    #[error("publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// Failed to subscribe to a topic.
    #[error("subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// The topic that failed to subscribe.
        topic: String,
        /// The reason for failure.
        reason: String,
    },

    /// A message on the wire was not a valid envelope.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// Network or transport error.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stream of envelopes from a subscription.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<EventEnvelope, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn` so the
/// bus can be held as `Arc<dyn EventBus>` inside stage environments.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic.
    ///
    /// Implementations key the message by the envelope's submission id so
    /// that per-submission ordering holds across partitions. Publishing is
    /// at-least-once: a timeout may leave the event delivered but
    /// unacknowledged, and callers retry rather than roll back.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation
    /// fails.
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to a topic as a member of `consumer_group`.
    ///
    /// Each consumer group receives its own copy of every event; members of
    /// the same group share the partitions. The returned stream yields every
    /// event type on the topic; handlers filter by
    /// [`EventEnvelope::event_type`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_failed_display_includes_topic() {
        let err = EventBusError::PublishFailed {
            topic: LIFECYCLE_TOPIC.to_string(),
            reason: "broker down".to_string(),
        };
        let display = err.to_string();
        assert!(display.contains("application-lifecycle"));
        assert!(display.contains("broker down"));
    }
}
