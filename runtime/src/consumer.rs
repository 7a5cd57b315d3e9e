//! The consumer loop a stage deployment runs.

use crate::dead_letter::DeadLetterSink;
use crate::retry::{retry_with_backoff, RetryPolicy};
use agrisure_core::bus::{EventBus, EventBusError, LIFECYCLE_TOPIC};
use agrisure_core::envelope::EventEnvelope;
use agrisure_core::handler::{StageError, StageHandler};
use futures::StreamExt;
use metrics::counter;
use std::sync::Arc;

/// Drives one [`StageHandler`] against the lifecycle topic.
///
/// The loop sits between the at-least-once bus and the handler's
/// precondition checks, sorting every failure into one of three buckets:
/// retry (transient infrastructure), drop-with-log (benign duplicate) or
/// dead-letter (everything else).
pub struct StageConsumer {
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn StageHandler>,
    policy: RetryPolicy,
    dead_letters: Arc<dyn DeadLetterSink>,
}

impl StageConsumer {
    /// Wire a handler into the loop.
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        handler: Arc<dyn StageHandler>,
        policy: RetryPolicy,
        dead_letters: Arc<dyn DeadLetterSink>,
    ) -> Self {
        Self {
            bus,
            handler,
            policy,
            dead_letters,
        }
    }

    /// Subscribe under the handler's consumer group and process events until
    /// the stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError`] only if the subscription itself cannot be
    /// established; per-event failures are handled inside the loop.
    pub async fn run(&self) -> Result<(), EventBusError> {
        let group = self.handler.consumer_group();
        let mut stream = self.bus.subscribe(LIFECYCLE_TOPIC, group).await?;
        tracing::info!(consumer_group = group, "stage consumer started");
        while let Some(item) = stream.next().await {
            match item {
                Ok(envelope) => self.process(&envelope).await,
                Err(e) => {
                    // Decode/transport trouble on the stream; the broker
                    // still holds the message, so log and keep consuming.
                    tracing::error!(consumer_group = group, error = %e, "stream error");
                },
            }
        }
        tracing::info!(consumer_group = group, "stage consumer stopped");
        Ok(())
    }

    /// Run one envelope through the handler with the full failure taxonomy.
    pub async fn process(&self, envelope: &EventEnvelope) {
        let group = self.handler.consumer_group();
        if !self.handler.wants(envelope.event_type()) {
            tracing::trace!(
                consumer_group = group,
                event_type = envelope.event_type(),
                "skipping unwanted event type"
            );
            return;
        }

        let outcome = retry_with_backoff(
            &self.policy,
            || self.handler.handle(envelope),
            StageError::is_transient,
        )
        .await;

        match outcome {
            Ok(follow_ons) => {
                counter!("lifecycle_events_processed", "consumer_group" => group).increment(1);
                for event in follow_ons {
                    self.publish_follow_on(event).await;
                }
            },
            Err(err) if err.is_benign_duplicate() => {
                counter!("lifecycle_events_duplicate", "consumer_group" => group).increment(1);
                tracing::info!(
                    consumer_group = group,
                    submission_id = %envelope.submission_id,
                    event_type = envelope.event_type(),
                    detail = %err,
                    "redelivered event already applied, dropping"
                );
            },
            Err(err) => {
                counter!("lifecycle_events_dead_lettered", "consumer_group" => group)
                    .increment(1);
                self.dead_letters.deliver(envelope, &err.to_string()).await;
            },
        }
    }

    async fn publish_follow_on(&self, event: EventEnvelope) {
        let published = retry_with_backoff(
            &self.policy,
            || self.bus.publish(LIFECYCLE_TOPIC, &event),
            |_| true,
        )
        .await;
        if let Err(err) = published {
            // The follow-on is the message at risk here, not the input.
            self.dead_letters
                .deliver(&event, &format!("follow-on publish failed: {err}"))
                .await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dead_letter::InMemoryDeadLetter;
    use agrisure_core::envelope::LifecycleEvent;
    use agrisure_core::handler::TransitionSkew;
    use agrisure_core::ids::{SubmissionId, UserId};
    use agrisure_core::store::StoreError;
    use agrisure_testing::InMemoryEventBus;
    use chrono::Utc;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted handler: fails `failures` times, then succeeds with one
    /// follow-on.
    struct ScriptedHandler {
        failures: usize,
        error: fn(SubmissionId) -> StageError,
        calls: AtomicUsize,
    }

    impl ScriptedHandler {
        fn failing_times(failures: usize, error: fn(SubmissionId) -> StageError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl StageHandler for ScriptedHandler {
        fn consumer_group(&self) -> &'static str {
            "scripted"
        }

        fn wants(&self, event_type: &str) -> bool {
            event_type == "VerificationStarted"
        }

        fn handle<'a>(
            &'a self,
            envelope: &'a EventEnvelope,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<EventEnvelope>, StageError>> + Send + 'a>>
        {
            Box::pin(async move {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                if call < self.failures {
                    return Err((self.error)(envelope.submission_id));
                }
                Ok(vec![EventEnvelope::new(
                    envelope.submission_id,
                    envelope.user_id,
                    Utc::now(),
                    LifecycleEvent::ApplicationSentToProvider {
                        provider: "PCIC".to_string(),
                        sent_at: Utc::now(),
                    },
                )])
            })
        }
    }

    fn started() -> EventEnvelope {
        EventEnvelope::new(
            SubmissionId::random(),
            UserId::random(),
            Utc::now(),
            LifecycleEvent::VerificationStarted {
                started_at: Utc::now(),
            },
        )
    }

    fn consumer(handler: Arc<dyn StageHandler>) -> (StageConsumer, Arc<InMemoryEventBus>, Arc<InMemoryDeadLetter>) {
        let bus = Arc::new(InMemoryEventBus::new());
        let sink = Arc::new(InMemoryDeadLetter::new());
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build();
        let consumer = StageConsumer::new(
            Arc::clone(&bus) as Arc<dyn EventBus>,
            handler,
            policy,
            Arc::clone(&sink) as Arc<dyn DeadLetterSink>,
        );
        (consumer, bus, sink)
    }

    #[tokio::test]
    async fn transient_failures_are_retried_and_follow_ons_published() {
        let handler = Arc::new(ScriptedHandler::failing_times(2, |_| {
            StageError::Store(StoreError::Unavailable("flaky".to_string()))
        }));
        let (consumer, bus, sink) = consumer(Arc::clone(&handler) as Arc<dyn StageHandler>);

        consumer.process(&started()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(bus.published(LIFECYCLE_TOPIC).len(), 1);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn benign_duplicates_are_dropped_without_retry_or_dead_letter() {
        let handler = Arc::new(ScriptedHandler::failing_times(usize::MAX, |id| {
            StageError::InvalidTransition {
                submission_id: id,
                expected: "PENDING".to_string(),
                actual: "SCHEDULED".to_string(),
                skew: TransitionSkew::AlreadyApplied,
            }
        }));
        let (consumer, bus, sink) = consumer(Arc::clone(&handler) as Arc<dyn StageHandler>);

        consumer.process(&started()).await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(bus.published(LIFECYCLE_TOPIC).is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn ordering_violations_are_dead_lettered() {
        let handler = Arc::new(ScriptedHandler::failing_times(usize::MAX, |id| {
            StageError::InvalidTransition {
                submission_id: id,
                expected: "SCHEDULED".to_string(),
                actual: "PENDING".to_string(),
                skew: TransitionSkew::NotYetReady,
            }
        }));
        let (consumer, _, sink) = consumer(Arc::clone(&handler) as Arc<dyn StageHandler>);

        let envelope = started();
        consumer.process(&envelope).await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0.event_id, envelope.event_id);
        assert!(entries[0].1.contains("invalid transition"));
    }

    #[tokio::test]
    async fn exhausted_retries_are_dead_lettered() {
        let handler = Arc::new(ScriptedHandler::failing_times(usize::MAX, |_| {
            StageError::Store(StoreError::Unavailable("down".to_string()))
        }));
        let (consumer, _, sink) = consumer(Arc::clone(&handler) as Arc<dyn StageHandler>);

        consumer.process(&started()).await;

        // 1 initial + 2 retries
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn unwanted_event_types_never_reach_the_handler() {
        let handler = Arc::new(ScriptedHandler::failing_times(0, |id| {
            StageError::RecordNotFound(id)
        }));
        let (consumer, _, _) = consumer(Arc::clone(&handler) as Arc<dyn StageHandler>);

        let envelope = EventEnvelope::new(
            SubmissionId::random(),
            UserId::random(),
            Utc::now(),
            LifecycleEvent::PolicyIssued {
                policy_id: uuid::Uuid::new_v4(),
                policy_number: "POL-2025-ABCDEF01".to_string(),
                coverage_amount: agrisure_core::ids::Money::from_cents(1),
                issued_at: Utc::now(),
            },
        );
        consumer.process(&envelope).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }
}
