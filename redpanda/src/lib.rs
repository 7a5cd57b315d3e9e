//! Redpanda-backed event bus for the Agrisure lifecycle log.
//!
//! Implements [`EventBus`] over a Kafka-compatible broker via rdkafka,
//! carrying JSON [`EventEnvelope`] bodies on the shared lifecycle topic.
//!
//! # Partitioning
//!
//! Messages are keyed by the envelope's submission id, so every event of one
//! submission lands on the same partition and reaches each consumer group in
//! publication order. Unrelated submissions spread across partitions.
//!
//! # Delivery
//!
//! At-least-once. Auto-commit is disabled; an offset is committed only after
//! the decoded envelope has been handed to the subscriber's channel. A crash
//! in between redelivers the message, which stage handlers already absorb as
//! duplicates against their own records.
//!
//! New consumer groups start at `earliest` by default, so a freshly deployed
//! stage replays the log instead of missing in-flight submissions.
//!
//! # Example
//!
//! ```no_run
//! use agrisure_core::bus::{EventBus, LIFECYCLE_TOPIC};
//! use agrisure_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::new("localhost:9092")?;
//! let mut events = bus.subscribe(LIFECYCLE_TOPIC, "verification-service").await?;
//! while let Some(next) = events.next().await {
//!     match next {
//!         Ok(envelope) => println!("received {}", envelope.event_type()),
//!         Err(err) => eprintln!("stream error: {err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use agrisure_core::bus::{EventBus, EventBusError, EventStream};
use agrisure_core::envelope::EventEnvelope;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_ACKS: &str = "all";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_OFFSET_RESET: &str = "earliest";
const DEFAULT_BUFFER: usize = 1000;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Production event bus over a Redpanda (or Kafka) cluster.
///
/// Holds one shared [`FutureProducer`]; each [`subscribe`](EventBus::subscribe)
/// call creates its own [`StreamConsumer`] under the caller's consumer group,
/// so several stages can share a single bus handle.
///
/// ```no_run
/// use agrisure_redpanda::RedpandaEventBus;
///
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("redpanda-0:9092,redpanda-1:9092")
///     .compression("zstd")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    /// Kept for building per-subscription consumers.
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Connect with default settings (`acks=all`, 5s send timeout,
    /// `auto.offset.reset=earliest`).
    ///
    /// # Errors
    ///
    /// [`EventBusError::ConnectionFailed`] when the producer cannot be built
    /// from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// The configured broker list.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Configuration builder for [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses. Required.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgement mode: `"0"`, `"1"`, or `"all"`.
    /// Defaults to `"all"`; the lifecycle log is the system of record for
    /// choreography, so losing an acked event is not acceptable.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec (`"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`).
    /// Defaults to `"none"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Defaults to 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// How many decoded envelopes may queue between the consumer task and a
    /// slow subscriber before backpressure kicks in. Defaults to 1000.
    ///
    /// # Panics
    ///
    /// Panics when given 0; an unbuffered channel would deadlock the
    /// consumer task against commit ordering.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        assert!(buffer_size > 0, "buffer_size must be greater than 0");
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a consumer group with no committed offset starts reading:
    /// `"earliest"` (default) replays the whole topic, `"latest"` sees only
    /// new events.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the bus, connecting the producer.
    ///
    /// # Errors
    ///
    /// [`EventBusError::ConnectionFailed`] when no brokers were set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("brokers not configured".into()))?;
        let acks = self.producer_acks.unwrap_or_else(|| DEFAULT_ACKS.into());
        let compression = self
            .compression
            .unwrap_or_else(|| DEFAULT_COMPRESSION.into());
        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.into());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("failed to create producer: {e}"))
            })?;

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            compression = %compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "connected lifecycle event bus"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let body = envelope
                .to_json()
                .map_err(|e| EventBusError::PublishFailed {
                    topic: topic.clone(),
                    reason: format!("failed to serialize envelope: {e}"),
                })?;

            // Partition key: all events of one submission stay ordered.
            let key = envelope.submission_id.to_string();
            let record = FutureRecord::to(&topic).payload(&body).key(key.as_bytes());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        event_type = envelope.event_type(),
                        submission_id = %envelope.submission_id,
                        "event published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        event_type = envelope.event_type(),
                        error = %kafka_error,
                        "publish failed"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let group = consumer_group.to_string();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            // enable.auto.commit=false: offsets advance only once the
            // subscriber has the envelope.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[topic.as_str()])
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topic: topic.clone(),
                    reason: format!("failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %topic,
                consumer_group = %group,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "subscribed to lifecycle topic"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            // The spawned task owns the consumer; dropping the returned
            // stream closes the channel, which ends the task uncommitted.
            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut messages = consumer.stream();

                while let Some(delivery) = messages.next().await {
                    match delivery {
                        Ok(message) => {
                            let decoded = match message.payload() {
                                Some(bytes) => EventEnvelope::from_json(bytes)
                                    .map_err(|e| EventBusError::Deserialization(e.to_string())),
                                None => Err(EventBusError::Deserialization(
                                    "message has no payload".into(),
                                )),
                            };

                            if let Ok(envelope) = &decoded {
                                tracing::trace!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    event_type = envelope.event_type(),
                                    submission_id = %envelope.submission_id,
                                    "received event"
                                );
                            }

                            // Hand over first, commit second. Undecodable
                            // payloads are surfaced to the subscriber and
                            // still committed; redelivering them would not
                            // make them parse.
                            if tx.send(decoded).await.is_err() {
                                tracing::debug!("subscriber dropped, stopping consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                // A missed commit only risks redelivery.
                                tracing::warn!(
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "offset commit failed"
                                );
                            }
                        }
                        Err(e) => {
                            let err =
                                EventBusError::Transport(format!("failed to receive message: {e}"));
                            if tx.send(Err(err)).await.is_err() {
                                break;
                            }
                        }
                    }
                }

                tracing::debug!("consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}
