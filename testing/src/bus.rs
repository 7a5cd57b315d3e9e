//! In-memory event bus for fast, deterministic testing.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use agrisure_core::bus::{EventBus, EventBusError, EventStream};
use agrisure_core::envelope::EventEnvelope;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

type Subscriber = mpsc::UnboundedSender<Result<EventEnvelope, EventBusError>>;

/// In-memory bus with one totally ordered log per topic.
///
/// Every subscription replays the topic from the beginning and then receives
/// live events, so tests never race against subscription timing. A single log
/// per topic gives a total order, which trivially satisfies the
/// per-submission ordering the production bus guarantees.
///
/// [`fail_publishes`](Self::fail_publishes) switches the bus into outage
/// mode, where every publish fails, used to exercise the
/// publish-after-persist replay path.
#[derive(Default)]
pub struct InMemoryEventBus {
    topics: Mutex<HashMap<String, Vec<EventEnvelope>>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    failing: AtomicBool,
}

impl InMemoryEventBus {
    /// Create a new empty in-memory bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published to `topic` so far, in publication order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<EventEnvelope> {
        self.topics
            .lock()
            .unwrap()
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Toggle outage mode: while `true` every publish fails and nothing is
    /// logged or delivered.
    pub fn fail_publishes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Drop all logs and subscriptions (for test isolation).
    pub fn clear(&self) {
        self.topics.lock().unwrap().clear();
        self.subscribers.lock().unwrap().clear();
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        envelope: &EventEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let envelope = envelope.clone();
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "simulated outage".to_string(),
                });
            }
            self.topics
                .lock()
                .unwrap()
                .entry(topic.clone())
                .or_default()
                .push(envelope.clone());
            // Fan out to live subscribers, dropping the disconnected ones.
            if let Some(senders) = self.subscribers.lock().unwrap().get_mut(&topic) {
                senders.retain(|sender| sender.send(Ok(envelope.clone())).is_ok());
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topic: &str,
        _consumer_group: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let (sender, mut receiver) = mpsc::unbounded_channel();
            // Replay the log before registering for live delivery; both run
            // under the topics lock seen by publish, so no event is missed
            // or duplicated at the boundary.
            {
                let topics = self.topics.lock().unwrap();
                let mut subscribers = self.subscribers.lock().unwrap();
                if let Some(log) = topics.get(&topic) {
                    for envelope in log {
                        let _ = sender.send(Ok(envelope.clone()));
                    }
                }
                subscribers.entry(topic).or_default().push(sender);
            }
            let stream = async_stream::stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }
}
