//! Dead-letter path for events the consumer cannot apply.
//!
//! Nothing is ever dropped silently: an envelope that exhausts its retries
//! or hits a genuine ordering violation is handed to the sink together with
//! the failure reason, for an operator to inspect and replay.

use agrisure_core::envelope::EventEnvelope;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

/// Destination for undeliverable envelopes.
pub trait DeadLetterSink: Send + Sync {
    /// Hand off an envelope the consumer gave up on.
    ///
    /// The sink must not fail the consumer loop; implementations absorb
    /// their own errors.
    fn deliver<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Sink that records dead letters in the structured log.
///
/// The full envelope is serialized into the log line, so a dead-lettered
/// event can be replayed from log storage alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDeadLetter;

impl DeadLetterSink for LoggingDeadLetter {
    fn deliver<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let payload = envelope
                .to_json()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_else(|_| format!("<unencodable envelope {}>", envelope.event_id));
            tracing::error!(
                submission_id = %envelope.submission_id,
                event_type = envelope.event_type(),
                reason,
                payload,
                "event dead-lettered"
            );
        })
    }
}

/// Sink that collects dead letters in memory, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetter {
    entries: Mutex<Vec<(EventEnvelope, String)>>,
}

impl InMemoryDeadLetter {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything dead-lettered so far.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock was poisoned by a panicking test thread.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn entries(&self) -> Vec<(EventEnvelope, String)> {
        self.entries.lock().unwrap().clone()
    }

    /// Number of dead-lettered envelopes.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock was poisoned by a panicking test thread.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether nothing was dead-lettered.
    ///
    /// # Panics
    ///
    /// Panics if the interior lock was poisoned by a panicking test thread.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl DeadLetterSink for InMemoryDeadLetter {
    fn deliver<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
        reason: &'a str,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            #[allow(clippy::unwrap_used)]
            self.entries
                .lock()
                .unwrap()
                .push((envelope.clone(), reason.to_string()));
        })
    }
}
