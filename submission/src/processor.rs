//! The submission gate: validate, persist, publish.

use crate::application::{Application, ApplicationStatus, ApplicationStore};
use agrisure_core::bus::{EventBus, EventBusError, LIFECYCLE_TOPIC};
use agrisure_core::envelope::{EventEnvelope, LifecycleEvent};
use agrisure_core::environment::Clock;
use agrisure_core::ids::{SubmissionId, UserId};
use agrisure_core::store::StoreError;
use agrisure_schema::{
    BlobStore, BlobStoreError, DispatchError, FieldError, SchemaError, SchemaKey, SchemaRegistry,
    Upload, ValidationDispatcher,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Errors from the submission operations.
#[derive(Error, Debug)]
pub enum SubmissionError {
    /// The document violated its schema. Nothing was persisted, stored or
    /// published.
    #[error("submission rejected with {} field error(s)", .0.len())]
    Rejected(Vec<FieldError>),

    /// The named application type (or pinned version) is not registered.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Uploaded file relocation failed.
    #[error(transparent)]
    Blob(#[from] BlobStoreError),

    /// Record persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The lifecycle topic could not be reached.
    #[error(transparent)]
    Publish(#[from] EventBusError),

    /// No application exists for the submission id.
    #[error("no application found for {0}")]
    NotFound(SubmissionId),

    /// The acting user did not submit this application.
    #[error("user {user_id} does not own application {submission_id}")]
    NotOwner {
        /// The application acted on.
        submission_id: SubmissionId,
        /// The acting user.
        user_id: UserId,
    },

    /// The application's current status forbids the operation.
    #[error("application {submission_id} cannot move from {status}")]
    InvalidState {
        /// The application acted on.
        submission_id: SubmissionId,
        /// Its current status.
        status: ApplicationStatus,
    },
}

/// Accepts applications into the pipeline.
///
/// Holds its collaborators behind trait objects so deployments can swap the
/// bus, store and blob store without touching the gate logic.
pub struct SubmissionProcessor {
    registry: Arc<SchemaRegistry>,
    store: Arc<dyn ApplicationStore>,
    bus: Arc<dyn EventBus>,
    blobs: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
}

impl SubmissionProcessor {
    /// Wire up the gate.
    #[must_use]
    pub fn new(
        registry: Arc<SchemaRegistry>,
        store: Arc<dyn ApplicationStore>,
        bus: Arc<dyn EventBus>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            store,
            bus,
            blobs,
            clock,
        }
    }

    /// Validate `document` against the latest version of `schema_key`,
    /// persist the application and publish `ApplicationSubmitted`.
    ///
    /// The submission is pinned to the schema version it was validated
    /// against. Publishing happens strictly after persistence; if the bus is
    /// down the application is returned with `published == false` and
    /// [`republish_pending`](Self::republish_pending) replays it later.
    ///
    /// # Errors
    ///
    /// - [`SubmissionError::Rejected`] with every field violation; no record,
    ///   no stored file, no event
    /// - [`SubmissionError::Schema`] if the application type is unknown
    /// - [`SubmissionError::Blob`] / [`SubmissionError::Store`] on
    ///   infrastructure failure
    pub async fn submit(
        &self,
        user_id: UserId,
        schema_key: SchemaKey,
        document: Map<String, Value>,
        attachments: Upload,
    ) -> Result<Application, SubmissionError> {
        let (schema_version, schema) = self.registry.latest(&schema_key)?;
        let enriched = ValidationDispatcher::validate_and_store(
            &schema,
            &document,
            &attachments,
            self.blobs.as_ref(),
        )
        .await
        .map_err(|err| match err {
            DispatchError::Invalid(errors) => SubmissionError::Rejected(errors),
            DispatchError::Blob(blob) => SubmissionError::Blob(blob),
        })?;

        let now = self.clock.now();
        let mut application = Application::new(
            SubmissionId::random(),
            schema_key,
            schema_version,
            user_id,
            enriched,
            now,
        );
        self.store.insert(application.clone()).await?;
        tracing::info!(
            submission_id = %application.id,
            application_type = %application.application_type,
            schema_version = %application.schema_version,
            "application accepted"
        );

        match self.publish_submitted(&application).await {
            Ok(()) => self.mark_published(&mut application).await?,
            Err(err) => {
                // The record is durable; the intent replays via
                // republish_pending. Duplicates downstream are benign.
                tracing::warn!(
                    submission_id = %application.id,
                    error = %err,
                    "publish failed after persist; application left unpublished"
                );
            },
        }
        Ok(application)
    }

    /// Replay the `ApplicationSubmitted` intent for every application whose
    /// first publish never reached the bus. Returns how many were replayed.
    ///
    /// # Errors
    ///
    /// Stops at the first store or bus failure; already-replayed
    /// applications stay marked published.
    pub async fn republish_pending(&self) -> Result<usize, SubmissionError> {
        let pending = self.store.find_unpublished().await?;
        let mut replayed = 0;
        for mut application in pending {
            self.publish_submitted(&application).await?;
            self.mark_published(&mut application).await?;
            tracing::info!(submission_id = %application.id, "replayed ApplicationSubmitted");
            replayed += 1;
        }
        Ok(replayed)
    }

    /// Soft-cancel an application. The record is kept with status
    /// `Cancelled`; nothing is deleted.
    ///
    /// # Errors
    ///
    /// - [`SubmissionError::NotFound`] if no such application exists
    /// - [`SubmissionError::NotOwner`] if `user_id` did not submit it
    /// - [`SubmissionError::InvalidState`] if it already reached a terminal
    ///   status
    pub async fn cancel(
        &self,
        user_id: UserId,
        submission_id: SubmissionId,
    ) -> Result<Application, SubmissionError> {
        let mut application = self
            .store
            .find(submission_id)
            .await?
            .ok_or(SubmissionError::NotFound(submission_id))?;
        if application.submitted_by != user_id {
            return Err(SubmissionError::NotOwner {
                submission_id,
                user_id,
            });
        }
        let expected = application.version;
        if !application.transition_to(ApplicationStatus::Cancelled, self.clock.now()) {
            return Err(SubmissionError::InvalidState {
                submission_id,
                status: application.status,
            });
        }
        self.store.update(application.clone(), expected).await?;
        tracing::info!(submission_id = %submission_id, "application cancelled");
        Ok(application)
    }

    async fn publish_submitted(&self, application: &Application) -> Result<(), EventBusError> {
        let event = LifecycleEvent::ApplicationSubmitted {
            application_type: application.application_type.as_str().to_string(),
            schema_version: application.schema_version.get(),
            submitted_at: application.submitted_at,
        };
        let envelope = EventEnvelope::new(
            application.id,
            application.submitted_by,
            application.submitted_at,
            event,
        );
        self.bus.publish(LIFECYCLE_TOPIC, &envelope).await
    }

    async fn mark_published(&self, application: &mut Application) -> Result<(), StoreError> {
        let expected = application.version;
        application.published = true;
        application.version += 1;
        self.store.update(application.clone(), expected).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use agrisure_submission::{
        ApplicationStatus, ApplicationStore, SubmissionError, SubmissionProcessor,
    };
    use agrisure_testing::{
        fixtures, test_clock, InMemoryApplicationStore, InMemoryBlobStore, InMemoryEventBus,
    };
    use serde_json::json;

    struct Harness {
        processor: SubmissionProcessor,
        store: Arc<InMemoryApplicationStore>,
        bus: Arc<InMemoryEventBus>,
        blobs: Arc<InMemoryBlobStore>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(SchemaRegistry::new());
        registry
            .register(fixtures::crop_insurance_schema())
            .unwrap();
        let store = Arc::new(InMemoryApplicationStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let processor = SubmissionProcessor::new(
            registry,
            Arc::clone(&store) as Arc<dyn ApplicationStore>,
            Arc::clone(&bus) as Arc<dyn EventBus>,
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            test_clock(),
        );
        Harness {
            processor,
            store,
            bus,
            blobs,
        }
    }

    #[tokio::test]
    async fn valid_submission_persists_then_publishes_exactly_one_event() {
        let h = harness();
        let application = h
            .processor
            .submit(
                UserId::random(),
                fixtures::CROP_INSURANCE.into(),
                fixtures::valid_crop_document(),
                fixtures::crop_upload(),
            )
            .await
            .unwrap();

        assert_eq!(application.status, ApplicationStatus::Submitted);
        assert!(application.published);
        assert_eq!(application.schema_version, agrisure_schema::SchemaVersion::INITIAL);

        let published = h.bus.published(LIFECYCLE_TOPIC);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].submission_id, application.id);
        assert_eq!(published[0].event.event_type(), "ApplicationSubmitted");
    }

    #[tokio::test]
    async fn invalid_submission_leaves_no_trace() {
        let h = harness();
        let mut document = fixtures::valid_crop_document();
        document.insert("area_ha".into(), json!("not a number"));
        document.remove("farmer_name");

        let err = h
            .processor
            .submit(
                UserId::random(),
                fixtures::CROP_INSURANCE.into(),
                document,
                fixtures::crop_upload(),
            )
            .await
            .unwrap_err();

        match err {
            SubmissionError::Rejected(errors) => assert_eq!(errors.len(), 2),
            other => panic!("expected Rejected, got {other}"),
        }
        assert!(h.store.is_empty());
        assert!(h.bus.published(LIFECYCLE_TOPIC).is_empty());
        assert_eq!(h.blobs.len(), 0);
    }

    #[tokio::test]
    async fn file_field_is_rewritten_to_a_storage_reference() {
        let h = harness();
        let application = h
            .processor
            .submit(
                UserId::random(),
                fixtures::CROP_INSURANCE.into(),
                fixtures::valid_crop_document(),
                fixtures::crop_upload(),
            )
            .await
            .unwrap();

        let stored = application.dynamic_fields.get("land_title").unwrap();
        let reference = stored.as_str().unwrap();
        assert_ne!(reference, "land-title.pdf");
        assert!(reference.ends_with("land_title_pdf"));
        assert_eq!(h.blobs.len(), 1);
    }

    #[tokio::test]
    async fn failed_publish_leaves_application_unpublished_and_replayable() {
        let h = harness();
        h.bus.fail_publishes(true);
        let application = h
            .processor
            .submit(
                UserId::random(),
                fixtures::CROP_INSURANCE.into(),
                fixtures::valid_crop_document(),
                fixtures::crop_upload(),
            )
            .await
            .unwrap();
        assert!(!application.published);
        assert!(h.bus.published(LIFECYCLE_TOPIC).is_empty());

        h.bus.fail_publishes(false);
        let replayed = h.processor.republish_pending().await.unwrap();
        assert_eq!(replayed, 1);
        assert_eq!(h.bus.published(LIFECYCLE_TOPIC).len(), 1);

        // Nothing pending on a second sweep.
        assert_eq!(h.processor.republish_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cancel_is_soft_owner_only_and_terminal() {
        let h = harness();
        let owner = UserId::random();
        let application = h
            .processor
            .submit(
                owner,
                fixtures::CROP_INSURANCE.into(),
                fixtures::valid_crop_document(),
                fixtures::crop_upload(),
            )
            .await
            .unwrap();

        let stranger = UserId::random();
        let err = h.processor.cancel(stranger, application.id).await.unwrap_err();
        assert!(matches!(err, SubmissionError::NotOwner { .. }));

        let cancelled = h.processor.cancel(owner, application.id).await.unwrap();
        assert_eq!(cancelled.status, ApplicationStatus::Cancelled);

        // Second cancel hits the terminal state, record still present.
        let err = h.processor.cancel(owner, application.id).await.unwrap_err();
        assert!(matches!(err, SubmissionError::InvalidState { .. }));
        assert!(h.store.find_sync(application.id).is_some());
    }
}
