//! In-memory compare-and-swap stores and blob storage.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use agrisure_core::ids::SubmissionId;
use agrisure_core::store::{RecordStore, StageRecord, StoreError};
use agrisure_schema::{BlobStore, BlobStoreError, StorageRef};
use agrisure_submission::{Application, ApplicationStore};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// `HashMap`-backed [`RecordStore`] honoring the full compare-and-swap
/// contract, including [`StoreError::VersionConflict`] on stale writes.
///
/// [`set_unavailable`](Self::set_unavailable) switches every operation to
/// [`StoreError::Unavailable`], for exercising the retry path.
pub struct InMemoryRecordStore<R: StageRecord> {
    records: Mutex<HashMap<SubmissionId, R>>,
    unavailable: AtomicBool,
}

impl<R: StageRecord> InMemoryRecordStore<R> {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Toggle outage mode.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Synchronous lookup for assertions.
    #[must_use]
    pub fn find_sync(&self, submission_id: SubmissionId) -> Option<R> {
        self.records.lock().unwrap().get(&submission_id).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Whether no record has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

impl<R: StageRecord> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: StageRecord> RecordStore<R> for InMemoryRecordStore<R> {
    fn find(
        &self,
        submission_id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<R>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            Ok(self.records.lock().unwrap().get(&submission_id).cloned())
        })
    }

    fn insert(
        &self,
        record: R,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut records = self.records.lock().unwrap();
            let id = record.submission_id();
            if records.contains_key(&id) {
                return Err(StoreError::AlreadyExists(id));
            }
            records.insert(id, record);
            Ok(())
        })
    }

    fn update(
        &self,
        record: R,
        expected_version: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.check_available()?;
            let mut records = self.records.lock().unwrap();
            let id = record.submission_id();
            let Some(current) = records.get(&id) else {
                return Err(StoreError::NotFound(id));
            };
            if current.version() != expected_version {
                return Err(StoreError::VersionConflict {
                    submission_id: id,
                    expected: expected_version,
                    actual: current.version(),
                });
            }
            records.insert(id, record);
            Ok(())
        })
    }
}

/// [`InMemoryRecordStore`] over [`Application`] plus the unpublished-intent
/// query the submission gate needs.
#[derive(Default)]
pub struct InMemoryApplicationStore {
    inner: InMemoryRecordStore<Application>,
}

impl InMemoryApplicationStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle outage mode.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.set_unavailable(unavailable);
    }

    /// Synchronous lookup for assertions.
    #[must_use]
    pub fn find_sync(&self, submission_id: SubmissionId) -> Option<Application> {
        self.inner.find_sync(submission_id)
    }

    /// Number of stored applications.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no application has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl RecordStore<Application> for InMemoryApplicationStore {
    fn find(
        &self,
        submission_id: SubmissionId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Application>, StoreError>> + Send + '_>> {
        self.inner.find(submission_id)
    }

    fn insert(
        &self,
        record: Application,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        self.inner.insert(record)
    }

    fn update(
        &self,
        record: Application,
        expected_version: u64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        self.inner.update(record, expected_version)
    }
}

impl ApplicationStore for InMemoryApplicationStore {
    fn find_unpublished(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Application>, StoreError>> + Send + '_>> {
        Box::pin(async move {
            self.inner.check_available()?;
            let records = self.inner.records.lock().unwrap();
            Ok(records
                .values()
                .filter(|app| !app.published)
                .cloned()
                .collect())
        })
    }
}

/// In-memory blob store: storage key to bytes.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Create a new empty blob store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a blob was stored under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    /// Whether no blob has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.lock().unwrap().is_empty()
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(
        &self,
        key: String,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<StorageRef, BlobStoreError>> + Send + '_>> {
        Box::pin(async move {
            self.blobs.lock().unwrap().insert(key.clone(), bytes);
            Ok(StorageRef::new(key))
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use agrisure_core::ids::UserId;
    use agrisure_schema::{SchemaKey, SchemaVersion};
    use chrono::Utc;
    use serde_json::Map;

    fn application() -> Application {
        Application::new(
            SubmissionId::random(),
            SchemaKey::from("crop-insurance"),
            SchemaVersion::INITIAL,
            UserId::random(),
            Map::new(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn stale_update_reports_both_versions() {
        let store = InMemoryRecordStore::new();
        let mut app = application();
        store.insert(app.clone()).await.unwrap();

        app.bump_version();
        store.update(app.clone(), 1).await.unwrap();

        // A writer that still holds version 1 must conflict.
        let err = store.update(app.clone(), 1).await.unwrap_err();
        match err {
            StoreError::VersionConflict {
                expected, actual, ..
            } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            },
            other => panic!("expected VersionConflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn duplicate_insert_is_already_exists() {
        let store = InMemoryRecordStore::new();
        let app = application();
        store.insert(app.clone()).await.unwrap();
        let err = store.insert(app).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn unpublished_query_only_returns_unpublished() {
        let store = InMemoryApplicationStore::new();
        let unpublished = application();
        let mut published = application();
        published.published = true;
        store.insert(unpublished.clone()).await.unwrap();
        store.insert(published).await.unwrap();

        let pending = store.find_unpublished().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, unpublished.id);
    }
}
