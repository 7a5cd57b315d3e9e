//! Blob-store boundary for uploaded attachments.
//!
//! The FILE validator's side effect lives behind this boundary: given the
//! logical filename a submission references and the set of uploaded
//! attachments, locate the matching attachment, generate a collision-resistant
//! storage key, write the bytes, and hand back a reference string. Retrieval,
//! deletion, and URL generation belong to the external document service.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised at the blob-store boundary.
#[derive(Error, Debug, Clone)]
pub enum BlobStoreError {
    /// The store rejected or failed the write.
    #[error("blob store write failed for '{key}': {reason}")]
    WriteFailed {
        /// Storage key of the failed write.
        key: String,
        /// The reason for failure.
        reason: String,
    },

    /// The store is unreachable.
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

/// Reference string usable later for retrieval through the document service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef(String);

impl StorageRef {
    /// Wrap a reference produced by a blob store.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One uploaded binary attachment accompanying a submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// Original filename as uploaded by the client.
    pub file_name: String,
    /// Raw content.
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Create an attachment.
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }
}

/// The set of attachments uploaded alongside one submission.
#[derive(Clone, Debug, Default)]
pub struct Upload {
    attachments: Vec<Attachment>,
}

impl Upload {
    /// An upload with no attachments.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            attachments: Vec::new(),
        }
    }

    /// Build from a list of attachments.
    #[must_use]
    pub fn new(attachments: Vec<Attachment>) -> Self {
        Self { attachments }
    }

    /// Find an attachment by its original filename.
    #[must_use]
    pub fn find(&self, file_name: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.file_name == file_name)
    }
}

/// Durable storage for uploaded blobs.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the dispatcher can hold
/// `Arc<dyn BlobStore>`.
pub trait BlobStore: Send + Sync {
    /// Write `bytes` under `key` and return the retrieval reference.
    ///
    /// # Errors
    ///
    /// Returns [`BlobStoreError::WriteFailed`] or
    /// [`BlobStoreError::Unavailable`] on storage failure; the submission is
    /// then not accepted (the pure validation pass has already succeeded, so
    /// the caller surfaces this as an infrastructure error, not a field
    /// error).
    fn put(
        &self,
        key: String,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<StorageRef, BlobStoreError>> + Send + '_>>;
}

/// Collision-resistant storage key: random prefix plus the sanitized
/// original name.
#[must_use]
pub fn storage_key(original_file_name: &str) -> String {
    format!("{}-{}", Uuid::new_v4(), sanitize_file_name(original_file_name))
}

/// Strip anything that could act as a path or shell character.
#[must_use]
pub fn sanitize_file_name(original: &str) -> String {
    original
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
