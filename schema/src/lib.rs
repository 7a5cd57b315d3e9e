//! # Agrisure Schema
//!
//! Dynamic application-schema and field-validation engine.
//!
//! An application's shape (sections, fields, types, required-ness, choice
//! lists) is defined at runtime rather than compiled in. This crate holds:
//!
//! - [`field`]: the closed set of field types and the schema model
//!   (`ApplicationType` → `ApplicationSection` → `ApplicationField`)
//! - [`registry`]: the versioned schema registry; submissions are validated
//!   against, and pinned to, the schema version current at submission time
//! - [`validate`]: one validator per field type plus the dispatcher that
//!   accumulates every violation across all sections in one pass
//! - [`blob`]: the blob-store boundary used by the FILE validator to relocate
//!   uploaded attachments into durable storage
//!
//! ## Validation contract
//!
//! `validate(field, value) -> Vec<FieldError>`. Validators are pure except the
//! FILE path, which moves an uploaded blob into durable storage and rewrites
//! the field value to a storage reference, the only validator permitted to
//! perform I/O. A required field absent from the payload produces exactly one
//! error without invoking the validator; an absent optional field is skipped
//! entirely. All errors for all fields are collected before returning, so a
//! submitter sees every violation at once.

pub mod blob;
pub mod field;
pub mod registry;
pub mod validate;

pub use blob::{Attachment, BlobStore, BlobStoreError, StorageRef, Upload};
pub use field::{ApplicationField, ApplicationSection, ApplicationType, FieldType, SchemaKey};
pub use registry::{SchemaError, SchemaRegistry, SchemaVersion};
pub use validate::{DispatchError, FieldError, ValidationDispatcher};
