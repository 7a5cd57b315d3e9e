//! Versioned schema registry.
//!
//! Registering a schema under an existing key creates a new, monotonically
//! increasing version; it never mutates one in place. Submissions are
//! validated against, and pinned to, the version current at submission time,
//! so an in-flight application's validation rules can never change under it.

use crate::field::{ApplicationType, SchemaKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors raised by schema registration and lookup.
#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    /// A schema referenced a field type with no registered validator.
    /// Configuration defect, fatal at registration time, never swallowed.
    #[error("unsupported field type: {0}")]
    UnsupportedFieldType(String),

    /// A field key repeats across the sections of one schema.
    #[error("duplicate field key '{field_key}' in schema '{schema}'")]
    DuplicateFieldKey {
        /// The schema carrying the duplicate.
        schema: SchemaKey,
        /// The repeated key.
        field_key: String,
    },

    /// A SELECT / MULTI_SELECT field has no choice list.
    #[error("field '{field_key}' in schema '{schema}' needs a choice list")]
    MissingChoices {
        /// The schema carrying the field.
        schema: SchemaKey,
        /// The offending field key.
        field_key: String,
    },

    /// No schema registered under the key.
    #[error("unknown application type: {0}")]
    UnknownType(SchemaKey),

    /// The requested version was never registered.
    #[error("schema '{schema}' has no version {version}")]
    UnknownVersion {
        /// The schema that was looked up.
        schema: SchemaKey,
        /// The missing version.
        version: SchemaVersion,
    },
}

/// Monotonically increasing version of a registered schema, starting at 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SchemaVersion(u32);

impl SchemaVersion {
    /// First version of any schema.
    pub const INITIAL: Self = Self(1);

    /// The raw version number.
    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for SchemaVersion {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// In-memory registry of application schemas, versioned per key.
///
/// # Example
///
/// ```
/// use agrisure_schema::{ApplicationField, ApplicationSection, ApplicationType};
/// use agrisure_schema::{FieldType, SchemaKey, SchemaRegistry, SchemaVersion};
///
/// let registry = SchemaRegistry::new();
/// let schema = ApplicationType::new(
///     SchemaKey::from("rice"),
///     "Rice Crop Insurance",
///     "",
///     "wizard",
///     vec![ApplicationSection::new(
///         "Farm",
///         vec![ApplicationField::new("area_ha", "Area (ha)", FieldType::Number, true)],
///     )],
/// )
/// .unwrap();
///
/// let version = registry.register(schema).unwrap();
/// assert_eq!(version, SchemaVersion::INITIAL);
/// ```
#[derive(Default)]
pub struct SchemaRegistry {
    // key -> all versions, index i holds version i+1
    schemas: RwLock<HashMap<SchemaKey, Vec<Arc<ApplicationType>>>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, returning the version it was pinned at.
    ///
    /// Re-registering a key appends a new version; earlier versions stay
    /// readable so in-flight submissions keep their validation rules.
    ///
    /// # Errors
    ///
    /// Propagates the invariant failures of [`ApplicationType::new`] when the
    /// schema arrives pre-built from an untrusted source (the invariants are
    /// re-checked here).
    pub fn register(&self, schema: ApplicationType) -> Result<SchemaVersion, SchemaError> {
        // Re-run invariants: schemas may be deserialized rather than built
        // through the validating constructor.
        let schema = ApplicationType::new(
            schema.key.clone(),
            schema.name.clone(),
            schema.description.clone(),
            schema.layout.clone(),
            schema.sections,
        )?;

        let key = schema.key.clone();
        #[allow(clippy::expect_used)] // lock poisoning is unrecoverable
        let mut schemas = self.schemas.write().expect("schema registry lock poisoned");
        let versions = schemas.entry(key.clone()).or_default();
        versions.push(Arc::new(schema));
        let version = SchemaVersion(u32::try_from(versions.len()).unwrap_or(u32::MAX));

        tracing::info!(schema = %key, %version, "registered application schema");
        Ok(version)
    }

    /// The latest version of a schema, with its version number.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::UnknownType`] if the key was never registered.
    pub fn latest(
        &self,
        key: &SchemaKey,
    ) -> Result<(SchemaVersion, Arc<ApplicationType>), SchemaError> {
        #[allow(clippy::expect_used)] // lock poisoning is unrecoverable
        let schemas = self.schemas.read().expect("schema registry lock poisoned");
        let versions = schemas
            .get(key)
            .ok_or_else(|| SchemaError::UnknownType(key.clone()))?;
        let version = SchemaVersion(u32::try_from(versions.len()).unwrap_or(u32::MAX));
        let schema = versions
            .last()
            .cloned()
            .ok_or_else(|| SchemaError::UnknownType(key.clone()))?;
        Ok((version, schema))
    }

    /// A specific pinned version of a schema.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::UnknownType`] if the key was never registered
    /// - [`SchemaError::UnknownVersion`] if the version does not exist
    pub fn at(
        &self,
        key: &SchemaKey,
        version: SchemaVersion,
    ) -> Result<Arc<ApplicationType>, SchemaError> {
        #[allow(clippy::expect_used)] // lock poisoning is unrecoverable
        let schemas = self.schemas.read().expect("schema registry lock poisoned");
        let versions = schemas
            .get(key)
            .ok_or_else(|| SchemaError::UnknownType(key.clone()))?;
        let index = version.get().checked_sub(1).map(|i| i as usize);
        index
            .and_then(|i| versions.get(i))
            .cloned()
            .ok_or(SchemaError::UnknownVersion {
                schema: key.clone(),
                version,
            })
    }
}
