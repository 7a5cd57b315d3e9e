//! Field validators and the validation dispatcher.
//!
//! One validator per [`FieldType`], selected by a match over the type tag.
//! The match is exhaustive, so a field type without a validator cannot
//! compile, so the `DatatypeNotSupported` class of failure is confined to
//! schema registration, where unknown type *names* are rejected.
//!
//! The dispatcher walks every field of every section and accumulates every
//! violation before returning. Nothing fails fast: a submitter sees the full
//! list of problems in one pass.

use crate::blob::{storage_key, BlobStore, BlobStoreError, Upload};
use crate::field::{ApplicationField, ApplicationType, FieldType};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// A single user-correctable violation, addressed by field key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Key of the violating field.
    pub field_key: String,
    /// Human-readable message.
    pub message: String,
}

impl FieldError {
    fn new(field: &ApplicationField, message: impl Into<String>) -> Self {
        Self {
            field_key: field.key.clone(),
            message: message.into(),
        }
    }
}

/// Errors from the enriching validation pass.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The submission violated the schema; no side effect was performed.
    #[error("submission failed validation with {} error(s)", .0.len())]
    Invalid(Vec<FieldError>),

    /// Relocating an uploaded file failed. The pure pass had already
    /// succeeded, so this is infrastructure trouble, not user error.
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
}

/// Validation dispatcher: schema in, accumulated errors (or the enriched
/// document) out.
///
/// # Example
///
/// ```
/// use agrisure_schema::{
///     ApplicationField, ApplicationSection, ApplicationType, FieldType, SchemaKey, Upload,
///     ValidationDispatcher,
/// };
/// use serde_json::json;
///
/// let schema = ApplicationType::new(
///     SchemaKey::from("demo"),
///     "Demo", "", "single-page",
///     vec![ApplicationSection::new(
///         "Main",
///         vec![ApplicationField::new("area_ha", "Area", FieldType::Number, true)],
///     )],
/// )
/// .unwrap();
///
/// let doc = json!({ "area_ha": "not a number" });
/// let errors = ValidationDispatcher::validate(
///     &schema,
///     doc.as_object().unwrap(),
///     &Upload::empty(),
/// );
/// assert_eq!(errors.len(), 1);
/// assert_eq!(errors[0].field_key, "area_ha");
/// ```
pub struct ValidationDispatcher;

impl ValidationDispatcher {
    /// Pure validation pass: every violation across all sections, in schema
    /// order. Required-absent fields produce exactly one error each without
    /// invoking the validator; absent optional fields are skipped.
    #[must_use]
    pub fn validate(
        schema: &ApplicationType,
        document: &Map<String, Value>,
        attachments: &Upload,
    ) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for field in schema.fields() {
            match document.get(&field.key) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(FieldError::new(
                            field,
                            format!("Field '{}' is required", field.field_name),
                        ));
                    }
                },
                Some(value) => {
                    errors.extend(validate_value(field, value, attachments));
                },
            }
        }
        errors
    }

    /// Validating pass plus the FILE side effect: on a fully valid
    /// submission, relocate every referenced attachment into `blob` and
    /// rewrite the field values to storage references.
    ///
    /// The side effect only runs once the pure pass has produced zero
    /// errors: either the submission is fully valid and has full effect, or
    /// it is invalid and has none.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Invalid`] with the accumulated field errors
    /// - [`DispatchError::Blob`] if a blob write fails
    pub async fn validate_and_store(
        schema: &ApplicationType,
        document: &Map<String, Value>,
        attachments: &Upload,
        blob: &dyn BlobStore,
    ) -> Result<Map<String, Value>, DispatchError> {
        let errors = Self::validate(schema, document, attachments);
        if !errors.is_empty() {
            return Err(DispatchError::Invalid(errors));
        }

        let mut enriched = document.clone();
        for field in schema.fields() {
            if field.field_type != FieldType::File {
                continue;
            }
            let Some(Value::String(file_name)) = document.get(&field.key) else {
                continue; // absent optional FILE field
            };
            // The pure pass guaranteed the attachment exists.
            let Some(attachment) = attachments.find(file_name) else {
                continue;
            };
            let key = storage_key(file_name);
            let reference = blob.put(key, attachment.bytes.clone()).await?;
            tracing::debug!(
                field = %field.key,
                reference = %reference,
                "stored uploaded file"
            );
            enriched.insert(
                field.key.clone(),
                Value::String(reference.as_str().to_string()),
            );
        }
        Ok(enriched)
    }
}

/// Dispatch on the type tag. Exhaustive: a new [`FieldType`] variant will not
/// compile until it gets an arm here.
fn validate_value(
    field: &ApplicationField,
    value: &Value,
    attachments: &Upload,
) -> Vec<FieldError> {
    match field.field_type {
        FieldType::Text => validate_text(field, value),
        FieldType::Number => validate_number(field, value),
        FieldType::Boolean => validate_boolean(field, value),
        FieldType::Date => validate_date(field, value),
        FieldType::Select => validate_select(field, value),
        FieldType::MultiSelect => validate_multi_select(field, value),
        FieldType::File => validate_file(field, value, attachments),
        FieldType::Signature => validate_signature(field, value),
        FieldType::Location => validate_location(field, value),
        FieldType::Json => validate_json(field, value),
    }
}

fn validate_text(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    if value.is_string() {
        Vec::new()
    } else {
        vec![FieldError::new(
            field,
            format!("Field '{}' must be a text value (TEXT)", field.field_name),
        )]
    }
}

fn validate_number(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    if value.is_number() {
        Vec::new()
    } else {
        vec![FieldError::new(
            field,
            format!("Field '{}' must be a number value (NUMBER)", field.field_name),
        )]
    }
}

fn validate_boolean(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    if value.is_boolean() {
        Vec::new()
    } else {
        vec![FieldError::new(
            field,
            format!("Field '{}' must be a boolean value (BOOLEAN)", field.field_name),
        )]
    }
}

fn validate_date(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    let ok = value.as_str().is_some_and(|s| {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
    });
    if ok {
        Vec::new()
    } else {
        vec![FieldError::new(
            field,
            format!(
                "Field '{}' must be an ISO date such as 2025-06-01 (DATE)",
                field.field_name
            ),
        )]
    }
}

fn validate_select(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    let Some(submitted) = value.as_str() else {
        return vec![FieldError::new(
            field,
            format!("Field '{}' must be a text value (SELECT)", field.field_name),
        )];
    };
    let Some(choices) = field.choices.as_deref() else {
        // Schema invariants forbid this, but a hand-built field may bypass
        // the constructor.
        return vec![FieldError::new(
            field,
            format!("Field '{}' has no choice list (SELECT)", field.field_name),
        )];
    };
    if choices.iter().any(|c| c.eq_ignore_ascii_case(submitted)) {
        Vec::new()
    } else {
        vec![FieldError::new(
            field,
            format!(
                "Invalid value '{submitted}' for field '{}'. Allowed: {choices:?}",
                field.field_name
            ),
        )]
    }
}

fn validate_multi_select(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    let Some(items) = value.as_array() else {
        return vec![FieldError::new(
            field,
            format!(
                "Field '{}' must be an array of text values (MULTI_SELECT)",
                field.field_name
            ),
        )];
    };
    let choices = field.choices.as_deref().unwrap_or_default();
    let mut errors = Vec::new();
    for item in items {
        match item.as_str() {
            Some(s) if choices.iter().any(|c| c.eq_ignore_ascii_case(s)) => {},
            Some(s) => errors.push(FieldError::new(
                field,
                format!(
                    "Invalid value '{s}' for field '{}'. Allowed: {choices:?}",
                    field.field_name
                ),
            )),
            None => errors.push(FieldError::new(
                field,
                format!(
                    "Field '{}' must contain only text values (MULTI_SELECT)",
                    field.field_name
                ),
            )),
        }
    }
    errors
}

fn validate_file(
    field: &ApplicationField,
    value: &Value,
    attachments: &Upload,
) -> Vec<FieldError> {
    let Some(file_name) = value.as_str() else {
        return vec![FieldError::new(
            field,
            format!("Field '{}' must be a file name (FILE)", field.field_name),
        )];
    };
    let file_name = file_name.trim();
    if file_name.is_empty() {
        return vec![FieldError::new(
            field,
            format!("Field '{}' cannot be empty (FILE)", field.field_name),
        )];
    }
    if attachments.find(file_name).is_none() {
        return vec![FieldError::new(
            field,
            format!("Could not find uploaded file '{file_name}'"),
        )];
    }
    Vec::new()
}

const SIGNATURE_PREFIX: &str = "signature:";

fn validate_signature(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    let Some(text) = value.as_str() else {
        return vec![FieldError::new(
            field,
            format!(
                "Signature field '{}' must be a text value with format 'signature:<UUID>'",
                field.field_name
            ),
        )];
    };
    let Some(id) = text.strip_prefix(SIGNATURE_PREFIX) else {
        return vec![FieldError::new(
            field,
            format!(
                "Signature field '{}' must start with '{SIGNATURE_PREFIX}'",
                field.field_name
            ),
        )];
    };
    if Uuid::parse_str(id).is_err() {
        return vec![FieldError::new(
            field,
            format!("'{id}' is not a valid UUID format for signature document"),
        )];
    }
    Vec::new()
}

fn validate_location(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    let coords = value.as_object().and_then(|o| {
        Some((o.get("lat")?.as_f64()?, o.get("lng")?.as_f64()?))
    });
    match coords {
        Some((lat, lng))
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
        {
            Vec::new()
        },
        _ => vec![FieldError::new(
            field,
            format!(
                "Field '{}' must be an object with numeric 'lat' and 'lng' (LOCATION)",
                field.field_name
            ),
        )],
    }
}

fn validate_json(field: &ApplicationField, value: &Value) -> Vec<FieldError> {
    if value.is_object() {
        Vec::new()
    } else {
        vec![FieldError::new(
            field,
            format!("Field '{}' must be a JSON object (JSON)", field.field_name),
        )]
    }
}
