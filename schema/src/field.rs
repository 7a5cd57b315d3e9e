//! Schema model: application types, sections, and fields.
//!
//! An [`ApplicationType`] is an ordered list of sections, each an ordered list
//! of fields. The field `key` is the stable machine name used to look values
//! up in submitted JSON; it must be unique across every section of one
//! application type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::registry::SchemaError;

/// Stable machine name of an application type (e.g. `"rice-crop-insurance"`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaKey(String);

impl SchemaKey {
    /// Create a new schema key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SchemaKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of supported field types.
///
/// Field type names are part of the wire contract between schema authors and
/// the validation dispatcher. Adding a new type means adding a variant here
/// and a validator in [`crate::validate`]; the dispatch match will not
/// compile without one, so registration completeness is a compile-time
/// invariant rather than a runtime surprise.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    /// Free text.
    Text,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// ISO-8601 calendar date or timestamp.
    Date,
    /// One value out of the field's choice list.
    Select,
    /// Several values out of the field's choice list.
    MultiSelect,
    /// Name of an uploaded attachment, rewritten to a storage reference.
    File,
    /// A `signature:<uuid>` document reference.
    Signature,
    /// A `{lat, lng}` coordinate pair.
    Location,
    /// An arbitrary JSON object.
    Json,
}

impl FieldType {
    /// Every supported field type, for completeness checks.
    pub const ALL: [Self; 10] = [
        Self::Text,
        Self::Number,
        Self::Boolean,
        Self::Date,
        Self::Select,
        Self::MultiSelect,
        Self::File,
        Self::Signature,
        Self::Location,
        Self::Json,
    ];

    /// The wire name of this type (`"MULTI_SELECT"` etc.).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Number => "NUMBER",
            Self::Boolean => "BOOLEAN",
            Self::Date => "DATE",
            Self::Select => "SELECT",
            Self::MultiSelect => "MULTI_SELECT",
            Self::File => "FILE",
            Self::Signature => "SIGNATURE",
            Self::Location => "LOCATION",
            Self::Json => "JSON",
        }
    }

    /// Whether this type requires a choice list on the field.
    #[must_use]
    pub const fn needs_choices(&self) -> bool {
        matches!(self, Self::Select | Self::MultiSelect)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == s)
            .ok_or_else(|| SchemaError::UnsupportedFieldType(s.to_string()))
    }
}

/// One field of an application schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationField {
    /// Stable machine name, the lookup key in submitted JSON.
    pub key: String,
    /// Display name shown to the submitter.
    pub field_name: String,
    /// Validation behavior of this field.
    pub field_type: FieldType,
    /// Whether the field must be present in a submission.
    pub required: bool,
    /// Ordered allowed values for SELECT / MULTI_SELECT.
    pub choices: Option<Vec<String>>,
}

impl ApplicationField {
    /// Convenience constructor for a field without choices.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        field_name: impl Into<String>,
        field_type: FieldType,
        required: bool,
    ) -> Self {
        Self {
            key: key.into(),
            field_name: field_name.into(),
            field_type,
            required,
            choices: None,
        }
    }

    /// Attach a choice list (SELECT / MULTI_SELECT).
    #[must_use]
    pub fn with_choices(mut self, choices: Vec<String>) -> Self {
        self.choices = Some(choices);
        self
    }
}

/// An ordered group of fields under one heading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSection {
    /// Section heading.
    pub title: String,
    /// Ordered fields of the section.
    pub fields: Vec<ApplicationField>,
}

impl ApplicationSection {
    /// Create a section.
    #[must_use]
    pub fn new(title: impl Into<String>, fields: Vec<ApplicationField>) -> Self {
        Self {
            title: title.into(),
            fields,
        }
    }
}

/// A complete application schema: ordered sections of ordered fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplicationType {
    /// Stable machine name of this schema.
    pub key: SchemaKey,
    /// Display name.
    pub name: String,
    /// Free-form description for schema authors.
    pub description: String,
    /// Layout hint for renderers (e.g. `"wizard"`, `"single-page"`).
    pub layout: String,
    /// Ordered sections.
    pub sections: Vec<ApplicationSection>,
}

impl ApplicationType {
    /// Build a schema, validating its invariants.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::DuplicateFieldKey`] if a field key repeats across any
    ///   sections
    /// - [`SchemaError::MissingChoices`] if a SELECT / MULTI_SELECT field has
    ///   no (or an empty) choice list
    pub fn new(
        key: SchemaKey,
        name: impl Into<String>,
        description: impl Into<String>,
        layout: impl Into<String>,
        sections: Vec<ApplicationSection>,
    ) -> Result<Self, SchemaError> {
        let schema = Self {
            key,
            name: name.into(),
            description: description.into(),
            layout: layout.into(),
            sections,
        };
        schema.check_invariants()?;
        Ok(schema)
    }

    /// Iterate every field across all sections, in section order.
    pub fn fields(&self) -> impl Iterator<Item = &ApplicationField> {
        self.sections.iter().flat_map(|s| s.fields.iter())
    }

    fn check_invariants(&self) -> Result<(), SchemaError> {
        let mut seen = std::collections::HashSet::new();
        for field in self.fields() {
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateFieldKey {
                    schema: self.key.clone(),
                    field_key: field.key.clone(),
                });
            }
            if field.field_type.needs_choices()
                && field.choices.as_ref().is_none_or(Vec::is_empty)
            {
                return Err(SchemaError::MissingChoices {
                    schema: self.key.clone(),
                    field_key: field.key.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn field_type_name_roundtrip() {
        for ft in FieldType::ALL {
            assert_eq!(ft.name().parse::<FieldType>().unwrap(), ft);
        }
    }

    #[test]
    fn unknown_field_type_is_rejected() {
        assert!(matches!(
            "BARCODE".parse::<FieldType>(),
            Err(SchemaError::UnsupportedFieldType(_))
        ));
    }

    #[test]
    fn duplicate_key_across_sections_is_rejected() {
        let result = ApplicationType::new(
            SchemaKey::from("demo"),
            "Demo",
            "",
            "single-page",
            vec![
                ApplicationSection::new(
                    "A",
                    vec![ApplicationField::new("crop", "Crop", FieldType::Text, true)],
                ),
                ApplicationSection::new(
                    "B",
                    vec![ApplicationField::new("crop", "Crop again", FieldType::Text, false)],
                ),
            ],
        );
        assert!(matches!(result, Err(SchemaError::DuplicateFieldKey { .. })));
    }

    #[test]
    fn select_without_choices_is_rejected() {
        let result = ApplicationType::new(
            SchemaKey::from("demo"),
            "Demo",
            "",
            "single-page",
            vec![ApplicationSection::new(
                "A",
                vec![ApplicationField::new("season", "Season", FieldType::Select, true)],
            )],
        );
        assert!(matches!(result, Err(SchemaError::MissingChoices { .. })));
    }
}
