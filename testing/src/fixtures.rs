//! Realistic schema and document fixtures for pipeline tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use agrisure_schema::{
    ApplicationField, ApplicationSection, ApplicationType, Attachment, FieldType, SchemaKey,
    Upload,
};
use serde_json::{json, Map, Value};

/// Schema key of the fixture application type.
pub const CROP_INSURANCE: &str = "crop-insurance";

/// File name referenced by the fixture document's FILE field.
pub const LAND_TITLE_FILE: &str = "land-title.pdf";

/// A crop-insurance application type exercising every common field shape:
/// TEXT, NUMBER, DATE, SELECT, MULTI_SELECT, LOCATION, FILE, SIGNATURE and
/// an optional JSON field.
#[must_use]
pub fn crop_insurance_schema() -> ApplicationType {
    ApplicationType::new(
        SchemaKey::from(CROP_INSURANCE),
        "Crop Insurance Application",
        "Coverage application for rice and corn growers",
        "multi-section",
        vec![
            ApplicationSection::new(
                "Farmer",
                vec![
                    ApplicationField::new("farmer_name", "Farmer Name", FieldType::Text, true),
                    ApplicationField::new("signature", "Signature", FieldType::Signature, true),
                ],
            ),
            ApplicationSection::new(
                "Farm",
                vec![
                    ApplicationField::new("area_ha", "Farm Area (ha)", FieldType::Number, true),
                    ApplicationField::new("planting_date", "Planting Date", FieldType::Date, true),
                    ApplicationField::new("crop", "Primary Crop", FieldType::Select, true)
                        .with_choices(vec!["rice".to_string(), "corn".to_string()]),
                    ApplicationField::new("perils", "Covered Perils", FieldType::MultiSelect, true)
                        .with_choices(vec![
                            "typhoon".to_string(),
                            "flood".to_string(),
                            "drought".to_string(),
                        ]),
                    ApplicationField::new("farm_location", "Farm Location", FieldType::Location, true),
                    ApplicationField::new("land_title", "Land Title", FieldType::File, true),
                    ApplicationField::new("extras", "Extra Details", FieldType::Json, false),
                ],
            ),
        ],
    )
    .unwrap()
}

/// A document that validates cleanly against [`crop_insurance_schema`],
/// paired with [`crop_upload`].
#[must_use]
pub fn valid_crop_document() -> Map<String, Value> {
    json!({
        "farmer_name": "Juan dela Cruz",
        "signature": "signature:0d4f6e9c-2a39-4f6e-8f1e-5b7a9c2d1e33",
        "area_ha": 2.5,
        "planting_date": "2025-06-01",
        "crop": "rice",
        "perils": ["typhoon", "flood"],
        "farm_location": { "lat": 14.6, "lng": 121.0 },
        "land_title": LAND_TITLE_FILE,
    })
    .as_object()
    .unwrap()
    .clone()
}

/// The upload matching [`valid_crop_document`]'s FILE field.
#[must_use]
pub fn crop_upload() -> Upload {
    Upload::new(vec![Attachment::new(LAND_TITLE_FILE, b"%PDF-1.4".to_vec())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use agrisure_schema::{Upload, ValidationDispatcher};

    #[test]
    fn fixture_document_validates_cleanly() {
        let errors = ValidationDispatcher::validate(
            &crop_insurance_schema(),
            &valid_crop_document(),
            &crop_upload(),
        );
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn fixture_document_fails_without_its_upload() {
        let errors = ValidationDispatcher::validate(
            &crop_insurance_schema(),
            &valid_crop_document(),
            &Upload::empty(),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field_key, "land_title");
    }
}
