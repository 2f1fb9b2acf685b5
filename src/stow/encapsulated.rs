//! Attribute preparation for encapsulated documents (PDF, CDA, STL, ...)

use std::path::{Path, PathBuf};

use dicom_core::header::HasLength;
use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::stow::error::{Result, StowError};

/// Encapsulated Document Length (0042,0015)
pub const ENCAPSULATED_DOCUMENT_LENGTH: Tag = Tag(0x0042, 0x0015);

/// DICOM JSON key of Encapsulated Document (0042,0011)
const ENCAPSULATED_DOCUMENT_KEY: &str = "00420011";

/// New globally unique identifier under the `2.25` UUID root
pub fn generate_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Give `tag` a fresh UID unless the dataset already carries one
///
/// Returns the UID the attribute holds afterwards.
pub fn ensure_uid(dataset: &mut InMemDicomObject, tag: Tag) -> String {
    if let Some(existing) = string_value(dataset, tag) {
        return existing;
    }
    let uid = generate_uid();
    dataset.put(DataElement::new(tag, VR::UI, PrimitiveValue::from(uid.as_str())));
    uid
}

/// Trimmed string value of `tag`, `None` when absent or blank
pub fn string_value(dataset: &InMemDicomObject, tag: Tag) -> Option<String> {
    dataset
        .element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(['\0', ' ']).to_string())
        .filter(|s| !s.is_empty())
}

/// Whether Encapsulated Document already holds the document bytes
pub fn has_encapsulated_document(dataset: &InMemDicomObject) -> bool {
    dataset
        .element(tags::ENCAPSULATED_DOCUMENT)
        .map(|e| !e.is_empty())
        .unwrap_or(false)
}

/// `file://` URI of the document, used as bulk data reference and part location
pub fn content_location(path: &Path) -> Result<String> {
    let absolute: PathBuf = std::fs::canonicalize(path)?;
    Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .map_err(|_| StowError::config(format!("cannot build a file URI for {}", absolute.display())))
}

/// Fill the document description attributes from the file on disk
///
/// Sets the MIME type, the document length and, when missing, a document
/// title taken from the file name.
pub async fn set_document_attributes(
    dataset: &mut InMemDicomObject,
    path: &Path,
    mime_type: &str,
) -> Result<()> {
    let length = tokio::fs::metadata(path).await?.len();
    let length = u32::try_from(length).map_err(|_| {
        StowError::encoding(format!(
            "{} is too large to be encapsulated ({} bytes)",
            path.display(),
            length
        ))
    })?;

    dataset.put(DataElement::new(
        tags::MIME_TYPE_OF_ENCAPSULATED_DOCUMENT,
        VR::LO,
        PrimitiveValue::from(mime_type),
    ));
    dataset.put(DataElement::new(
        ENCAPSULATED_DOCUMENT_LENGTH,
        VR::UL,
        PrimitiveValue::from(length),
    ));
    if string_value(dataset, tags::DOCUMENT_TITLE).is_none() {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            dataset.put(DataElement::new(
                tags::DOCUMENT_TITLE,
                VR::ST,
                PrimitiveValue::from(name),
            ));
        }
    }
    Ok(())
}

/// Point Encapsulated Document at `uri` in a DICOM JSON dataset
pub fn reference_bulk_data(dataset: &mut Value, uri: &str) -> Result<()> {
    dicom_json_tool::set_bulk_data_uri(dataset, ENCAPSULATED_DOCUMENT_KEY, "OB", uri)?;
    Ok(())
}
