use serde_json::Value;
use std::path::Path;
use thiserror::Error;

pub mod xml;

pub use xml::{identifier_to_xml, json_value_to_xml};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("DICOM JSON conversion error: {0}")]
    Json(String),
    #[error("DICOM XML conversion error: {0}")]
    Xml(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

pub fn identifier_to_json_value(obj: &dicom_object::mem::InMemDicomObject) -> Result<Value> {
    // Use dicom-json to encode dataset to standard DICOM JSON
    let v = dicom_json::to_value(obj).map_err(|e| ConvertError::Json(format!("{}", e)))?;
    Ok(v)
}

pub fn json_value_to_identifier(v: &Value) -> Result<dicom_object::mem::InMemDicomObject> {
    let obj =
        dicom_json::from_value(v.clone()).map_err(|e| ConvertError::Json(format!("{}", e)))?;
    Ok(obj)
}

/// Point an attribute at out-of-band bulk data instead of inline bytes
///
/// `tag` is the 8-digit hexadecimal key used by DICOM JSON.
pub fn set_bulk_data_uri(dataset: &mut Value, tag: &str, vr: &str, uri: &str) -> Result<()> {
    let attrs = dataset
        .as_object_mut()
        .ok_or_else(|| ConvertError::Json("dataset must be a JSON object".to_string()))?;
    attrs.insert(
        tag.to_uppercase(),
        serde_json::json!({ "vr": vr, "BulkDataURI": uri }),
    );
    Ok(())
}

pub fn write_part10(path: &Path, obj: &dicom_object::mem::InMemDicomObject) -> Result<()> {
    use dicom_core::Tag;
    use dicom_dictionary_std::uids;
    use dicom_object::meta::FileMetaTableBuilder;

    // Try to obtain SOP Class UID from the object if present
    let ms_sop_uid = obj
        .element(Tag(0x0008, 0x0016)) // SOP Class UID
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uids::SECONDARY_CAPTURE_IMAGE_STORAGE.into());

    let mut meta = FileMetaTableBuilder::new()
        .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
        .media_storage_sop_class_uid(ms_sop_uid.as_str());
    if let Some(iuid) = obj
        .element(Tag(0x0008, 0x0018)) // SOP Instance UID
        .ok()
        .and_then(|e| e.to_str().ok())
    {
        meta = meta.media_storage_sop_instance_uid(iuid.as_ref());
    }

    let file_obj = obj
        .clone()
        .with_meta(meta)
        .map_err(|e| ConvertError::Json(e.to_string()))?;

    file_obj
        .write_to_file(path)
        .map_err(|e| ConvertError::Json(e.to_string()))
}
