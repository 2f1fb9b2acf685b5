//! Native DICOM Model (PS3.19 Annex A) rendering
//!
//! The XML is produced from the DICOM JSON form of a dataset, so both
//! metadata representations share one encoder.

use dicom_core::dictionary::DataDictionary;
use dicom_core::Tag;
use dicom_dictionary_std::StandardDataDictionary;
use serde_json::{Map, Value};

use crate::{ConvertError, Result};

const PN_COMPONENTS: [&str; 5] = [
    "FamilyName",
    "GivenName",
    "MiddleName",
    "NamePrefix",
    "NameSuffix",
];

/// Render a DICOM JSON dataset as a `NativeDicomModel` document
pub fn json_value_to_xml(dataset: &Value) -> Result<String> {
    let attrs = dataset
        .as_object()
        .ok_or_else(|| ConvertError::Xml("dataset must be a JSON object".to_string()))?;

    let mut out = String::with_capacity(1024);
    out.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    out.push_str(r#"<NativeDicomModel xml:space="preserve">"#);
    write_attributes(&mut out, attrs)?;
    out.push_str("</NativeDicomModel>");
    Ok(out)
}

/// Encode an in-memory dataset straight to native DICOM XML
pub fn identifier_to_xml(obj: &dicom_object::mem::InMemDicomObject) -> Result<String> {
    json_value_to_xml(&crate::identifier_to_json_value(obj)?)
}

fn write_attributes(out: &mut String, attrs: &Map<String, Value>) -> Result<()> {
    let mut keys: Vec<&String> = attrs.keys().collect();
    keys.sort();

    for key in keys {
        let tag = parse_tag(key)?;
        let attr = &attrs[key];
        let vr = attr
            .get("vr")
            .and_then(Value::as_str)
            .ok_or_else(|| ConvertError::Xml(format!("attribute {} has no vr", key)))?;

        out.push_str(&format!(r#"<DicomAttribute tag="{}" vr="{}""#, key.to_uppercase(), vr));
        if let Some(entry) = StandardDataDictionary.by_tag(tag) {
            out.push_str(&format!(r#" keyword="{}""#, entry.alias));
        }
        out.push('>');

        if let Some(values) = attr.get("Value").and_then(Value::as_array) {
            for (i, value) in values.iter().enumerate() {
                let number = i + 1;
                match vr {
                    "SQ" => {
                        out.push_str(&format!(r#"<Item number="{}">"#, number));
                        if let Some(item) = value.as_object() {
                            write_attributes(out, item)?;
                        }
                        out.push_str("</Item>");
                    }
                    "PN" => write_person_name(out, number, value),
                    _ => {
                        out.push_str(&format!(r#"<Value number="{}">"#, number));
                        out.push_str(&escape(&scalar_text(value)));
                        out.push_str("</Value>");
                    }
                }
            }
        } else if let Some(uri) = attr.get("BulkDataURI").and_then(Value::as_str) {
            out.push_str(&format!(r#"<BulkData uri="{}"/>"#, escape(uri)));
        } else if let Some(inline) = attr.get("InlineBinary").and_then(Value::as_str) {
            out.push_str("<InlineBinary>");
            out.push_str(&escape(inline));
            out.push_str("</InlineBinary>");
        }

        out.push_str("</DicomAttribute>");
    }
    Ok(())
}

fn write_person_name(out: &mut String, number: usize, value: &Value) {
    out.push_str(&format!(r#"<PersonName number="{}">"#, number));
    if let Some(groups) = value.as_object() {
        for group in ["Alphabetic", "Ideographic", "Phonetic"] {
            let Some(name) = groups.get(group).and_then(Value::as_str) else {
                continue;
            };
            out.push_str(&format!("<{}>", group));
            for (component, part) in PN_COMPONENTS.iter().zip(name.split('^')) {
                if !part.is_empty() {
                    out.push_str(&format!("<{0}>{1}</{0}>", component, escape(part)));
                }
            }
            out.push_str(&format!("</{}>", group));
        }
    }
    out.push_str("</PersonName>");
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_tag(key: &str) -> Result<Tag> {
    if key.len() != 8 {
        return Err(ConvertError::Xml(format!("invalid tag key '{}'", key)));
    }
    let group = u16::from_str_radix(&key[0..4], 16)
        .map_err(|_| ConvertError::Xml(format!("invalid tag key '{}'", key)))?;
    let element = u16::from_str_radix(&key[4..8], 16)
        .map_err(|_| ConvertError::Xml(format!("invalid tag key '{}'", key)))?;
    Ok(Tag(group, element))
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}
