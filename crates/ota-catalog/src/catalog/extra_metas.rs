//! Caller-supplied metadata that augments what the image header provides.
//!
//! Extra metas arrive as loosely typed JSON. They are validated field by field into
//! [`ExtraMetas`] at the boundary; a field with the wrong type is a hard error
//! naming that field, never a silent drop.

use super::record::CatalogRecord;
use crate::error::{OtaError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::info;

/// Validated extra metadata. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraMetas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_version_max: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_version_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_name: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_file_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

/// Extra metas for a batch: one set for every file, or one set per file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtraMetasSource {
    Uniform(ExtraMetas),
    PerFile(HashMap<String, ExtraMetas>),
}

impl Default for ExtraMetasSource {
    fn default() -> Self {
        ExtraMetasSource::Uniform(ExtraMetas::default())
    }
}

/// Present, non-null value of `field`.
fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|value| !value.is_null())
}

fn string_field(object: &Map<String, Value>, field: &str) -> Result<Option<String>> {
    match present(object, field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(OtaError::invalid_extra_meta(field, "string")),
    }
}

fn bool_field(object: &Map<String, Value>, field: &str) -> Result<Option<bool>> {
    match present(object, field) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(OtaError::invalid_extra_meta(field, "boolean")),
    }
}

fn number_field<T: TryFrom<u64>>(object: &Map<String, Value>, field: &str) -> Result<Option<T>> {
    let Some(value) = present(object, field) else {
        return Ok(None);
    };

    value
        .as_u64()
        .and_then(|n| T::try_from(n).ok())
        .map(Some)
        .ok_or_else(|| OtaError::invalid_extra_meta(field, "number"))
}

fn string_array_field(object: &Map<String, Value>, field: &str) -> Result<Option<Vec<String>>> {
    let Some(value) = present(object, field) else {
        return Ok(None);
    };

    let invalid = || OtaError::invalid_extra_meta(field, "array of string");
    let items = value.as_array().filter(|items| !items.is_empty()).ok_or_else(invalid)?;

    items
        .iter()
        .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

impl ExtraMetas {
    /// Validate a JSON object into extra metas.
    ///
    /// Unknown keys are ignored. `fileName` is validated when `ignore_file_name` is
    /// false and returned separately; it never becomes part of the metas.
    pub fn from_value(value: &Value, ignore_file_name: bool) -> Result<(Option<String>, Self)> {
        let object = value
            .as_object()
            .ok_or_else(|| OtaError::invalid_extra_meta("extraMetas", "object"))?;

        let file_name = if ignore_file_name {
            None
        } else {
            string_field(object, "fileName")?
        };

        let metas = Self {
            original_url: string_field(object, "originalUrl")?,
            force: bool_field(object, "force")?,
            hardware_version_max: number_field(object, "hardwareVersionMax")?,
            hardware_version_min: number_field(object, "hardwareVersionMin")?,
            manufacturer_name: string_array_field(object, "manufacturerName")?,
            max_file_version: number_field(object, "maxFileVersion")?,
            min_file_version: number_field(object, "minFileVersion")?,
            model_id: string_field(object, "modelId")?,
            release_notes: string_field(object, "releaseNotes")?,
        };

        Ok((file_name, metas))
    }

    /// Overlay every present field onto `record`.
    pub fn apply_to(&self, record: &mut CatalogRecord) {
        if let Some(ref original_url) = self.original_url {
            record.original_url = Some(original_url.clone());
        }
        if let Some(force) = self.force {
            record.force = Some(force);
        }
        if let Some(max) = self.hardware_version_max {
            record.hardware_version_max = Some(max);
        }
        if let Some(min) = self.hardware_version_min {
            record.hardware_version_min = Some(min);
        }
        if let Some(ref names) = self.manufacturer_name {
            record.manufacturer_name = Some(names.clone());
        }
        if let Some(max) = self.max_file_version {
            record.max_file_version = Some(max);
        }
        if let Some(min) = self.min_file_version {
            record.min_file_version = Some(min);
        }
        if let Some(ref model_id) = self.model_id {
            record.model_id = Some(model_id.clone());
        }
        if let Some(ref notes) = self.release_notes {
            record.release_notes = Some(notes.clone());
        }
    }
}

impl ExtraMetasSource {
    /// Validate the extra metas for a batch.
    ///
    /// An object applies to every file. An array holds per-file entries selected by
    /// `fileName`; entries without a usable `fileName` are skipped. `null` means no
    /// extra metas.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(_) => {
                let (_, metas) = ExtraMetas::from_value(value, false)?;
                Ok(ExtraMetasSource::Uniform(metas))
            }
            Value::Array(entries) => {
                let mut per_file = HashMap::new();

                for entry in entries {
                    let has_file_name = entry
                        .get("fileName")
                        .and_then(Value::as_str)
                        .is_some_and(|name| !name.is_empty());
                    if !has_file_name {
                        info!("Ignoring meta in array with missing/invalid fileName: {}", entry);
                        continue;
                    }

                    if let (Some(file_name), metas) = ExtraMetas::from_value(entry, false)? {
                        per_file.insert(file_name, metas);
                    }
                }

                Ok(ExtraMetasSource::PerFile(per_file))
            }
            _ => Err(OtaError::invalid_extra_meta(
                "extraMetas",
                "object or array of object",
            )),
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(&value)
    }

    /// Extra metas that apply to `file_name`.
    pub fn for_file(&self, file_name: &str) -> ExtraMetas {
        match self {
            ExtraMetasSource::Uniform(metas) => metas.clone(),
            ExtraMetasSource::PerFile(per_file) => {
                per_file.get(file_name).cloned().unwrap_or_default()
            }
        }
    }
}
