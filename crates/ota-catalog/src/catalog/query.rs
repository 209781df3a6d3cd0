//! Read-only lookups over a catalog.
//!
//! [`find_candidates`] is a lenient listing for operators. [`find_for_device`]
//! selects the image a device would be offered, given what it runs now.

use super::record::CatalogRecord;
use serde::{Deserialize, Serialize};

/// Filter for [`find_candidates`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateQuery {
    pub image_type: u16,
    pub manufacturer_code: u16,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
}

/// Image currently installed on a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledImage {
    pub image_type: u16,
    pub manufacturer_code: u16,
    pub file_version: u32,
    #[serde(default)]
    pub hardware_version: Option<u16>,
}

/// Identification reported by the device itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
}

/// Overrides used when the device's own identification is not enough.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHints {
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub manufacturer_name: Option<String>,
    #[serde(default)]
    pub header_string: Option<String>,
    #[serde(default)]
    pub hardware_version_min: Option<u16>,
    #[serde(default)]
    pub hardware_version_max: Option<u16>,
}

/// Records for `(imageType, manufacturerCode)`, sorted by ascending `fileVersion`.
///
/// `modelId` and `manufacturerName` only narrow the result when both the record
/// and the query carry them.
pub fn find_candidates<'a>(records: &'a [CatalogRecord], query: &CandidateQuery) -> Vec<&'a CatalogRecord> {
    let mut found: Vec<&CatalogRecord> = records
        .iter()
        .filter(|r| r.image_type == query.image_type && r.manufacturer_code == query.manufacturer_code)
        .filter(|r| match (&r.model_id, &query.model_id) {
            (Some(have), Some(want)) if !have.is_empty() && !want.is_empty() => have == want,
            _ => true,
        })
        .filter(|r| match (&r.manufacturer_name, &query.manufacturer_name) {
            (Some(names), Some(want)) if !want.is_empty() => names.contains(want),
            _ => true,
        })
        .collect();

    found.sort_by_key(|r| r.file_version);
    found
}

fn contains_opt(names: &[String], candidate: Option<&String>) -> bool {
    candidate.is_some_and(|name| names.contains(name))
}

fn accepts_device(record: &CatalogRecord, installed: &InstalledImage, device: &DeviceInfo, hints: &DeviceHints) -> bool {
    if record.image_type != installed.image_type || record.manufacturer_code != installed.manufacturer_code {
        return false;
    }

    if record.min_file_version.is_some_and(|min| installed.file_version < min)
        || record.max_file_version.is_some_and(|max| installed.file_version > max)
    {
        return false;
    }

    if let Some(model_id) = record.model_id.as_deref().filter(|m| !m.is_empty()) {
        let accepted = device.model_id.as_deref() == Some(model_id) || hints.model_id.as_deref() == Some(model_id);
        if !accepted {
            return false;
        }
    }

    if let Some(ref names) = record.manufacturer_name {
        if !contains_opt(names, device.manufacturer_name.as_ref())
            && !contains_opt(names, hints.manufacturer_name.as_ref())
        {
            return false;
        }
    }

    if let Some(label) = hints.header_string.as_deref().filter(|l| !l.is_empty()) {
        if record.header_string != label {
            return false;
        }
    }

    if let Some(record_min) = record.hardware_version_min {
        let accepted = installed.hardware_version.is_some_and(|hw| hw >= record_min)
            || hints.hardware_version_min.is_some_and(|min| min >= record_min);
        if !accepted {
            return false;
        }
    }

    if let Some(record_max) = record.hardware_version_max {
        let accepted = installed.hardware_version.is_some_and(|hw| hw <= record_max)
            || hints.hardware_version_max.is_some_and(|max| max <= record_max);
        if !accepted {
            return false;
        }
    }

    true
}

/// First record a device running `installed` would be offered.
pub fn find_for_device<'a>(
    records: &'a [CatalogRecord],
    installed: &InstalledImage,
    device: &DeviceInfo,
    hints: &DeviceHints,
) -> Option<&'a CatalogRecord> {
    records
        .iter()
        .find(|record| accepts_device(record, installed, device, hints))
}
