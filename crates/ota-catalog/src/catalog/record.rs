//! Persisted manifest entry.
//!
//! Field names follow the published manifest JSON (camelCase), optional fields are
//! omitted when absent.

use super::extra_metas::ExtraMetas;
use crate::image::{compute_sha512, ImageHeader};
use serde::{Deserialize, Serialize};

/// One manifest entry: an image, its identity and where it is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogRecord {
    /// Original file name. Legacy entries may lack it; see [`CatalogRecord::backing_file_name`].
    #[serde(default)]
    pub file_name: String,
    pub file_version: u32,
    pub file_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    /// Canonical location of the file.
    pub url: String,
    pub image_type: u16,
    pub manufacturer_code: u16,
    /// Hex SHA-512 of the full file content.
    pub sha512: String,
    #[serde(rename = "otaHeaderString")]
    pub header_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_version_min: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_version_max: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_name: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_file_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_parse_logic: Option<String>,
}

impl CatalogRecord {
    /// Build a record for a freshly accepted image.
    ///
    /// Payload comes from the header and the raw bytes; extra metas are layered on
    /// top. The header label is stored without its NUL padding.
    pub fn from_image(
        header: &ImageHeader,
        raw: &[u8],
        file_name: &str,
        url: String,
        extra_metas: &ExtraMetas,
    ) -> Self {
        let mut record = Self {
            file_name: file_name.to_string(),
            file_version: header.file_version,
            file_size: header.total_image_size,
            original_url: None,
            url,
            image_type: header.image_type,
            manufacturer_code: header.manufacturer_code,
            sha512: compute_sha512(raw),
            header_string: header.header_string_trimmed(),
            force: None,
            hardware_version_min: None,
            hardware_version_max: None,
            model_id: None,
            manufacturer_name: None,
            min_file_version: None,
            max_file_version: None,
            release_notes: None,
            custom_parse_logic: None,
        };
        extra_metas.apply_to(&mut record);
        record
    }

    /// Name of the file backing this record.
    ///
    /// Falls back to the last URL segment for entries written before `fileName`
    /// was recorded.
    pub fn backing_file_name(&self) -> String {
        if !self.file_name.is_empty() {
            return self.file_name.clone();
        }

        let last = self.url.rsplit('/').next().unwrap_or_default();
        urlencoding::decode(last)
            .map(|decoded| decoded.into_owned())
            .unwrap_or_else(|_| last.to_string())
    }

    /// The extra metas carried by this record.
    pub fn extra_metas(&self) -> ExtraMetas {
        ExtraMetas {
            original_url: self.original_url.clone(),
            force: self.force,
            hardware_version_max: self.hardware_version_max,
            hardware_version_min: self.hardware_version_min,
            manufacturer_name: self.manufacturer_name.clone(),
            max_file_version: self.max_file_version,
            min_file_version: self.min_file_version,
            model_id: self.model_id.clone(),
            release_notes: self.release_notes.clone(),
        }
    }

    /// Short human-readable identity for log lines.
    pub fn describe(&self) -> String {
        format!(
            "{} (imageType={}, manufacturerCode={}, fileVersion={})",
            self.backing_file_name(),
            self.image_type,
            self.manufacturer_code,
            self.file_version
        )
    }
}
