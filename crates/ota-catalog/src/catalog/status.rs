//! Version classification of an incoming image against a matched record.

use super::record::CatalogRecord;
use serde::Serialize;

/// How an incoming image relates to what a catalog already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStatus {
    /// No record with the same identity.
    New,
    /// The incoming image has a higher `fileVersion` than the record.
    Newer,
    /// The incoming image has a lower `fileVersion` than the record.
    Older,
    /// Same `fileVersion`.
    Identical,
}

/// Classify `file_version` against the matched record, if any.
///
/// `fileVersion` is an opaque ordering key; no semantic parsing.
pub fn classify(file_version: u32, matched: Option<&CatalogRecord>) -> ImageStatus {
    classify_version(file_version, matched.map(|record| record.file_version))
}

/// [`classify`] given only the matched record's `fileVersion`.
pub fn classify_version(file_version: u32, matched_version: Option<u32>) -> ImageStatus {
    let Some(matched_version) = matched_version else {
        return ImageStatus::New;
    };

    match matched_version.cmp(&file_version) {
        std::cmp::Ordering::Greater => ImageStatus::Older,
        std::cmp::Ordering::Less => ImageStatus::Newer,
        std::cmp::Ordering::Equal => ImageStatus::Identical,
    }
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ImageStatus::New => "new",
            ImageStatus::Newer => "newer",
            ImageStatus::Older => "older",
            ImageStatus::Identical => "identical",
        };
        write!(f, "{}", s)
    }
}
