//! Find the record that represents the same logical image.
//!
//! Identity is `(imageType, manufacturerCode, minFileVersion, maxFileVersion,
//! modelId)` compared exactly (absent equals absent), plus `manufacturerName`
//! compared element-wise only when both sides carry one.

use super::extra_metas::ExtraMetas;
use super::record::CatalogRecord;
use crate::image::ImageHeader;
use tracing::warn;

/// True if `record` has the identity of `header` + `extra_metas`.
pub fn is_same_identity(header: &ImageHeader, extra_metas: &ExtraMetas, record: &CatalogRecord) -> bool {
    let manufacturer_names_agree = match (&record.manufacturer_name, &extra_metas.manufacturer_name) {
        (Some(existing), Some(incoming)) => existing == incoming,
        _ => true,
    };

    record.image_type == header.image_type
        && record.manufacturer_code == header.manufacturer_code
        && record.min_file_version == extra_metas.min_file_version
        && record.max_file_version == extra_metas.max_file_version
        && record.model_id == extra_metas.model_id
        && manufacturer_names_agree
}

/// First record in catalog order with the same identity, with its index.
pub fn find_match<'a>(
    header: &ImageHeader,
    extra_metas: &ExtraMetas,
    records: &'a [CatalogRecord],
) -> Option<(usize, &'a CatalogRecord)> {
    records
        .iter()
        .enumerate()
        .find(|(_, record)| is_same_identity(header, extra_metas, record))
}

/// Number of records sharing the identity; more than one means the catalog is
/// ambiguous for this image.
pub fn count_matches(header: &ImageHeader, extra_metas: &ExtraMetas, records: &[CatalogRecord]) -> usize {
    records
        .iter()
        .filter(|record| is_same_identity(header, extra_metas, record))
        .count()
}

/// [`find_match`], logging a warning when the identity matches several records.
pub fn find_match_checked<'a>(
    log_prefix: &str,
    header: &ImageHeader,
    extra_metas: &ExtraMetas,
    records: &'a [CatalogRecord],
) -> Option<(usize, &'a CatalogRecord)> {
    let found = find_match(header, extra_metas, records);

    if found.is_some() {
        let count = count_matches(header, extra_metas, records);
        if count > 1 {
            warn!("{} Identity matches {} records, using the first.", log_prefix, count);
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(image_type: u16, version: u32) -> ImageHeader {
        ImageHeader::new(4151, image_type, version, 100)
    }

    fn record(image_type: u16, version: u32, extra: &ExtraMetas) -> CatalogRecord {
        CatalogRecord::from_image(&header(image_type, version), &[], "f.ota", "u".to_string(), extra)
    }

    fn names(list: &[&str]) -> Option<Vec<String>> {
        Some(list.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_matches_on_type_and_manufacturer() {
        let none = ExtraMetas::default();
        let records = vec![record(2, 14, &none), record(1, 13, &none)];

        let (index, found) = find_match(&header(1, 14), &none, &records).unwrap();
        assert_eq!(index, 1);
        assert_eq!(found.file_version, 13);

        let other_manufacturer = ImageHeader::new(4107, 1, 14, 100);
        assert!(find_match(&other_manufacturer, &none, &records).is_none());
    }

    #[test]
    fn test_model_id_must_be_equal_including_absent() {
        let with_model = ExtraMetas {
            model_id: Some("A".to_string()),
            ..ExtraMetas::default()
        };
        let records = vec![record(1, 14, &with_model)];

        assert!(find_match(&header(1, 14), &ExtraMetas::default(), &records).is_none());
        assert!(find_match(&header(1, 14), &with_model, &records).is_some());

        let other_model = ExtraMetas {
            model_id: Some("B".to_string()),
            ..ExtraMetas::default()
        };
        assert!(find_match(&header(1, 14), &other_model, &records).is_none());
    }

    #[test]
    fn test_file_version_bounds_disambiguate() {
        let floor = ExtraMetas {
            min_file_version: Some(10),
            ..ExtraMetas::default()
        };
        let records = vec![record(1, 14, &ExtraMetas::default()), record(1, 14, &floor)];

        assert_eq!(find_match(&header(1, 15), &floor, &records).unwrap().0, 1);
        assert_eq!(find_match(&header(1, 15), &ExtraMetas::default(), &records).unwrap().0, 0);

        let ceiling = ExtraMetas {
            max_file_version: Some(10),
            ..ExtraMetas::default()
        };
        assert!(find_match(&header(1, 15), &ceiling, &records).is_none());
    }

    #[test]
    fn test_manufacturer_name_only_blocks_when_both_present() {
        let lixee = ExtraMetas {
            manufacturer_name: names(&["lixee"]),
            ..ExtraMetas::default()
        };
        let records = vec![record(2, 14, &lixee)];

        assert!(find_match(&header(2, 14), &ExtraMetas::default(), &records).is_some());
        assert!(find_match(&header(2, 14), &lixee, &records).is_some());

        let reordered = ExtraMetas {
            manufacturer_name: names(&["other", "lixee"]),
            ..ExtraMetas::default()
        };
        assert!(find_match(&header(2, 14), &reordered, &records).is_none());

        let plain = vec![record(2, 14, &ExtraMetas::default())];
        assert!(find_match(&header(2, 14), &lixee, &plain).is_some());
    }

    #[test]
    fn test_first_match_wins_and_duplicates_are_counted() {
        let none = ExtraMetas::default();
        let records = vec![record(1, 12, &none), record(1, 13, &none)];

        let (index, _) = find_match_checked("[test]", &header(1, 14), &none, &records).unwrap();
        assert_eq!(index, 0);
        assert_eq!(count_matches(&header(1, 14), &none, &records), 2);
    }
}
