//! Consistency checks between a catalog and the files backing it.

use crate::catalog::{Catalog, CatalogRecord};
use crate::config::Tier;
use crate::error::{OtaError, Result};
use crate::image::compute_file_sha512;
use crate::store::TieredStore;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, warn};
use walkdir::WalkDir;

/// A record whose backing file is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingImage {
    pub tier: Tier,
    pub index: usize,
    pub file_name: String,
    pub path: PathBuf,
}

/// Files in a tier directory that no record accounts for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UntrackedReport {
    /// Files in a manufacturer directory without a record.
    pub untracked: Vec<PathBuf>,
    /// Files directly in the tier root, outside any manufacturer directory.
    pub misplaced: Vec<PathBuf>,
}

impl UntrackedReport {
    pub fn is_clean(&self) -> bool {
        self.untracked.is_empty() && self.misplaced.is_empty()
    }
}

/// A backing file whose content does not hash to the recorded digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestMismatch {
    pub tier: Tier,
    pub file_name: String,
    pub path: PathBuf,
    pub expected: String,
    pub actual: String,
}

/// Local path of a record, if its URL points into this repository.
fn local_path(store: &TieredStore, record: &CatalogRecord) -> Option<PathBuf> {
    store.local_path_for_url(&record.url)
}

/// Records whose URL points into the repository but whose file is gone.
pub fn check_backing_files(catalog: &Catalog, store: &TieredStore) -> Vec<MissingImage> {
    catalog
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            let path = local_path(store, record)?;
            (!path.is_file()).then(|| MissingImage {
                tier: catalog.tier(),
                index,
                file_name: record.backing_file_name(),
                path,
            })
        })
        .collect()
}

/// Drop records whose backing file vanished; returns the dropped records.
pub fn prune_missing(catalog: &mut Catalog, store: &TieredStore) -> Vec<CatalogRecord> {
    let tier = catalog.tier();
    let removed = catalog.retain_with_removed(|record| match local_path(store, record) {
        Some(path) => path.is_file(),
        None => true,
    });

    for record in &removed {
        error!(
            "[{}] Image file for {} does not exist. Removed from manifest.",
            tier,
            record.describe()
        );
    }

    removed
}

/// Walk the tier directory for files no record references.
pub fn find_untracked(catalog: &Catalog, store: &TieredStore) -> Result<UntrackedReport> {
    let tier_root = store.layout().tier_root(catalog.tier());
    let mut report = UntrackedReport::default();

    if !tier_root.is_dir() {
        return Ok(report);
    }

    let referenced: HashSet<PathBuf> = catalog
        .iter()
        .filter_map(|record| local_path(store, record))
        .collect();

    for entry in WalkDir::new(&tier_root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| tier_root.clone());
            match e.into_io_error() {
                Some(io) => OtaError::io_with_path(io, path),
                None => OtaError::Io {
                    message: "Filesystem loop while walking tier directory".to_string(),
                    path: Some(path),
                    source: None,
                },
            }
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        if entry.depth() == 1 {
            report.misplaced.push(entry.into_path());
        } else if !referenced.contains(entry.path()) {
            report.untracked.push(entry.into_path());
        }
    }

    Ok(report)
}

/// Recompute digests of every present backing file.
///
/// Unreadable files are logged and skipped; [`check_backing_files`] reports absent ones.
pub fn verify_digests(catalog: &Catalog, store: &TieredStore) -> Vec<DigestMismatch> {
    let mut mismatches = Vec::new();

    for record in catalog {
        let Some(path) = local_path(store, record).filter(|p| p.is_file()) else {
            continue;
        };

        let actual = match compute_file_sha512(&path) {
            Ok(digest) => digest,
            Err(e) => {
                warn!("Failed to hash {}: {}", path.display(), e);
                continue;
            }
        };

        if !actual.eq_ignore_ascii_case(&record.sha512) {
            mismatches.push(DigestMismatch {
                tier: catalog.tier(),
                file_name: record.backing_file_name(),
                path,
                expected: record.sha512.clone(),
                actual,
            });
        }
    }

    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ExtraMetas;
    use crate::config::CatalogLayout;
    use crate::image::ImageHeader;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TieredStore, Catalog) {
        let temp_dir = TempDir::new().unwrap();
        let store = TieredStore::new(CatalogLayout::with_root(temp_dir.path()));
        let mut catalog = Catalog::new(Tier::Current);

        for (name, version) in [("a.ota", 1u32), ("b.ota", 2)] {
            let raw = format!("content of {}", name).into_bytes();
            let path = store.tier_dir(Tier::Current, "acme").unwrap().join(name);
            fs::write(&path, &raw).unwrap();
            catalog.push(CatalogRecord::from_image(
                &ImageHeader::new(1, version as u16, version, 56),
                &raw,
                name,
                store.url_for(Tier::Current, "acme", name),
                &ExtraMetas::default(),
            ));
        }

        (temp_dir, store, catalog)
    }

    #[test]
    fn test_clean_catalog() {
        let (_temp_dir, store, catalog) = setup();
        assert!(check_backing_files(&catalog, &store).is_empty());
        assert!(verify_digests(&catalog, &store).is_empty());
        assert!(find_untracked(&catalog, &store).unwrap().is_clean());
    }

    #[test]
    fn test_missing_file_is_reported_and_pruned() {
        let (temp_dir, store, mut catalog) = setup();
        fs::remove_file(temp_dir.path().join("images/acme/a.ota")).unwrap();

        let missing = check_backing_files(&catalog, &store);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].index, 0);
        assert_eq!(missing[0].file_name, "a.ota");

        let removed = prune_missing(&mut catalog, &store);
        assert_eq!(removed.len(), 1);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get(0).unwrap().file_name, "b.ota");
    }

    #[test]
    fn test_external_urls_are_not_checked() {
        let (_temp_dir, store, mut catalog) = setup();
        let mut external = catalog.get(0).unwrap().clone();
        external.url = "https://vendor.example/fw.ota".to_string();
        catalog.push(external);

        assert!(check_backing_files(&catalog, &store).is_empty());
        assert!(prune_missing(&mut catalog, &store).is_empty());
    }

    #[test]
    fn test_untracked_and_misplaced() {
        let (temp_dir, store, catalog) = setup();
        fs::write(temp_dir.path().join("images/acme/stray.ota"), b"x").unwrap();
        fs::write(temp_dir.path().join("images/loose.ota"), b"y").unwrap();

        let report = find_untracked(&catalog, &store).unwrap();
        assert_eq!(report.untracked, vec![temp_dir.path().join("images/acme/stray.ota")]);
        assert_eq!(report.misplaced, vec![temp_dir.path().join("images/loose.ota")]);
    }

    #[test]
    fn test_untracked_without_tier_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = TieredStore::new(CatalogLayout::with_root(temp_dir.path()));
        let report = find_untracked(&Catalog::new(Tier::Previous), &store).unwrap();
        assert!(report.is_clean());
    }

    #[test]
    fn test_digest_mismatch() {
        let (temp_dir, store, catalog) = setup();
        fs::write(temp_dir.path().join("images/acme/b.ota"), b"tampered").unwrap();

        let mismatches = verify_digests(&catalog, &store);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].file_name, "b.ota");
        assert_ne!(mismatches[0].expected, mismatches[0].actual);
    }
}
