//! In-memory catalog for one tier, persisted as an ordered JSON array.

use super::atomic::{atomic_read_json, atomic_write_json};
use super::record::CatalogRecord;
use crate::config::Tier;
use crate::error::Result;
use std::path::Path;
use tracing::info;

/// Ordered list of records belonging to one tier.
///
/// Order is insertion order; nothing here sorts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    tier: Tier,
    records: Vec<CatalogRecord>,
}

impl Catalog {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            records: Vec::new(),
        }
    }

    pub fn from_records(tier: Tier, records: Vec<CatalogRecord>) -> Self {
        Self { tier, records }
    }

    /// Load a manifest file. A missing file is an empty catalog.
    pub fn load(path: &Path, tier: Tier) -> Result<Self> {
        let records: Vec<CatalogRecord> = atomic_read_json(path)?.unwrap_or_default();
        info!(
            "Loaded {} manifest {} ({} images)",
            tier,
            path.display(),
            records.len()
        );
        Ok(Self { tier, records })
    }

    /// Write the manifest atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, &self.records)?;
        info!(
            "{} manifest has {} images.",
            self.tier,
            self.records.len()
        );
        Ok(())
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn records(&self) -> &[CatalogRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CatalogRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CatalogRecord> {
        self.records.get(index)
    }

    pub fn push(&mut self, record: CatalogRecord) {
        self.records.push(record);
    }

    /// Remove and return the record at `index`, shifting later records down.
    pub fn remove(&mut self, index: usize) -> Option<CatalogRecord> {
        (index < self.records.len()).then(|| self.records.remove(index))
    }

    /// Keep only records for which `keep` returns true; returns the removed ones.
    pub fn retain_with_removed(
        &mut self,
        mut keep: impl FnMut(&CatalogRecord) -> bool,
    ) -> Vec<CatalogRecord> {
        let (kept, removed): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.records).into_iter().partition(|r| keep(r));
        self.records = kept;
        removed
    }

    /// Index of the first record backed by `file_name`.
    pub fn position_by_file_name(&self, file_name: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|record| record.backing_file_name() == file_name)
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a CatalogRecord;
    type IntoIter = std::slice::Iter<'a, CatalogRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
