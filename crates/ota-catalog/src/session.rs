//! One batch run against a catalog pair.
//!
//! A session holds an exclusive lock on the catalog root, loads both manifests,
//! feeds images through the [`Reconciler`] one after another, and writes both
//! manifests once on [`CatalogSession::commit`].

use crate::catalog::{Catalog, CatalogRecord, ExtraMetas, ExtraMetasSource};
use crate::config::{CatalogLayout, ReconcileOptions, Tier};
use crate::error::{OtaError, Result};
use crate::integrity::{self, DigestMismatch, MissingImage, UntrackedReport};
use crate::reconcile::{Outcome, Reconciler, Rejection};
use crate::store::TieredStore;
use fs2::FileExt;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome of one file in a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub file_name: String,
    pub outcome: Outcome,
}

/// Counts per outcome for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub accepted_current: usize,
    pub accepted_previous: usize,
    pub stale: usize,
    pub conflicts: usize,
    pub failed: usize,
}

/// Results of [`CatalogSession::process_files`], in input order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for entry in &self.entries {
            match &entry.outcome {
                Outcome::Accepted(Tier::Current) => summary.accepted_current += 1,
                Outcome::Accepted(Tier::Previous) => summary.accepted_previous += 1,
                Outcome::Rejected(Rejection::StaleAndSupersededInPrevious { .. }) => summary.stale += 1,
                Outcome::Rejected(Rejection::Conflict { .. }) => summary.conflicts += 1,
                Outcome::Rejected(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// True if any image was a conflict or failed outright.
    pub fn has_failures(&self) -> bool {
        self.entries
            .iter()
            .filter_map(|entry| entry.outcome.rejection())
            .any(Rejection::is_failure)
    }

    pub fn accepted(&self) -> usize {
        self.entries.iter().filter(|entry| entry.outcome.is_accepted()).count()
    }
}

/// Exclusive handle on a catalog pair for the duration of a batch.
#[derive(Debug)]
pub struct CatalogSession {
    reconciler: Reconciler,
    current: Catalog,
    previous: Catalog,
    // Held for the session's lifetime; closing the file releases the lock.
    _lock: File,
}

impl CatalogSession {
    /// Lock the catalog root and load both manifests.
    ///
    /// Fails with [`OtaError::Locked`] if another session holds the root.
    pub fn open(layout: CatalogLayout, options: ReconcileOptions) -> Result<Self> {
        fs::create_dir_all(&layout.root).map_err(|e| OtaError::io_with_path(e, &layout.root))?;

        let lock_path = layout.lock_path();
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| OtaError::io_with_path(e, &lock_path))?;

        if let Err(e) = lock.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(OtaError::Locked(lock_path));
            }
            return Err(OtaError::io_with_path(e, &lock_path));
        }
        debug!("Acquired catalog lock {}", lock_path.display());

        let current = Catalog::load(&layout.manifest_path(Tier::Current), Tier::Current)?;
        let previous = Catalog::load(&layout.manifest_path(Tier::Previous), Tier::Previous)?;

        Ok(Self {
            reconciler: Reconciler::new(TieredStore::new(layout), options),
            current,
            previous,
            _lock: lock,
        })
    }

    pub fn layout(&self) -> &CatalogLayout {
        self.reconciler.store().layout()
    }

    pub fn store(&self) -> &TieredStore {
        self.reconciler.store()
    }

    pub fn current(&self) -> &Catalog {
        &self.current
    }

    pub fn previous(&self) -> &Catalog {
        &self.previous
    }

    pub fn catalog(&self, tier: Tier) -> &Catalog {
        match tier {
            Tier::Current => &self.current,
            Tier::Previous => &self.previous,
        }
    }

    /// Reconcile one image against the session's catalogs.
    pub fn reconcile(&mut self, manufacturer: &str, file_name: &str, raw: &[u8], extra_metas: &ExtraMetas) -> Outcome {
        self.reconciler.reconcile(
            manufacturer,
            file_name,
            raw,
            extra_metas,
            &mut self.current,
            &mut self.previous,
        )
    }

    /// Reconcile a batch of files, strictly in order.
    ///
    /// Every path must name a file; this is checked before any image is read.
    /// A file that cannot be read is reported as an IO rejection.
    pub fn process_files(
        &mut self,
        manufacturer: &str,
        paths: &[PathBuf],
        extra_metas: &ExtraMetasSource,
    ) -> Result<BatchReport> {
        let named = paths
            .iter()
            .map(|path| file_name_of(path).map(|name| (path, name)))
            .collect::<Result<Vec<_>>>()?;

        info!("[{}] Processing {} files", manufacturer, named.len());
        let mut report = BatchReport::default();

        for (path, file_name) in named {
            let outcome = match fs::read(path) {
                Ok(raw) => {
                    let metas = extra_metas.for_file(&file_name);
                    self.reconcile(manufacturer, &file_name, &raw, &metas)
                }
                Err(e) => Outcome::Rejected(Rejection::Io(OtaError::io_with_path(e, path))),
            };
            info!("[{}:{}] {}", manufacturer, file_name, outcome);
            report.entries.push(BatchEntry { file_name, outcome });
        }

        Ok(report)
    }

    /// [`process_files`](Self::process_files) with extra metas still in JSON form.
    ///
    /// The metas are validated before any file is touched.
    pub fn process_files_json(&mut self, manufacturer: &str, paths: &[PathBuf], extra_metas: &Value) -> Result<BatchReport> {
        let source = ExtraMetasSource::from_value(extra_metas)?;
        self.process_files(manufacturer, paths, &source)
    }

    pub fn check_backing_files(&self, tier: Tier) -> Vec<MissingImage> {
        integrity::check_backing_files(self.catalog(tier), self.store())
    }

    pub fn prune_missing(&mut self, tier: Tier) -> Vec<CatalogRecord> {
        let store = self.reconciler.store();
        match tier {
            Tier::Current => integrity::prune_missing(&mut self.current, store),
            Tier::Previous => integrity::prune_missing(&mut self.previous, store),
        }
    }

    pub fn find_untracked(&self, tier: Tier) -> Result<UntrackedReport> {
        integrity::find_untracked(self.catalog(tier), self.store())
    }

    pub fn verify_digests(&self, tier: Tier) -> Vec<DigestMismatch> {
        integrity::verify_digests(self.catalog(tier), self.store())
    }

    /// Write both manifests and release the lock.
    pub fn commit(self) -> Result<()> {
        let layout = self.reconciler.store().layout();
        self.current.save(&layout.manifest_path(Tier::Current))?;
        self.previous.save(&layout.manifest_path(Tier::Previous))?;
        Ok(())
    }
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| OtaError::Validation {
            field: "path".to_string(),
            message: format!("{} does not name a file", path.display()),
        })
}
