//! On-disk storage for image files, split by tier and manufacturer.
//!
//! Layout: `{root}/{tierDir}/{manufacturer}/{fileName}`, published under
//! `{baseUrl}{branch}/{tierDir}/{manufacturer}/{fileName}`.
//!
//! Mutations during one reconciliation go through a [`FileJournal`] so that a
//! failure part way through can put every touched file back where it was.

use crate::catalog::CatalogRecord;
use crate::config::{CatalogLayout, Tier};
use crate::error::{OtaError, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use std::process;
use tracing::{debug, warn};

/// Maps tiers and manufacturers to directories and published URLs.
#[derive(Debug, Clone)]
pub struct TieredStore {
    layout: CatalogLayout,
}

impl TieredStore {
    pub fn new(layout: CatalogLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &CatalogLayout {
        &self.layout
    }

    /// Directory for `manufacturer` in `tier`, created if missing.
    pub fn tier_dir(&self, tier: Tier, manufacturer: &str) -> Result<PathBuf> {
        let dir = self.manufacturer_dir(tier, manufacturer);
        fs::create_dir_all(&dir).map_err(|e| OtaError::io_with_path(e, &dir))?;
        Ok(dir)
    }

    /// Directory for `manufacturer` in `tier`, without touching the filesystem.
    pub fn manufacturer_dir(&self, tier: Tier, manufacturer: &str) -> PathBuf {
        self.layout.tier_root(tier).join(manufacturer)
    }

    pub fn file_path(&self, tier: Tier, manufacturer: &str, file_name: &str) -> PathBuf {
        self.manufacturer_dir(tier, manufacturer).join(file_name)
    }

    /// Canonical published URL of a file.
    pub fn url_for(&self, tier: Tier, manufacturer: &str, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.layout.local_url_prefix(),
            self.layout.dir_name(tier),
            manufacturer,
            file_name
        )
    }

    /// Rewrite the first `{branch}/{fromDir}` segment of `url` to `{branch}/{toDir}`.
    pub fn retier_url(&self, url: &str, from: Tier, to: Tier) -> String {
        let branch = &self.layout.branch;
        let from_segment = format!("{}/{}", branch, self.layout.dir_name(from));
        let to_segment = format!("{}/{}", branch, self.layout.dir_name(to));
        url.replacen(&from_segment, &to_segment, 1)
    }

    /// Local path behind a published URL, or `None` if the URL points elsewhere.
    ///
    /// Percent-encoded segments are decoded. Parent-directory segments are refused.
    pub fn local_path_for_url(&self, url: &str) -> Option<PathBuf> {
        let prefix = format!("{}/", self.layout.local_url_prefix());
        let relative = url.strip_prefix(&prefix)?;
        let decoded = urlencoding::decode(relative).ok()?;

        let relative_path = Path::new(decoded.as_ref());
        let is_plain = relative_path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !is_plain || relative.is_empty() {
            return None;
        }

        Some(self.layout.root.join(relative_path))
    }

    /// Backing file of a record stored in `tier` under `manufacturer`.
    ///
    /// The record's URL wins when it points inside `tier`; otherwise the file is
    /// expected at the canonical location for its file name.
    pub fn record_path(&self, tier: Tier, manufacturer: &str, record: &CatalogRecord) -> PathBuf {
        let tier_root = self.layout.tier_root(tier);
        self.local_path_for_url(&record.url)
            .filter(|path| path.starts_with(&tier_root))
            .unwrap_or_else(|| self.file_path(tier, manufacturer, &record.backing_file_name()))
    }

    /// Start a journal whose discarded files land in the layout's trash directory.
    pub fn journal(&self) -> FileJournal {
        FileJournal::new(self.layout.trash_dir())
    }
}

#[derive(Debug)]
enum JournalEntry {
    /// A file that did not exist before.
    Created(PathBuf),
    /// A file renamed from `from` to `to`.
    Moved { from: PathBuf, to: PathBuf },
    /// A file set aside in the trash; restored on rollback, purged on commit.
    Trashed { original: PathBuf, trashed: PathBuf },
}

/// Undo log for file mutations made while reconciling one image.
///
/// Every operation either completes or leaves the filesystem as it was. Call
/// [`FileJournal::commit`] once the caller's in-memory state is final, or
/// [`FileJournal::rollback`] to undo everything in reverse order.
#[derive(Debug)]
pub struct FileJournal {
    trash_dir: PathBuf,
    entries: Vec<JournalEntry>,
}

impl FileJournal {
    pub fn new(trash_dir: impl Into<PathBuf>) -> Self {
        Self {
            trash_dir: trash_dir.into(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write `bytes` to `path`. An existing file at `path` is set aside first.
    pub fn write(&mut self, path: &Path, bytes: &[u8]) -> Result<()> {
        ensure_parent(path)?;
        self.discard(path)?;

        let temp_path = path.with_extension(format!("{}.tmp", process::id()));
        let write_temp = || -> std::io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()
        };

        if let Err(e) = write_temp() {
            let _ = fs::remove_file(&temp_path);
            return Err(OtaError::io_with_path(e, path));
        }

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(OtaError::io_with_path(e, path));
        }

        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        self.entries.push(JournalEntry::Created(path.to_path_buf()));
        Ok(())
    }

    /// Move `from` to `to`. An existing file at `to` is set aside first.
    pub fn relocate(&mut self, from: &Path, to: &Path) -> Result<()> {
        ensure_parent(to)?;
        self.discard(to)?;

        fs::rename(from, to).map_err(|e| OtaError::Io {
            message: format!("Failed to move {} to {}: {}", from.display(), to.display(), e),
            path: Some(from.to_path_buf()),
            source: Some(e),
        })?;

        debug!("Moved {} to {}", from.display(), to.display());
        self.entries.push(JournalEntry::Moved {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    /// Set `path` aside so it can be restored. Returns false if there was nothing there.
    pub fn discard(&mut self, path: &Path) -> Result<bool> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(OtaError::io_with_path(e, path)),
        };
        if metadata.is_dir() {
            return Err(OtaError::Io {
                message: format!("Expected a file but found a directory: {}", path.display()),
                path: Some(path.to_path_buf()),
                source: None,
            });
        }

        fs::create_dir_all(&self.trash_dir).map_err(|e| OtaError::io_with_path(e, &self.trash_dir))?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let trashed = self.trash_dir.join(format!(
            "{}-{}-{}",
            process::id(),
            self.entries.len(),
            file_name
        ));

        fs::rename(path, &trashed).map_err(|e| OtaError::io_with_path(e, path))?;

        debug!("Set aside {}", path.display());
        self.entries.push(JournalEntry::Trashed {
            original: path.to_path_buf(),
            trashed,
        });
        Ok(true)
    }

    /// Keep every change and purge the files set aside.
    pub fn commit(self) {
        for entry in self.entries {
            if let JournalEntry::Trashed { trashed, .. } = entry {
                if let Err(e) = fs::remove_file(&trashed) {
                    warn!("Failed to purge {}: {}", trashed.display(), e);
                }
            }
        }
        // Only succeeds when empty, which is the expected state.
        let _ = fs::remove_dir(&self.trash_dir);
    }

    /// Undo every change, newest first. Undo failures are logged and skipped.
    pub fn rollback(self) {
        for entry in self.entries.into_iter().rev() {
            let undo = match &entry {
                JournalEntry::Created(path) => fs::remove_file(path),
                JournalEntry::Moved { from, to } => fs::rename(to, from),
                JournalEntry::Trashed { original, trashed } => fs::rename(trashed, original),
            };
            if let Err(e) = undo {
                warn!("Failed to undo {:?}: {}", entry, e);
            }
        }
        let _ = fs::remove_dir(&self.trash_dir);
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| OtaError::io_with_path(e, parent))
        }
        _ => Ok(()),
    }
}
