//! Decide where an incoming image belongs and move files between tiers.
//!
//! The current tier is consulted first:
//!
//! | current status | action                                                     |
//! |----------------|------------------------------------------------------------|
//! | identical      | reject as conflict                                         |
//! | older          | consult previous tier; accept there if it is new or newer  |
//! | new / newer    | demote the outgoing current record, accept into current    |
//!
//! Each accepted image is applied to working copies of both catalogs with file
//! changes recorded in a [`FileJournal`]. The copies replace the caller's catalogs
//! only when every step succeeded; otherwise the journal is rolled back.

use crate::catalog::{classify_version, find_match_checked, Catalog, CatalogRecord, ExtraMetas, ImageStatus};
use crate::config::{ReconcileOptions, Tier};
use crate::error::OtaError;
use crate::image::{decode_at_magic, verify_image_size, ImageHeader};
use crate::store::{FileJournal, TieredStore};
use std::fmt;
use tracing::{error, info, warn};

/// Result of reconciling one image.
#[derive(Debug)]
pub enum Outcome {
    Accepted(Tier),
    Rejected(Rejection),
}

/// Why an image was not accepted.
#[derive(Debug)]
pub enum Rejection {
    /// The bytes are not a usable OTA image.
    Decode(OtaError),
    /// The current tier already holds this exact version.
    Conflict {
        index: usize,
        file_name: String,
        file_version: u32,
    },
    /// Older than current, and the previous tier already holds an equal or better image.
    StaleAndSupersededInPrevious {
        current_version: u32,
        previous_version: u32,
    },
    /// A file operation failed; nothing was changed.
    Io(OtaError),
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }

    pub fn accepted_tier(&self) -> Option<Tier> {
        match self {
            Outcome::Accepted(tier) => Some(*tier),
            Outcome::Rejected(_) => None,
        }
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Outcome::Accepted(_) => None,
            Outcome::Rejected(rejection) => Some(rejection),
        }
    }
}

impl Rejection {
    /// True for rejections a batch caller should treat as failure.
    ///
    /// A stale image is an expected no-op; everything else is not.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Rejection::StaleAndSupersededInPrevious { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Decode(_) => "decode",
            Rejection::Conflict { .. } => "conflict",
            Rejection::StaleAndSupersededInPrevious { .. } => "stale",
            Rejection::Io(_) => "io",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Decode(e) => write!(f, "decode failed: {}", e),
            Rejection::Conflict {
                index,
                file_name,
                file_version,
            } => write!(
                f,
                "conflict with current record #{} ({}, version {})",
                index, file_name, file_version
            ),
            Rejection::StaleAndSupersededInPrevious {
                current_version,
                previous_version,
            } => write!(
                f,
                "stale: current has {}, previous has {}",
                current_version, previous_version
            ),
            Rejection::Io(e) => write!(f, "io failure: {}", e),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Accepted(tier) => write!(f, "accepted into {}", tier),
            Outcome::Rejected(rejection) => write!(f, "rejected, {}", rejection),
        }
    }
}

/// Everything one reconciliation needs to know about the incoming image.
struct Incoming<'a> {
    log_prefix: String,
    manufacturer: &'a str,
    file_name: &'a str,
    raw: &'a [u8],
    header: ImageHeader,
    extra_metas: &'a ExtraMetas,
}

/// Applies incoming images to a pair of catalogs.
#[derive(Debug, Clone)]
pub struct Reconciler {
    store: TieredStore,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(store: TieredStore, options: ReconcileOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn options(&self) -> ReconcileOptions {
        self.options
    }

    /// Reconcile one image against both catalogs.
    ///
    /// `raw` is the whole file; the header is decoded from the first magic found
    /// in it, while the stored file and its digest cover every byte. Catalogs are
    /// only modified when the outcome is `Accepted`.
    pub fn reconcile(
        &self,
        manufacturer: &str,
        file_name: &str,
        raw: &[u8],
        extra_metas: &ExtraMetas,
        current: &mut Catalog,
        previous: &mut Catalog,
    ) -> Outcome {
        let log_prefix = format!("[{}:{}]", manufacturer, file_name);

        let header = match self.decode(&log_prefix, raw) {
            Ok(header) => header,
            Err(e) => {
                warn!("{} Not a valid OTA image: {}", log_prefix, e);
                return Outcome::Rejected(Rejection::Decode(e));
            }
        };

        let incoming = Incoming {
            log_prefix,
            manufacturer,
            file_name,
            raw,
            header,
            extra_metas,
        };

        let current_match = find_match_checked(
            &incoming.log_prefix,
            &incoming.header,
            extra_metas,
            current.records(),
        )
        .map(|(index, record)| (index, record.file_version, record.backing_file_name()));
        let current_status = classify_version(incoming.header.file_version, current_match.as_ref().map(|m| m.1));

        match (current_status, current_match) {
            (ImageStatus::Identical, Some((index, file_version, file_name))) => {
                info!(
                    "{} Current manifest already has version {}. Ignoring.",
                    incoming.log_prefix, incoming.header.file_version
                );
                Outcome::Rejected(Rejection::Conflict {
                    index,
                    file_name,
                    file_version,
                })
            }
            (ImageStatus::Older, Some((_, current_version, _))) => {
                self.reconcile_older(&incoming, current_version, current, previous)
            }
            (ImageStatus::Newer, Some((index, _, _))) => {
                self.transact(&incoming, current, previous, |journal, current, previous| {
                    self.accept_into_current(&incoming, Some(index), journal, current, previous)
                })
            }
            _ => self.transact(&incoming, current, previous, |journal, current, previous| {
                self.accept_into_current(&incoming, None, journal, current, previous)
            }),
        }
    }

    fn decode(&self, log_prefix: &str, raw: &[u8]) -> Result<ImageHeader, OtaError> {
        let (offset, header) = decode_at_magic(raw)?;
        if offset > 0 {
            info!("{} Skipped {} bytes before the OTA header.", log_prefix, offset);
        }
        if self.options.verify_image_size {
            verify_image_size(&raw[offset..], &header)?;
        }
        Ok(header)
    }

    /// Current tier is ahead of the incoming image; try the previous tier.
    fn reconcile_older(
        &self,
        incoming: &Incoming<'_>,
        current_version: u32,
        current: &mut Catalog,
        previous: &mut Catalog,
    ) -> Outcome {
        let previous_match = find_match_checked(
            &incoming.log_prefix,
            &incoming.header,
            incoming.extra_metas,
            previous.records(),
        )
        .map(|(index, record)| (index, record.file_version));
        let previous_status = classify_version(incoming.header.file_version, previous_match.map(|m| m.1));

        let replaced = match (previous_status, previous_match) {
            (ImageStatus::Older | ImageStatus::Identical, Some((_, previous_version))) => {
                info!(
                    "{} Current manifest has higher version and an equal or better match is already present in previous manifest. Ignoring.",
                    incoming.log_prefix
                );
                return Outcome::Rejected(Rejection::StaleAndSupersededInPrevious {
                    current_version,
                    previous_version,
                });
            }
            (ImageStatus::Newer, Some((index, _))) => Some(index),
            _ => None,
        };

        self.transact(incoming, current, previous, |journal, _, previous| {
            self.accept_into_previous(incoming, replaced, journal, previous)
        })
    }

    /// Run `apply` against working copies and a fresh journal; publish on success.
    fn transact<F>(&self, incoming: &Incoming<'_>, current: &mut Catalog, previous: &mut Catalog, apply: F) -> Outcome
    where
        F: FnOnce(&mut FileJournal, &mut Catalog, &mut Catalog) -> Result<Tier, OtaError>,
    {
        let mut journal = self.store.journal();
        let mut working_current = current.clone();
        let mut working_previous = previous.clone();

        match apply(&mut journal, &mut working_current, &mut working_previous) {
            Ok(tier) => {
                journal.commit();
                *current = working_current;
                *previous = working_previous;
                Outcome::Accepted(tier)
            }
            Err(e) => {
                error!(
                    "{} Failed to store image, rolling back: {}",
                    incoming.log_prefix, e
                );
                journal.rollback();
                Outcome::Rejected(Rejection::Io(e))
            }
        }
    }

    fn accept_into_previous(
        &self,
        incoming: &Incoming<'_>,
        replaced: Option<usize>,
        journal: &mut FileJournal,
        previous: &mut Catalog,
    ) -> Result<Tier, OtaError> {
        info!(
            "{} Current manifest has higher version. Adding to previous instead.",
            incoming.log_prefix
        );

        if let Some(index) = replaced {
            info!("{} Removing previous image.", incoming.log_prefix);
            self.remove_record(incoming, Tier::Previous, index, journal, previous)?;
        }

        self.store_new_image(incoming, Tier::Previous, journal, previous)?;
        Ok(Tier::Previous)
    }

    fn accept_into_current(
        &self,
        incoming: &Incoming<'_>,
        outgoing: Option<usize>,
        journal: &mut FileJournal,
        current: &mut Catalog,
        previous: &mut Catalog,
    ) -> Result<Tier, OtaError> {
        match outgoing {
            Some(index) => self.demote(incoming, index, journal, current, previous)?,
            None => info!(
                "{} Current manifest does not have version {}. Adding.",
                incoming.log_prefix, incoming.header.file_version
            ),
        }

        self.store_new_image(incoming, Tier::Current, journal, current)?;
        Ok(Tier::Current)
    }

    /// Move the current record at `index` into the previous tier.
    fn demote(
        &self,
        incoming: &Incoming<'_>,
        index: usize,
        journal: &mut FileJournal,
        current: &mut Catalog,
        previous: &mut Catalog,
    ) -> Result<(), OtaError> {
        let Some(mut outgoing) = current.remove(index) else {
            return Err(OtaError::Other(format!("no current record at index {}", index)));
        };
        info!(
            "{} Current manifest has older version {}. Replacing with {}.",
            incoming.log_prefix, outgoing.file_version, incoming.header.file_version
        );

        let previous_match = find_match_checked(
            &incoming.log_prefix,
            &incoming.header,
            incoming.extra_metas,
            previous.records(),
        )
        .map(|(index, record)| (index, record.file_version));
        let previous_status = classify_version(incoming.header.file_version, previous_match.map(|m| m.1));
        if matches!(previous_status, ImageStatus::Older | ImageStatus::Identical) {
            warn!(
                "{} Current image is new/newer but previous image is not older/non-existing.",
                incoming.log_prefix
            );
        }
        if let Some((previous_index, _)) = previous_match {
            info!("{} Removing previous image.", incoming.log_prefix);
            self.remove_record(incoming, Tier::Previous, previous_index, journal, previous)?;
        }

        let outgoing_name = outgoing.backing_file_name();
        let from = self.store.record_path(Tier::Current, incoming.manufacturer, &outgoing);
        if !from.exists() {
            error!(
                "{} Image file '{}' does not exist. Not moving to previous.",
                incoming.log_prefix,
                from.display()
            );
            return Ok(());
        }

        let to = self.store.tier_dir(Tier::Previous, incoming.manufacturer)?.join(&outgoing_name);
        journal.relocate(&from, &to)?;
        outgoing.url = self.store.retier_url(&outgoing.url, Tier::Current, Tier::Previous);
        previous.push(outgoing);
        Ok(())
    }

    /// Remove the record at `index` and set its backing file aside.
    fn remove_record(
        &self,
        incoming: &Incoming<'_>,
        tier: Tier,
        index: usize,
        journal: &mut FileJournal,
        catalog: &mut Catalog,
    ) -> Result<(), OtaError> {
        let Some(removed) = catalog.remove(index) else {
            return Ok(());
        };
        let path = self.store.record_path(tier, incoming.manufacturer, &removed);
        journal.discard(&path)?;
        Ok(())
    }

    /// Write the incoming file into `tier`, then append its record.
    fn store_new_image(
        &self,
        incoming: &Incoming<'_>,
        tier: Tier,
        journal: &mut FileJournal,
        catalog: &mut Catalog,
    ) -> Result<(), OtaError> {
        let path = self.store.tier_dir(tier, incoming.manufacturer)?.join(incoming.file_name);
        journal.write(&path, incoming.raw)?;

        let record = CatalogRecord::from_image(
            &incoming.header,
            incoming.raw,
            incoming.file_name,
            self.store.url_for(tier, incoming.manufacturer, incoming.file_name),
            incoming.extra_metas,
        );
        catalog.push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CatalogLayout;
    use tempfile::TempDir;

    fn image(version: u32) -> Vec<u8> {
        let mut raw = ImageHeader::new(4151, 1, version, 64).encode();
        raw.extend_from_slice(&[0u8, 0, 2, 0, 0, 0, 0xAA, 0xBB]);
        raw
    }

    fn setup() -> (TempDir, Reconciler, Catalog, Catalog) {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new(
            TieredStore::new(CatalogLayout::with_root(temp_dir.path())),
            ReconcileOptions::default(),
        );
        (temp_dir, reconciler, Catalog::new(Tier::Current), Catalog::new(Tier::Previous))
    }

    #[test]
    fn test_new_image_goes_to_current() {
        let (temp_dir, reconciler, mut current, mut previous) = setup();
        let outcome = reconciler.reconcile(
            "acme",
            "fw_v1.ota",
            &image(1),
            &ExtraMetas::default(),
            &mut current,
            &mut previous,
        );

        assert_eq!(outcome.accepted_tier(), Some(Tier::Current));
        assert_eq!(current.len(), 1);
        assert!(previous.is_empty());
        assert!(temp_dir.path().join("images/acme/fw_v1.ota").is_file());
        assert!(current.get(0).unwrap().url.ends_with("/master/images/acme/fw_v1.ota"));
    }

    #[test]
    fn test_garbage_is_decode_rejection() {
        let (_temp_dir, reconciler, mut current, mut previous) = setup();
        let outcome = reconciler.reconcile(
            "acme",
            "junk.bin",
            &[0u8; 80],
            &ExtraMetas::default(),
            &mut current,
            &mut previous,
        );

        assert!(matches!(
            outcome,
            Outcome::Rejected(Rejection::Decode(OtaError::InvalidMagic))
        ));
        assert!(current.is_empty());
    }

    #[test]
    fn test_strict_size_rejects_inconsistent_image() {
        let temp_dir = TempDir::new().unwrap();
        let reconciler = Reconciler::new(
            TieredStore::new(CatalogLayout::with_root(temp_dir.path())),
            ReconcileOptions {
                verify_image_size: true,
            },
        );
        let mut current = Catalog::new(Tier::Current);
        let mut previous = Catalog::new(Tier::Previous);

        let mut raw = image(1);
        raw.push(0xFF);
        let bad = ImageHeader::new(4151, 1, 2, 100).encode();

        let ok = reconciler.reconcile("acme", "a.ota", &raw, &ExtraMetas::default(), &mut current, &mut previous);
        assert!(ok.is_accepted());

        let outcome = reconciler.reconcile("acme", "b.ota", &bad, &ExtraMetas::default(), &mut current, &mut previous);
        assert!(matches!(
            outcome,
            Outcome::Rejected(Rejection::Decode(OtaError::SizeMismatch { .. }))
        ));
        assert_eq!(current.len(), 1);
    }

    #[test]
    fn test_rejection_failure_classes() {
        let stale = Rejection::StaleAndSupersededInPrevious {
            current_version: 3,
            previous_version: 2,
        };
        assert!(!stale.is_failure());
        assert_eq!(stale.kind(), "stale");

        let conflict = Rejection::Conflict {
            index: 0,
            file_name: "a.ota".to_string(),
            file_version: 1,
        };
        assert!(conflict.is_failure());
        assert_eq!(
            conflict.to_string(),
            "conflict with current record #0 (a.ota, version 1)"
        );
    }
}
