//! Centralized configuration for the OTA catalog.
//!
//! Compile-time defaults live on [`CatalogDefaults`]; [`CatalogLayout`] carries the
//! runtime values (root directory, published URL prefix, per-tier names) and can be
//! loaded from a JSON file.

use crate::catalog::atomic_read_json;
use crate::error::{OtaError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default names and locations.
pub struct CatalogDefaults;

impl CatalogDefaults {
    pub const BASE_URL: &'static str = "https://github.com/Koenkk/zigbee-OTA/raw/";
    pub const BRANCH: &'static str = "master";
    /// Images used by the upgrade path.
    pub const CURRENT_DIR_NAME: &'static str = "images";
    /// Images used by the downgrade path.
    pub const PREVIOUS_DIR_NAME: &'static str = "images1";
    pub const CURRENT_MANIFEST_FILENAME: &'static str = "index.json";
    pub const PREVIOUS_MANIFEST_FILENAME: &'static str = "index1.json";
    pub const LOCK_FILENAME: &'static str = ".ota-catalog.lock";
    pub const TRASH_DIR_NAME: &'static str = ".ota-trash";
}

/// One of the two catalog partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Latest known-good images (upgrade target).
    Current,
    /// Immediately prior images (downgrade target).
    Previous,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Current => "current",
            Tier::Previous => "previous",
        }
    }

    pub fn dir_name(&self) -> &'static str {
        match self {
            Tier::Current => CatalogDefaults::CURRENT_DIR_NAME,
            Tier::Previous => CatalogDefaults::PREVIOUS_DIR_NAME,
        }
    }

    pub fn manifest_file_name(&self) -> &'static str {
        match self {
            Tier::Current => CatalogDefaults::CURRENT_MANIFEST_FILENAME,
            Tier::Previous => CatalogDefaults::PREVIOUS_MANIFEST_FILENAME,
        }
    }

    /// The opposite tier.
    pub fn other(&self) -> Tier {
        match self {
            Tier::Current => Tier::Previous,
            Tier::Previous => Tier::Current,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "current" | "base" => Ok(Tier::Current),
            "previous" | "prev" => Ok(Tier::Previous),
            other => Err(OtaError::Validation {
                field: "tier".to_string(),
                message: format!("unknown tier '{}'", other),
            }),
        }
    }
}

/// Runtime layout of a catalog on disk and its published URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogLayout {
    /// Directory holding both manifests and both storage trees.
    pub root: PathBuf,
    /// URL prefix under which the repository content is published.
    pub base_url: String,
    pub branch: String,
    pub current_dir_name: String,
    pub previous_dir_name: String,
    pub current_manifest: String,
    pub previous_manifest: String,
}

impl Default for CatalogLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            base_url: CatalogDefaults::BASE_URL.to_string(),
            branch: CatalogDefaults::BRANCH.to_string(),
            current_dir_name: Tier::Current.dir_name().to_string(),
            previous_dir_name: Tier::Previous.dir_name().to_string(),
            current_manifest: Tier::Current.manifest_file_name().to_string(),
            previous_manifest: Tier::Previous.manifest_file_name().to_string(),
        }
    }
}

impl CatalogLayout {
    /// Default layout rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a layout from a JSON file; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        atomic_read_json(path)?.ok_or_else(|| OtaError::Config {
            message: format!("Config file not found: {}", path.display()),
        })
    }

    pub fn dir_name(&self, tier: Tier) -> &str {
        match tier {
            Tier::Current => &self.current_dir_name,
            Tier::Previous => &self.previous_dir_name,
        }
    }

    /// Root of the storage tree for `tier`.
    pub fn tier_root(&self, tier: Tier) -> PathBuf {
        self.root.join(self.dir_name(tier))
    }

    pub fn manifest_path(&self, tier: Tier) -> PathBuf {
        match tier {
            Tier::Current => self.root.join(&self.current_manifest),
            Tier::Previous => self.root.join(&self.previous_manifest),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(CatalogDefaults::LOCK_FILENAME)
    }

    pub fn trash_dir(&self) -> PathBuf {
        self.root.join(CatalogDefaults::TRASH_DIR_NAME)
    }

    /// Prefix shared by every URL that points into this repository.
    pub fn local_url_prefix(&self) -> String {
        format!("{}{}", self.base_url, self.branch)
    }
}

/// Switches that change how strictly images are checked before acceptance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileOptions {
    /// Reject images whose sub-element lengths do not add up to `totalImageSize`.
    pub verify_image_size: bool,
}
