//! OTA Catalog - firmware image catalog for over-the-air upgrades.
//!
//! Decodes the standard OTA image header, and keeps two manifests in step with
//! the files on disk: a "current" tier offered for upgrades and a "previous" tier
//! offered for downgrades.
//!
//! The library is synchronous and never touches the network. Images are handed
//! in as bytes; callers own retrieval.
//!
//! # Example
//!
//! ```rust,no_run
//! use ota_catalog::{CatalogLayout, CatalogSession, ExtraMetas, ReconcileOptions};
//!
//! fn main() -> ota_catalog::Result<()> {
//!     let layout = CatalogLayout::with_root("/srv/zigbee-ota");
//!     let mut session = CatalogSession::open(layout, ReconcileOptions::default())?;
//!
//!     let raw = std::fs::read("ZLinky_router_v14.ota")?;
//!     let outcome = session.reconcile("Lixee", "ZLinky_router_v14.ota", &raw, &ExtraMetas::default());
//!     println!("{}", outcome);
//!
//!     session.commit()
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod image;
pub mod integrity;
pub mod reconcile;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use catalog::{
    classify, find_candidates, find_for_device, find_match, CandidateQuery, Catalog, CatalogRecord,
    DeviceHints, DeviceInfo, ExtraMetas, ExtraMetasSource, ImageStatus, InstalledImage,
};
pub use config::{CatalogDefaults, CatalogLayout, ReconcileOptions, Tier};
pub use error::{OtaError, Result};
pub use image::{
    compute_sha512, decode_at_magic, decode_header, identify_stack, parse_sub_elements, verify_image_size,
    ImageHeader, StackInfo, SubElement,
};
pub use integrity::{DigestMismatch, MissingImage, UntrackedReport};
pub use reconcile::{Outcome, Reconciler, Rejection};
pub use session::{BatchEntry, BatchReport, BatchSummary, CatalogSession};
pub use store::{FileJournal, TieredStore};
