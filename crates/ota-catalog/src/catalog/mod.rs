//! Catalog records, their persistence, and the lookups run against them.

mod atomic;
mod extra_metas;
mod manifest;
pub mod matcher;
pub mod query;
mod record;
mod status;

pub use atomic::{atomic_read_json, atomic_write_json};
pub use extra_metas::{ExtraMetas, ExtraMetasSource};
pub use manifest::Catalog;
pub use matcher::{count_matches, find_match, find_match_checked, is_same_identity};
pub use query::{find_candidates, find_for_device, CandidateQuery, DeviceHints, DeviceInfo, InstalledImage};
pub use record::CatalogRecord;
pub use status::{classify, classify_version, ImageStatus};
