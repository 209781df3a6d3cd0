//! Shared fixtures for integration tests.
//!
//! No binary fixtures are shipped; images are synthesized from a header plus
//! sub-elements so their sizes are always self-consistent.

#![allow(dead_code)]

use ota_catalog::{
    Catalog, CatalogLayout, CatalogRecord, ExtraMetas, ImageHeader, Outcome, ReconcileOptions, Reconciler, Tier,
    TieredStore,
};
use sha2::{Digest, Sha512};
use std::path::PathBuf;
use tempfile::TempDir;

pub const MANUFACTURER: &str = "acme";
pub const MANUFACTURER_CODE: u16 = 4151;
pub const IMAGE_TYPE: u16 = 1;

/// Builds a well-formed OTA image.
pub struct ImageBuilder {
    header: ImageHeader,
    elements: Vec<(u16, Vec<u8>)>,
    prefix: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(manufacturer_code: u16, image_type: u16, file_version: u32) -> Self {
        Self {
            header: ImageHeader::new(manufacturer_code, image_type, file_version, 0),
            elements: Vec::new(),
            prefix: Vec::new(),
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.header = self.header.with_header_string(label);
        self
    }

    pub fn hardware_versions(mut self, min: u16, max: u16) -> Self {
        self.header = self.header.with_hardware_versions(min, max);
        self
    }

    pub fn element(mut self, tag_id: u16, data: Vec<u8>) -> Self {
        self.elements.push((tag_id, data));
        self
    }

    /// Upgrade-image element of `len` bytes with a repeating, magic-free pattern.
    pub fn payload(self, len: usize) -> Self {
        let data = (0..len).map(|i| (i % 251) as u8).collect();
        self.element(0x0000, data)
    }

    /// Bytes placed before the identifier, as some vendors do.
    pub fn vendor_prefix(mut self, prefix: &[u8]) -> Self {
        self.prefix = prefix.to_vec();
        self
    }

    pub fn header(&self) -> ImageHeader {
        let mut header = self.header.clone();
        let body: usize = self.elements.iter().map(|(_, data)| 6 + data.len()).sum();
        header.total_image_size = (usize::from(header.header_length) + body) as u32;
        header
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.prefix.clone();
        out.extend_from_slice(&self.header().encode());
        for (tag_id, data) in &self.elements {
            out.extend_from_slice(&tag_id.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }
}

/// Small image of the default identity at `version`.
pub fn image(version: u32) -> Vec<u8> {
    ImageBuilder::new(MANUFACTURER_CODE, IMAGE_TYPE, version)
        .label("acme router")
        .payload(32 + version as usize)
        .build()
}

/// Image matching the recorded ZLinky router v14 header: 249694 bytes, no optional fields.
pub fn boundary_fixture() -> Vec<u8> {
    ImageBuilder::new(4151, 1, 14)
        .label("OM15081-RTR-JN5189-0000000000000")
        .payload(249_694 - 56 - 6)
        .build()
}

pub fn sha512_hex(bytes: &[u8]) -> String {
    hex::encode(Sha512::digest(bytes))
}

pub fn file_name(version: u32) -> String {
    format!("fw_v{}.ota", version)
}

/// A catalog root in a temp dir with both tiers loaded in memory.
pub struct Fixture {
    pub temp_dir: TempDir,
    pub reconciler: Reconciler,
    pub current: Catalog,
    pub previous: Catalog,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(ReconcileOptions::default())
    }

    pub fn with_options(options: ReconcileOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = TieredStore::new(CatalogLayout::with_root(temp_dir.path()));
        Self {
            temp_dir,
            reconciler: Reconciler::new(store, options),
            current: Catalog::new(Tier::Current),
            previous: Catalog::new(Tier::Previous),
        }
    }

    pub fn layout(&self) -> CatalogLayout {
        CatalogLayout::with_root(self.temp_dir.path())
    }

    pub fn reconcile(&mut self, file_name: &str, raw: &[u8]) -> Outcome {
        self.reconcile_with(file_name, raw, &ExtraMetas::default())
    }

    pub fn reconcile_with(&mut self, file_name: &str, raw: &[u8], extra_metas: &ExtraMetas) -> Outcome {
        self.reconciler.reconcile(
            MANUFACTURER,
            file_name,
            raw,
            extra_metas,
            &mut self.current,
            &mut self.previous,
        )
    }

    /// Submit the default-identity image at `version`.
    pub fn submit(&mut self, version: u32) -> Outcome {
        self.reconcile(&file_name(version), &image(version))
    }

    /// Put a file and its record straight into `tier`, bypassing reconciliation.
    pub fn seed(&mut self, tier: Tier, version: u32) {
        let name = file_name(version);
        let raw = image(version);
        let store = self.reconciler.store();
        let path = store.tier_dir(tier, MANUFACTURER).unwrap().join(&name);
        std::fs::write(&path, &raw).unwrap();

        let (_, header) = ota_catalog::decode_at_magic(&raw).unwrap();
        let record = CatalogRecord::from_image(
            &header,
            &raw,
            &name,
            store.url_for(tier, MANUFACTURER, &name),
            &ExtraMetas::default(),
        );
        match tier {
            Tier::Current => self.current.push(record),
            Tier::Previous => self.previous.push(record),
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.temp_dir.path().join(relative)
    }

    pub fn versions(catalog: &Catalog) -> Vec<u32> {
        catalog.iter().map(|record| record.file_version).collect()
    }
}
