//! Subcommand handlers. Results go to stdout as JSON, logs go to stderr.

use anyhow::{bail, Context, Result};
use ota_catalog::{
    decode_at_magic, find_candidates, identify_stack, parse_sub_elements, CandidateQuery, Catalog, CatalogLayout,
    CatalogSession, ExtraMetasSource, ReconcileOptions, Tier,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `--extra-metas`: inline JSON, or `@path` to read the JSON from a file.
pub fn parse_extra_metas(arg: Option<&str>) -> Result<ExtraMetasSource> {
    let Some(arg) = arg else {
        return Ok(ExtraMetasSource::default());
    };

    let json = match arg.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("Failed to read extra metas from {}", path))?,
        None => arg.to_string(),
    };

    Ok(ExtraMetasSource::from_json_str(&json)?)
}

pub fn header(file: &Path, elements: bool) -> Result<()> {
    let raw = fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let (offset, header) = decode_at_magic(&raw)?;

    let mut output = json!({
        "offset": offset,
        "header": header,
    });

    if elements {
        let image = &raw[offset..];
        let sub_elements = parse_sub_elements(image, &header);
        let stack = identify_stack(&header, &sub_elements);
        output["elements"] = serde_json::to_value(&sub_elements)?;
        output["stack"] = serde_json::to_value(&stack)?;
    }

    print_json(&output)
}

pub fn add(
    layout: CatalogLayout,
    manufacturer: &str,
    extra_metas: Option<&str>,
    strict_size: bool,
    files: &[PathBuf],
) -> Result<()> {
    // Bad metas abort the run before the catalog is locked.
    let source = parse_extra_metas(extra_metas)?;
    let options = ReconcileOptions {
        verify_image_size: strict_size,
    };

    let mut session = CatalogSession::open(layout, options)?;
    let report = session.process_files(manufacturer, files, &source)?;

    let entries: Vec<Value> = report
        .entries
        .iter()
        .map(|entry| {
            json!({
                "fileName": entry.file_name,
                "accepted": entry.outcome.accepted_tier(),
                "rejection": entry.outcome.rejection().map(|r| r.kind()),
                "message": entry.outcome.to_string(),
            })
        })
        .collect();
    print_json(&json!({
        "summary": report.summary(),
        "entries": entries,
    }))?;

    session.commit()?;

    if report.has_failures() {
        let summary = report.summary();
        bail!(
            "{} conflicts and {} failures in {} images",
            summary.conflicts,
            summary.failed,
            report.entries.len()
        );
    }
    Ok(())
}

pub fn check(layout: CatalogLayout, prune: bool, digests: bool) -> Result<()> {
    let mut session = CatalogSession::open(layout, ReconcileOptions::default())?;
    let mut tiers = serde_json::Map::new();
    let mut clean = true;

    for tier in [Tier::Current, Tier::Previous] {
        let missing = session.check_backing_files(tier);
        let untracked = session.find_untracked(tier)?;
        let mismatches = if digests { session.verify_digests(tier) } else { Vec::new() };

        let pruned = if prune && !missing.is_empty() {
            session.prune_missing(tier).len()
        } else {
            0
        };

        if !missing.is_empty() || !untracked.is_clean() || !mismatches.is_empty() {
            clean = false;
        }

        tiers.insert(
            tier.to_string(),
            json!({
                "missing": missing,
                "untracked": untracked,
                "digestMismatches": mismatches,
                "pruned": pruned,
            }),
        );
    }

    print_json(&Value::Object(tiers))?;

    if prune {
        session.commit()?;
        info!("Manifests written");
    }

    if !clean {
        warn!("Catalog is not consistent with its image directories");
    }
    Ok(())
}

pub fn find(
    layout: &CatalogLayout,
    tier: Tier,
    image_type: u16,
    manufacturer_code: u16,
    model_id: Option<String>,
    manufacturer_name: Option<String>,
) -> Result<()> {
    let catalog = Catalog::load(&layout.manifest_path(tier), tier)?;
    let query = CandidateQuery {
        image_type,
        manufacturer_code,
        model_id,
        manufacturer_name,
    };
    print_json(&find_candidates(catalog.records(), &query))
}
