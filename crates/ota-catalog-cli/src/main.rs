//! OTA Catalog CLI - batch runner over a firmware catalog checkout.
//!
//! Owns both catalogs for one run: images are reconciled one after another and
//! the manifests are written once at the end.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ota_catalog::{CatalogLayout, Tier};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "ota-catalog")]
#[command(about = "Maintain a two-tier OTA firmware image catalog")]
struct Args {
    /// Catalog root holding the manifests and image directories
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// JSON file with layout settings (base URL, branch, directory names)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// URL prefix under which the catalog is published
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Branch segment of published URLs
    #[arg(long, global = true)]
    branch: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the decoded header of an image as JSON
    Header {
        file: PathBuf,

        /// Also list sub-elements and the identified firmware stack
        #[arg(long)]
        elements: bool,
    },

    /// Reconcile images into the catalog
    Add {
        /// Directory key the images are stored under
        #[arg(long)]
        manufacturer: String,

        /// Extra metas as inline JSON, or @FILE to read them from a file
        #[arg(long)]
        extra_metas: Option<String>,

        /// Reject images whose sub-elements do not add up to the declared size
        #[arg(long)]
        strict_size: bool,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Check that manifests and image directories agree
    Check {
        /// Remove records whose image file is missing
        #[arg(long)]
        prune: bool,

        /// Recompute and compare SHA-512 digests
        #[arg(long)]
        digests: bool,
    },

    /// List records for an image type and manufacturer code, oldest first
    Find {
        tier: Tier,
        image_type: u16,
        manufacturer_code: u16,

        #[arg(long)]
        model_id: Option<String>,

        #[arg(long)]
        manufacturer_name: Option<String>,
    },
}

impl Args {
    /// Layout from the config file (if any) with command-line overrides applied.
    fn layout(&self) -> Result<CatalogLayout> {
        let mut layout = match &self.config {
            Some(path) => CatalogLayout::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => CatalogLayout::default(),
        };

        if let Some(root) = &self.root {
            layout.root = root.clone();
        }
        if let Some(base_url) = &self.base_url {
            layout.base_url = base_url.clone();
        }
        if let Some(branch) = &self.branch {
            layout.branch = branch.clone();
        }

        Ok(layout)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug when set
    let default_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match &args.command {
        Command::Header { file, elements } => commands::header(file, *elements),
        Command::Add {
            manufacturer,
            extra_metas,
            strict_size,
            files,
        } => {
            let layout = args.layout()?;
            debug!("Catalog root: {}", layout.root.display());
            commands::add(layout, manufacturer, extra_metas.as_deref(), *strict_size, files)
        }
        Command::Check { prune, digests } => commands::check(args.layout()?, *prune, *digests),
        Command::Find {
            tier,
            image_type,
            manufacturer_code,
            model_id,
            manufacturer_name,
        } => commands::find(
            &args.layout()?,
            *tier,
            *image_type,
            *manufacturer_code,
            model_id.clone(),
            manufacturer_name.clone(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = temp_dir.path().join("ota.json");
        std::fs::write(&config, r#"{"branch": "main", "root": "/from/config"}"#).unwrap();

        let args = Args::parse_from([
            "ota-catalog",
            "--config",
            config.to_str().unwrap(),
            "--root",
            "/from/flag",
            "check",
        ]);
        let layout = args.layout().unwrap();
        assert_eq!(layout.root, PathBuf::from("/from/flag"));
        assert_eq!(layout.branch, "main");
    }

    #[test]
    fn test_parse_find() {
        let args = Args::parse_from(["ota-catalog", "find", "previous", "287", "4107", "--model-id", "LCT001"]);
        match args.command {
            Command::Find {
                tier,
                image_type,
                manufacturer_code,
                model_id,
                ..
            } => {
                assert_eq!(tier, Tier::Previous);
                assert_eq!(image_type, 287);
                assert_eq!(manufacturer_code, 4107);
                assert_eq!(model_id.as_deref(), Some("LCT001"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
