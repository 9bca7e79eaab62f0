//! scan-compensate - contact-referenced correction for scanned bed meshes
//!
//! A non-contact probe scans the bed quickly but reads with a bias that varies
//! across the bed. This service keeps a trusted contact-probed profile and,
//! on request, re-samples it onto the active scan mesh so the stored scan
//! matches the real nozzle-to-bed distance.

mod bed_mesh;
mod compensation;
mod config;
mod console;
mod error;
mod interpolation;
mod mesh;
mod profile;
mod server;
mod storage;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::bed_mesh::BedMesh;
use crate::compensation::ScanCompensation;
use crate::console::ConsoleLog;
use crate::profile::ProfileStore;
use crate::server::AppState;
use crate::storage::SectionStore;

/// scan-compensate - correct scanned bed meshes against a contact profile
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Web server host (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Web server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Apply compensation once and exit instead of serving
    #[arg(long)]
    apply: bool,

    /// Reference profile for --apply (defaults to the configured reference)
    #[arg(long, requires = "apply")]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("scan-compensate v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load_or_create(&args.config)?;

    let storage_path = config.storage_path(&args.config);
    let storage = SectionStore::load(&storage_path)
        .with_context(|| format!("Failed to load mesh storage {:?}", storage_path))?;
    let profiles = Arc::new(
        ProfileStore::load(&storage, &config.mesh.section_prefix)
            .context("Failed to load stored mesh profiles")?,
    );
    for name in profiles.incompatible_profiles() {
        info!("Profile [{}] ignored, stored with an incompatible version", name);
    }

    let mut bed_mesh = BedMesh::new(storage, config.mesh.section_prefix.clone());
    if let Some(active) = &config.mesh.active_profile {
        match bed_mesh.load_profile(&profiles, active) {
            Ok(true) => {}
            Ok(false) => info!("Active profile [{}] not found, no mesh loaded", active),
            Err(e) => tracing::error!("Failed to load active profile [{}]: {}", active, e),
        }
    }

    let compensation = ScanCompensation::new(profiles, config.mesh.default_reference.clone());
    let state = Arc::new(AppState::new(
        compensation,
        bed_mesh,
        ConsoleLog::new(config.console.capacity),
    ));

    if args.apply {
        let outcome = state.apply(args.profile.as_deref())?;
        info!("{}", outcome.message());
        return Ok(());
    }

    let host = args.host.unwrap_or(config.server.host);
    let port = args.port.unwrap_or(config.server.port);
    let addr = format!("{}:{}", host, port);
    info!("Starting web server at http://{}", addr);

    server::run_server(&addr, state).await
}
