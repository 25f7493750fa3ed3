//! `packrt` smoke-test binary: wires the allocator, scheduler, package
//! registry, and resource manager together against a real config and
//! (optionally) a real archive, then exercises one load/sync/free cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use packrt::alloc::{Allocator, Flags};
use packrt::config::Config;
use packrt::ioq::FileReadScheduler;
use packrt::pkg::{PkgArchive, Registry};
use packrt::res::ResourceManager;

#[derive(Parser, Debug)]
#[command(name = "packrt")]
#[command(about = "Resource/IO substrate smoke test")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "packrt.toml")]
    config: PathBuf,

    /// Optional PKG archive to mount at the root prefix and probe
    #[arg(short, long)]
    archive: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "packrt=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true).with_file(true).with_line_number(true))
        .init();

    let args = Args::parse();
    info!(config = ?args.config, "starting packrt smoke test");

    let config = match Config::load(&args.config).await {
        Ok(c) => c,
        Err(e) => {
            info!(error = %e, "no config file found, using defaults");
            Config::default()
        }
    };

    let allocator = Arc::new(Allocator::new(config.main_pool_bytes, config.temp_pool_bytes)?);
    let scheduler = Arc::new(FileReadScheduler::new(
        config.max_read_requests,
        config.blocksize,
        Duration::from_millis(config.priority_time_ms),
        Duration::from_millis(config.priority_delay_ms),
    ));

    let mut registry = Registry::new();
    if let Some(archive_path) = &args.archive {
        let archive = PkgArchive::open("", archive_path)?;
        registry.register(Arc::new(archive));
        info!(path = ?archive_path, "mounted package archive");
    }
    let registry = Arc::new(registry);

    let manager = ResourceManager::with_capacity_hint(
        Arc::clone(&allocator),
        Arc::clone(&scheduler),
        Arc::clone(&registry),
        config.resource_slots,
    );

    let slot = manager.strdup("packrt smoke test", Flags::empty())?;
    info!(slot, "registered a test resource");
    manager.free(slot);

    info!("smoke test complete");
    Ok(())
}
