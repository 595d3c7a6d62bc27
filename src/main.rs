//! blockfs-tier: mount a tiered block file for use with a loop device.
//!
//!   blockfs-tier -c /dev/nvme0n1p3 -b /dev/sdb /mnt/blockfs
//!   losetup /dev/loop0 /mnt/blockfs/blockfs

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use blockfs_tier::cache::pager::Pager;
use blockfs_tier::config::{Cli, Config, LogFormat};
use blockfs_tier::fs::fuse::{mount, MountOptions, TierFs};
use blockfs_tier::transfer::device::{Device, DeviceRole};

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "blockfs_tier=debug"
    } else {
        "blockfs_tier=info"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init(),
    }

    info!("blockfs-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?.merge_cli(&cli);
    config.validate()?;
    let (cache_path, block_path) = config.device_paths()?;

    info!(
        cache_device = %cache_path.display(),
        block_device = %block_path.display(),
        min_access_count = config.policy.min_access_count,
        min_read_write_ratio = config.policy.min_read_write_ratio,
        max_write_count = config.policy.max_write_count,
        "Configuration loaded"
    );

    // Size and open both tiers.
    let cache = Device::open(cache_path, DeviceRole::Cache)
        .with_context(|| format!("opening cache device {}", cache_path.display()))?;
    let backing = Device::open(block_path, DeviceRole::Backing)
        .with_context(|| format!("opening block device {}", block_path.display()))?;

    // Build the tiering state.
    let pager = Arc::new(Pager::new(backing, cache, &config).context("initializing tiering state")?);

    let fs = TierFs::new(pager, config.mount.file_name.clone());
    let options = MountOptions {
        allow_other: config.mount.allow_other,
        auto_unmount: config.mount.auto_unmount,
    };
    mount(fs, &cli.mountpoint, &options)
        .with_context(|| format!("mounting on {}", cli.mountpoint.display()))?;

    Ok(())
}
