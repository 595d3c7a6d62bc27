//! Runtime configuration for blockfs-tier.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All placement knobs (admission thresholds, write amplification, slot hashing)
//! live here. Device paths given on the command line override the file.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::slot_map::SlotHashing;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "blockfs-tier",
    about = "Export a block device accelerated by a cache device as a single FUSE file"
)]
pub struct Cli {
    /// Cache (fast) device or image file.
    #[arg(short = 'c', long)]
    pub cache_device: Option<PathBuf>,

    /// Block (slow, backing) device or image file.
    #[arg(short = 'b', long)]
    pub block_device: Option<PathBuf>,

    /// Directory to mount the filesystem on.
    pub mountpoint: PathBuf,

    /// Path to configuration file (JSON).
    #[arg(long, default_value = "blockfs.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Allow users other than the mounting user to access the file.
    #[arg(long)]
    pub allow_other: bool,

    /// Unmount automatically when the process exits.
    #[arg(long)]
    pub auto_unmount: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0} device not specified")]
    MissingDevice(&'static str),

    #[error("invalid policy setting: {0}")]
    InvalidPolicy(String),

    #[error("invalid exported file name {0:?}")]
    InvalidFileName(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device paths.
    pub devices: DeviceConfig,

    /// Admission policy tuning.
    pub policy: PolicyConfig,

    /// Slot map settings.
    pub slots: SlotConfig,

    /// Mount / presentation settings.
    pub mount: MountConfig,
}

/// Paths of the two tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Fast tier.
    pub cache_device: Option<PathBuf>,

    /// Slow tier holding the authoritative copy of every block.
    pub block_device: Option<PathBuf>,
}

/// Promotion thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum `reads + writes` before a block is considered for promotion.
    pub min_access_count: f64,

    /// Minimum `(reads - writes) / (reads + writes)` for promotion.
    pub min_read_write_ratio: f64,

    /// Blocks with more writes than this are never promoted.
    pub max_write_count: f64,

    /// Fraction of the read count added to the write count on every write.
    pub write_amplification: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_access_count: 512.0,
            min_read_write_ratio: 0.8,
            max_write_count: 2048.0,
            write_amplification: 0.7,
        }
    }
}

/// Slot map settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotConfig {
    /// How a block address is reduced to a slot index.
    pub hashing: SlotHashing,
}

/// Presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MountConfig {
    /// Name of the single file exported in the mount root.
    pub file_name: String,

    /// Pass `allow_other` to the kernel.
    pub allow_other: bool,

    /// Pass `auto_unmount` to the kernel.
    pub auto_unmount: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            file_name: "blockfs".to_string(),
            allow_other: false,
            auto_unmount: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides on top of the file configuration.
    pub fn merge_cli(mut self, cli: &Cli) -> Self {
        if let Some(path) = &cli.cache_device {
            self.devices.cache_device = Some(path.clone());
        }
        if let Some(path) = &cli.block_device {
            self.devices.block_device = Some(path.clone());
        }
        self.mount.allow_other |= cli.allow_other;
        self.mount.auto_unmount |= cli.auto_unmount;
        self
    }

    /// Both device paths, or an error naming the missing one.
    pub fn device_paths(&self) -> Result<(&Path, &Path), ConfigError> {
        let cache = self
            .devices
            .cache_device
            .as_deref()
            .ok_or(ConfigError::MissingDevice("cache"))?;
        let block = self
            .devices
            .block_device
            .as_deref()
            .ok_or(ConfigError::MissingDevice("block"))?;
        Ok((cache, block))
    }

    /// Reject settings that would make the policy meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.policy;
        if !(p.min_access_count >= 0.0) {
            return Err(ConfigError::InvalidPolicy(format!(
                "min_access_count must be >= 0, got {}",
                p.min_access_count
            )));
        }
        if !(-1.0..=1.0).contains(&p.min_read_write_ratio) {
            return Err(ConfigError::InvalidPolicy(format!(
                "min_read_write_ratio must be within [-1, 1], got {}",
                p.min_read_write_ratio
            )));
        }
        if !(p.max_write_count >= 0.0) {
            return Err(ConfigError::InvalidPolicy(format!(
                "max_write_count must be >= 0, got {}",
                p.max_write_count
            )));
        }
        if !(p.write_amplification >= 0.0) {
            return Err(ConfigError::InvalidPolicy(format!(
                "write_amplification must be >= 0, got {}",
                p.write_amplification
            )));
        }
        let name = &self.mount.file_name;
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(ConfigError::InvalidFileName(name.clone()));
        }
        Ok(())
    }
}
