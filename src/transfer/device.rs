//! Positioned I/O on the backing store and the cache device.
//!
//! Both tiers are opened read/write once at startup and shared by every
//! request thread. All transfers use `pread`/`pwrite` style calls so
//! concurrent requests never share a file cursor.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::{FileExt, FileTypeExt};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, trace};

use crate::cache::block::BLOCK_SIZE_U64;

/// Which tier a device plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    /// The slow device holding every block.
    Backing,
    /// The fast device holding promoted copies.
    Cache,
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceRole::Backing => write!(f, "block device"),
            DeviceRole::Cache => write!(f, "cache device"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("could not stat {role} {}: {source}", .path.display())]
    Stat {
        role: DeviceRole,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("could not open {role} {}: {source}", .path.display())]
    Open {
        role: DeviceRole,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{role} {} is not a regular or block special file", .path.display())]
    UnsupportedFileType { role: DeviceRole, path: PathBuf },

    #[error("failed to read {len} bytes at offset {offset} from {role}: {source}")]
    Read {
        role: DeviceRole,
        offset: u64,
        len: usize,
        source: std::io::Error,
    },

    #[error("failed to write {len} bytes at offset {offset} to {role}: {source}")]
    Write {
        role: DeviceRole,
        offset: u64,
        len: usize,
        source: std::io::Error,
    },
}

/// An open tier device.
#[derive(Debug)]
pub struct Device {
    file: File,
    role: DeviceRole,
    size_bytes: u64,
}

impl Device {
    /// Discover the size of `path` and open it read/write.
    ///
    /// Block special files are sized by seeking to their end, regular files
    /// by their metadata.
    pub fn open(path: &Path, role: DeviceRole) -> Result<Self, DeviceError> {
        let meta = std::fs::metadata(path).map_err(|source| DeviceError::Stat {
            role,
            path: path.to_path_buf(),
            source,
        })?;
        let file_type = meta.file_type();
        if !file_type.is_file() && !file_type.is_block_device() {
            return Err(DeviceError::UnsupportedFileType {
                role,
                path: path.to_path_buf(),
            });
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DeviceError::Open {
                role,
                path: path.to_path_buf(),
                source,
            })?;

        let size_bytes = if file_type.is_block_device() {
            file.seek(SeekFrom::End(0)).map_err(|source| DeviceError::Stat {
                role,
                path: path.to_path_buf(),
                source,
            })?
        } else {
            meta.len()
        };

        info!(
            role = %role,
            path = %path.display(),
            size_bytes,
            size_mib = size_bytes / (1024 * 1024),
            "Opened device"
        );

        Ok(Self::from_file(file, role, size_bytes))
    }

    /// Wrap an already-open handle of known size.
    pub fn from_file(file: File, role: DeviceRole, size_bytes: u64) -> Self {
        Self {
            file,
            role,
            size_bytes,
        }
    }

    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Capacity in whole blocks; a trailing partial block is ignored.
    pub fn capacity_blocks(&self) -> u64 {
        self.size_bytes / BLOCK_SIZE_U64
    }

    /// Fill `buf` from `offset`. A short read is an error.
    pub fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), DeviceError> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|source| DeviceError::Read {
                role: self.role,
                offset,
                len: buf.len(),
                source,
            })?;
        trace!(role = %self.role, offset, len = buf.len(), "pread");
        Ok(())
    }

    /// Write all of `buf` at `offset`. A short write is an error.
    pub fn write_all_at(&self, offset: u64, buf: &[u8]) -> Result<(), DeviceError> {
        self.file
            .write_all_at(buf, offset)
            .map_err(|source| DeviceError::Write {
                role: self.role,
                offset,
                len: buf.len(),
                source,
            })?;
        trace!(role = %self.role, offset, len = buf.len(), "pwrite");
        Ok(())
    }
}
