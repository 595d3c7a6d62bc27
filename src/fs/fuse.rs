//! FUSE adapter for the tiered file.
//!
//! A thin translation layer: kernel requests arrive via the `fuser` crate,
//! namespace questions are answered by [`Export`], file data goes through the
//! [`Pager`](crate::cache::pager::Pager). Namespace errors become errno
//! replies. Device errors from the pager are not recoverable: the process
//! logs them and exits, since the tiering state can no longer be trusted.

use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, MountOption, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cache::pager::{SharedPager, TierError};
use crate::fs::export::{Export, FsError, NodeAttr, NodeKind};

/// Attributes never change while mounted.
const ATTR_TTL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum FuseError {
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),
    #[error("mount I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kernel-facing mount switches.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub allow_other: bool,
    pub auto_unmount: bool,
}

fn to_fuser_file_type(kind: NodeKind) -> FileType {
    match kind {
        NodeKind::Directory => FileType::Directory,
        NodeKind::RegularFile => FileType::RegularFile,
    }
}

fn to_file_attr(attr: &NodeAttr) -> FileAttr {
    FileAttr {
        ino: attr.ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: SystemTime::UNIX_EPOCH,
        mtime: SystemTime::UNIX_EPOCH,
        ctime: SystemTime::UNIX_EPOCH,
        crtime: SystemTime::UNIX_EPOCH,
        kind: to_fuser_file_type(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn reject(op: &'static str, ino: u64, err: FsError) -> i32 {
    warn!(op, ino, error = %err, "Request rejected");
    err.to_errno()
}

/// Log a device failure and terminate the process.
fn fatal(op: &'static str, offset: u64, err: &TierError) -> ! {
    error!(op, offset, error = %err, "Unrecoverable tiering I/O failure, exiting");
    std::process::exit(1);
}

/// The mounted filesystem.
pub struct TierFs {
    pager: SharedPager,
    export: Export,
}

impl TierFs {
    pub fn new(pager: SharedPager, file_name: impl Into<String>) -> Self {
        let export = Export::new(file_name, pager.backing_blocks());
        Self { pager, export }
    }
}

impl Filesystem for TierFs {
    fn destroy(&mut self) {
        let stats = self.pager.stats();
        info!(
            cache_hits = stats.cache_hits,
            backing_reads = stats.backing_reads,
            promotions = stats.promotions,
            evictions = stats.evictions,
            writes = stats.writes,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            "Unmounting"
        );
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.export.lookup(parent, name, req.uid(), req.gid()) {
            Ok(attr) => reply.entry(&ATTR_TTL, &to_file_attr(&attr), 0),
            Err(e) => reply.error(reject("lookup", parent, e)),
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.export.getattr(ino, req.uid(), req.gid()) {
            Ok(attr) => reply.attr(&ATTR_TTL, &to_file_attr(&attr)),
            Err(e) => reply.error(reject("getattr", ino, e)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.export.check_open(ino, flags) {
            // Stateless open: no file handles are tracked.
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(reject("open", ino, e)),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let byte_offset = u64::try_from(offset).unwrap_or(0);
        let len = match self.export.clamp_read(ino, byte_offset, size) {
            Ok(len) => len,
            Err(e) => return reply.error(reject("read", ino, e)),
        };
        let mut buf = vec![0u8; len];
        if let Err(e) = self.pager.read(byte_offset, &mut buf) {
            fatal("read", byte_offset, &e);
        }
        reply.data(&buf);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let byte_offset = u64::try_from(offset).unwrap_or(0);
        if let Err(e) = self.export.check_write(ino, byte_offset, data.len()) {
            return reply.error(reject("write", ino, e));
        }
        match self.pager.write(byte_offset, data) {
            Ok(written) => reply.written(u32::try_from(written).unwrap_or(u32::MAX)),
            Err(e) => fatal("write", byte_offset, &e),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        match self.export.readdir(ino, offset) {
            Ok(entries) => {
                for entry in &entries {
                    let full = reply.add(
                        entry.ino,
                        entry.offset,
                        to_fuser_file_type(entry.kind),
                        &entry.name,
                    );
                    if full {
                        break;
                    }
                }
                reply.ok();
            }
            Err(e) => reply.error(reject("readdir", ino, e)),
        }
    }
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("blockfs".to_owned()),
        MountOption::Subtype("tier".to_owned()),
        MountOption::RW,
        MountOption::NoAtime,
    ];
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

/// Mount `fs` at `mountpoint`, blocking until it is unmounted.
pub fn mount(fs: TierFs, mountpoint: &Path, options: &MountOptions) -> Result<(), FuseError> {
    if mountpoint.as_os_str().is_empty() {
        return Err(FuseError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    let fuse_opts = build_mount_options(options);
    info!(
        mountpoint = %mountpoint.display(),
        file = fs.export.file_name(),
        size = fs.export.file_size(),
        "Mounting"
    );
    fuser::mount2(fs, mountpoint, &fuse_opts)?;
    Ok(())
}
