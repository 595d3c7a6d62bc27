//! The namespace presented to the kernel: one directory holding one file.
//!
//! Everything here is fixed at startup. The only thing with state behind it
//! is the file's data, which the FUSE adapter hands to the pager.

use std::ffi::OsStr;

use thiserror::Error;

use crate::cache::block::BLOCK_SIZE_U64;

/// Inode of the mount root.
pub const ROOT_INO: u64 = 1;

/// Inode of the exported file.
pub const FILE_INO: u64 = 2;

/// Errors the presentation layer reports back to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,

    #[error("permission denied")]
    PermissionDenied,

    #[error("request extends past the fixed file size")]
    TooLarge,
}

impl FsError {
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::PermissionDenied => libc::EACCES,
            FsError::TooLarge => libc::EFBIG,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    RegularFile,
}

/// Attributes of one of the two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAttr {
    pub ino: u64,
    pub kind: NodeKind,
    pub size: u64,
    pub blocks: u64,
    pub perm: u16,
    pub nlink: u32,
    pub blksize: u32,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    /// Offset of the entry following this one.
    pub offset: i64,
    pub kind: NodeKind,
    pub name: String,
}

/// The single exported file and its root directory.
#[derive(Debug, Clone)]
pub struct Export {
    file_name: String,
    file_blocks: u64,
}

impl Export {
    pub fn new(file_name: impl Into<String>, file_blocks: u64) -> Self {
        Self {
            file_name: file_name.into(),
            file_blocks,
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_size(&self) -> u64 {
        self.file_blocks * BLOCK_SIZE_U64
    }

    /// Resolve `name` inside `parent`.
    pub fn lookup(&self, parent: u64, name: &OsStr, uid: u32, gid: u32) -> Result<NodeAttr, FsError> {
        if parent == ROOT_INO && name == OsStr::new(&self.file_name) {
            self.getattr(FILE_INO, uid, gid)
        } else {
            Err(FsError::NotFound)
        }
    }

    /// Attributes reported for `ino`, owned by the requesting user.
    pub fn getattr(&self, ino: u64, uid: u32, gid: u32) -> Result<NodeAttr, FsError> {
        let blksize = BLOCK_SIZE_U64 as u32;
        match ino {
            ROOT_INO => Ok(NodeAttr {
                ino,
                kind: NodeKind::Directory,
                size: BLOCK_SIZE_U64,
                blocks: 1,
                perm: 0o755,
                nlink: 2,
                blksize,
                uid,
                gid,
            }),
            FILE_INO => Ok(NodeAttr {
                ino,
                kind: NodeKind::RegularFile,
                size: self.file_size(),
                blocks: self.file_blocks,
                perm: 0o666,
                nlink: 1,
                blksize,
                uid,
                gid,
            }),
            _ => Err(FsError::NotFound),
        }
    }

    /// Entries of directory `ino` after position `offset`.
    pub fn readdir(&self, ino: u64, offset: i64) -> Result<Vec<DirEntry>, FsError> {
        if ino != ROOT_INO {
            return Err(FsError::NotFound);
        }
        let entries = [
            (ROOT_INO, NodeKind::Directory, "."),
            (ROOT_INO, NodeKind::Directory, ".."),
            (FILE_INO, NodeKind::RegularFile, self.file_name.as_str()),
        ];
        Ok(entries
            .iter()
            .enumerate()
            .skip(usize::try_from(offset).unwrap_or(0))
            .map(|(i, (ino, kind, name))| DirEntry {
                ino: *ino,
                offset: i as i64 + 1,
                kind: *kind,
                name: (*name).to_string(),
            })
            .collect())
    }

    /// Only read/write opens of the exported file are accepted; the loop
    /// driver never opens it any other way.
    pub fn check_open(&self, ino: u64, flags: i32) -> Result<(), FsError> {
        if ino != FILE_INO {
            return Err(FsError::NotFound);
        }
        if flags & libc::O_ACCMODE != libc::O_RDWR {
            return Err(FsError::PermissionDenied);
        }
        Ok(())
    }

    /// Clamp a read to end of file. Returns the byte count to read, which
    /// is zero at or past end of file.
    pub fn clamp_read(&self, ino: u64, offset: u64, size: u32) -> Result<usize, FsError> {
        if ino != FILE_INO {
            return Err(FsError::NotFound);
        }
        let remaining = self.file_size().saturating_sub(offset);
        Ok(remaining.min(u64::from(size)) as usize)
    }

    /// The file cannot grow; a write must end within it.
    pub fn check_write(&self, ino: u64, offset: u64, len: usize) -> Result<(), FsError> {
        if ino != FILE_INO {
            return Err(FsError::NotFound);
        }
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.file_size() => Ok(()),
            _ => Err(FsError::TooLarge),
        }
    }
}
