//! Portable file attributes
//!
//! Backends report very different amounts of metadata. Translation never
//! fails on a missing field; it substitutes:
//!
//! | field    | fallback                 |
//! |----------|--------------------------|
//! | size     | 0                        |
//! | modified | `UNIX_EPOCH`             |
//! | accessed | time of translation      |
//! | created  | the modification time    |

use std::time::{SystemTime, UNIX_EPOCH};

use crate::backend::{RawKind, RawStat};
use crate::permissions::PermissionSet;

/// Exactly one of these is true for every translated record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Backend-independent metadata snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub size: u64,
    pub modified: SystemTime,
    pub accessed: SystemTime,
    pub created: SystemTime,
    pub file_type: FileType,
    /// None when the backend has no POSIX modes
    pub permissions: Option<PermissionSet>,
}

impl FileAttributes {
    pub fn is_regular_file(&self) -> bool {
        self.file_type == FileType::Regular
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }

    pub fn is_other(&self) -> bool {
        self.file_type == FileType::Other
    }
}

/// Translate a backend stat result
pub fn translate(stat: &RawStat) -> FileAttributes {
    translate_at(stat, SystemTime::now())
}

fn translate_at(stat: &RawStat, now: SystemTime) -> FileAttributes {
    let file_type = match stat.kind {
        RawKind::File => FileType::Regular,
        RawKind::Directory | RawKind::DirectoryFlag(true) => FileType::Directory,
        RawKind::DirectoryFlag(false) => FileType::Regular,
        RawKind::Symlink => FileType::Symlink,
        RawKind::Other => FileType::Other,
    };
    let modified = stat.modified.unwrap_or(UNIX_EPOCH);

    FileAttributes {
        size: stat.size.unwrap_or(0),
        modified,
        accessed: stat.accessed.unwrap_or(now),
        created: stat.created.unwrap_or(modified),
        file_type,
        permissions: stat.permissions.map(PermissionSet::from_mask),
    }
}
