//! Raw values exchanged with transports

use std::time::SystemTime;

/// Entry type as far as the backend can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    File,
    Directory,
    Symlink,
    /// Device, socket, fifo
    Other,
    /// Backend only exposes a directory bit (SMB attributes, WebDAV
    /// collections)
    DirectoryFlag(bool),
}

/// Backend stat result, before translation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStat {
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub accessed: Option<SystemTime>,
    pub created: Option<SystemTime>,
    pub kind: RawKind,
    /// POSIX mode bits, when the backend reports any
    pub permissions: Option<u32>,
}

impl RawStat {
    /// Stat for a regular file of `size` bytes
    pub fn file(size: u64) -> Self {
        Self {
            size: Some(size),
            modified: None,
            accessed: None,
            created: None,
            kind: RawKind::File,
            permissions: None,
        }
    }

    /// Stat for a directory
    pub fn directory() -> Self {
        Self {
            size: Some(0),
            modified: None,
            accessed: None,
            created: None,
            kind: RawKind::Directory,
            permissions: None,
        }
    }

    pub fn with_kind(mut self, kind: RawKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_accessed(mut self, accessed: SystemTime) -> Self {
        self.accessed = Some(accessed);
        self
    }

    pub fn with_created(mut self, created: SystemTime) -> Self {
        self.created = Some(created);
        self
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, RawKind::Directory | RawKind::DirectoryFlag(true))
    }
}

/// One name returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Bare name, not a path
    pub name: String,
    pub stat: RawStat,
}

impl RawEntry {
    pub fn new(name: impl Into<String>, stat: RawStat) -> Self {
        Self {
            name: name.into(),
            stat,
        }
    }
}
