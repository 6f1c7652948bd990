//! Transport collaborators
//!
//! Every backend protocol is reached through the same two capability
//! traits. A [`Connector`] opens authenticated connections for an endpoint;
//! a [`Transport`] is one such connection and exposes the primitive
//! operations the orchestrator composes.
//!
//! # Backends
//!
//! - `memory`: in-process tree, always available
//! - `sftp`: SSH file transfer through `ssh2` (feature `sftp`)
//! - `smb`: SMB2/3 shares through `smb` (feature `smb`)
//! - `webdav`: WebDAV over HTTP(S) through `reqwest` (feature `webdav`)
//!
//! Transports receive paths already rendered for the backend (see
//! [`RemotePath::to_backend_string`](crate::path::RemotePath::to_backend_string))
//! and report failures as [`TransportError`] carrying the protocol's own
//! status code.

pub mod error;
pub mod memory;
pub mod types;

#[cfg(feature = "sftp")]
pub mod sftp;

#[cfg(feature = "smb")]
pub mod smb;

#[cfg(feature = "webdav")]
pub mod webdav;

use std::io::{Read, Write};

pub use error::{Status, TransportError, TransportResult};
pub use types::{RawEntry, RawKind, RawStat};

use crate::config::FsConfig;
use crate::endpoint::{Credentials, EndpointKey};

/// One open, authenticated connection to an endpoint
///
/// Implementations are driven from one thread at a time; persistent
/// sessions wrap them in a mutex.
pub trait Transport: Send {
    /// Metadata for `path`
    fn stat(&mut self, path: &str) -> TransportResult<RawStat>;

    /// Entries of the directory at `path`. May include `.` and `..`.
    fn list(&mut self, path: &str) -> TransportResult<Vec<RawEntry>>;

    /// Create one directory; the parent must exist
    fn mkdir(&mut self, path: &str) -> TransportResult<()>;

    /// Remove a file, or an empty directory when `is_dir` is set
    fn remove(&mut self, path: &str, is_dir: bool) -> TransportResult<()>;

    /// Stream the contents of `path` into `sink`, returning the byte count
    fn get(&mut self, path: &str, sink: &mut dyn Write) -> TransportResult<u64>;

    /// Create or truncate `path` and fill it from `source`
    fn put(&mut self, path: &str, source: &mut dyn Read) -> TransportResult<u64>;

    /// Apply POSIX mode bits
    fn set_permissions(&mut self, _path: &str, _mode: u32) -> TransportResult<()> {
        Err(TransportError::unsupported("set_permissions"))
    }

    /// Server-side copy, where the protocol has one
    fn native_copy(&mut self, _from: &str, _to: &str, _overwrite: bool) -> TransportResult<()> {
        Err(TransportError::unsupported("copy"))
    }

    /// Shut the connection down
    fn close(&mut self) -> TransportResult<()>;

    /// Get backend name for logging/debugging
    fn backend_name(&self) -> &'static str;
}

/// Factory for transports of one scheme
pub trait Connector: Send + Sync {
    /// Open and authenticate a connection for `key`
    fn connect(
        &self,
        key: &EndpointKey,
        credentials: &Credentials,
        config: &FsConfig,
    ) -> TransportResult<Box<dyn Transport>>;

    /// Get backend name for logging/debugging
    fn backend_name(&self) -> &'static str;
}
