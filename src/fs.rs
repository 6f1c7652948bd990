//! Backend-agnostic file operations
//!
//! [`RemoteFs`] composes the pieces of the crate: every operation acquires
//! a session for its endpoint, runs one or more transport primitives,
//! translates results through `attributes`/`permissions` and failures
//! through `error_map`, and releases the session on every exit path.
//!
//! ```
//! use farpath::backend::memory::{MemoryBackend, MemoryConnector};
//! use farpath::{EndpointRegistry, RemoteFs, Scheme, WriteMode};
//! use std::sync::Arc;
//!
//! let backend = MemoryBackend::new();
//! let registry = EndpointRegistry::new();
//! registry.register_connector(Scheme::Memory, Arc::new(MemoryConnector::new(backend)));
//!
//! let (fs, dir) = RemoteFs::open_in(&registry, "mem://scratch/inbox/2024").unwrap();
//! fs.create_directory(&dir, true).unwrap();
//! fs.write(&dir.child("hello.txt").unwrap(), b"hi", WriteMode::CreateNew).unwrap();
//!
//! let names: Vec<String> = fs
//!     .list_dir(&dir, |_| true)
//!     .unwrap()
//!     .map(|p| p.to_string())
//!     .collect();
//! assert_eq!(names, ["/inbox/2024/hello.txt"]);
//! ```

use bitflags::bitflags;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use crate::attributes::{self, FileAttributes};
use crate::backend::{RawStat, Transport, TransportError, TransportResult};
use crate::endpoint::Endpoint;
use crate::error::{ErrorKind, FsError, Result};
use crate::error_map::{self, ErrorContext, Operation};
use crate::path::RemotePath;
use crate::permissions::PermissionSet;
use crate::registry::{global_registry, EndpointRegistry};
use crate::session::Session;

bitflags! {
    /// Access checked by [`RemoteFs::check_access`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessMode: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

/// Options for [`RemoteFs::copy`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyOptions {
    /// Replace an existing target instead of failing with `AlreadyExists`
    pub replace_existing: bool,
}

impl CopyOptions {
    pub fn replace_existing() -> Self {
        Self {
            replace_existing: true,
        }
    }
}

/// How [`RemoteFs::write`] treats an existing file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if the file exists
    CreateNew,
    /// Create the file or truncate it
    #[default]
    Overwrite,
}

/// One-shot snapshot of a directory
///
/// Consumed by iteration; list the directory again for a fresh view.
#[derive(Debug)]
pub struct DirectoryListing {
    entries: std::vec::IntoIter<RemotePath>,
}

impl Iterator for DirectoryListing {
    type Item = RemotePath;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for DirectoryListing {}

/// Path after anchoring and normalization, in both renderings
struct Target {
    path: RemotePath,
    /// Rendered for the transport
    backend: String,
    /// Rendered for errors and logs
    display: String,
}

/// File operations against one endpoint
#[derive(Debug, Clone)]
pub struct RemoteFs {
    endpoint: Arc<Endpoint>,
}

impl RemoteFs {
    pub fn new(endpoint: Arc<Endpoint>) -> Self {
        Self { endpoint }
    }

    /// Resolve `uri` through the global registry
    pub fn open(uri: &str) -> Result<(Self, RemotePath)> {
        Self::open_in(global_registry(), uri)
    }

    /// Resolve `uri` through `registry`
    pub fn open_in(registry: &EndpointRegistry, uri: &str) -> Result<(Self, RemotePath)> {
        let (endpoint, path) = registry.open_uri(uri)?;
        Ok((Self::new(endpoint), path))
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// Parse `raw` as a path on this filesystem's endpoint
    pub fn path(&self, raw: &str) -> Result<RemotePath> {
        self.endpoint.path(raw)
    }

    pub fn root(&self) -> RemotePath {
        self.endpoint.root()
    }

    fn endpoint_name(&self) -> String {
        self.endpoint.reference().to_string()
    }

    fn target(&self, path: &RemotePath) -> Result<Target> {
        if path.endpoint() != self.endpoint.reference() {
            return Err(FsError::InvalidArgument(format!(
                "path '{}' belongs to {}, not {}",
                path,
                path.endpoint(),
                self.endpoint.reference()
            )));
        }
        // Relative paths without an anchor are left to the server, which
        // resolves them against the login directory.
        let anchored = if path.anchor().is_some() {
            path.to_absolute_path()
        } else {
            path.clone()
        };
        let path = anchored.normalize()?;
        Ok(Target {
            backend: path.to_backend_string(),
            display: path.to_string(),
            path,
        })
    }

    fn session(&self) -> Result<Session<'_>> {
        Session::acquire(&self.endpoint)
    }

    /// Run one primitive and map its failure
    fn run<T>(
        &self,
        session: &mut Session<'_>,
        ctx: &ErrorContext<'_>,
        f: impl FnOnce(&mut dyn Transport) -> TransportResult<T>,
    ) -> Result<T> {
        tracing::trace!(operation = ctx.operation.as_str(), path = ctx.path, "backend call");
        session
            .call(f)?
            .map_err(|e| error_map::map_error(e, ctx))
    }

    fn raw_stat(&self, session: &mut Session<'_>, target: &Target) -> Result<RawStat> {
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::Stat, &target.display, &endpoint);
        self.run(session, &ctx, |t| t.stat(&target.backend))
    }

    /// Stat on a path that may be absent
    fn try_raw_stat(&self, session: &mut Session<'_>, target: &Target) -> Result<Option<RawStat>> {
        match self.raw_stat(session, target) {
            Ok(stat) => Ok(Some(stat)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fresh metadata for `path`
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), path = %path)
    )]
    pub fn stat(&self, path: &RemotePath) -> Result<FileAttributes> {
        let target = self.target(path)?;
        let mut session = self.session()?;
        let stat = self.raw_stat(&mut session, &target)?;
        Ok(attributes::translate(&stat))
    }

    /// Same as [`RemoteFs::stat`]
    pub fn read_attributes(&self, path: &RemotePath) -> Result<FileAttributes> {
        self.stat(path)
    }

    /// Check if `path` exists
    pub fn exists(&self, path: &RemotePath) -> Result<bool> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Entries of the directory at `path` accepted by `filter`
    ///
    /// `.` and `..` are never returned. Each entry is `path` joined with
    /// the entry name.
    #[tracing::instrument(
        skip(self, filter),
        fields(endpoint = %self.endpoint.key(), path = %path)
    )]
    pub fn list_dir(
        &self,
        path: &RemotePath,
        mut filter: impl FnMut(&RemotePath) -> bool,
    ) -> Result<DirectoryListing> {
        let target = self.target(path)?;
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::List, &target.display, &endpoint);

        let raw = {
            let mut session = self.session()?;
            self.run(&mut session, &ctx, |t| t.list(&target.backend))?
        };

        let mut entries = Vec::with_capacity(raw.len());
        for entry in raw {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let child = target.path.child(&entry.name)?;
            if filter(&child) {
                entries.push(child);
            }
        }
        tracing::debug!(count = entries.len(), "directory listed");

        Ok(DirectoryListing {
            entries: entries.into_iter(),
        })
    }

    /// Create the directory at `path`
    ///
    /// With `recursive`, missing parents are created as well and existing
    /// directories along the way (including `path` itself) are accepted.
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), path = %path)
    )]
    pub fn create_directory(&self, path: &RemotePath, recursive: bool) -> Result<()> {
        let target = self.target(path)?;
        let mut session = self.session()?;

        if !recursive {
            return match self.mkdir_one(&mut session, &target)? {
                Created::New => Ok(()),
                Created::Existing => Err(FsError::AlreadyExists {
                    path: target.display,
                }),
            };
        }

        let mut names = target.path.iter();
        let mut prefix = match target.path.root_of() {
            Some(root) => root,
            None => {
                if names.next().is_none() {
                    return Ok(());
                }
                let first = target.path.subpath(0, 1)?;
                self.mkdir_step(&mut session, &first)?;
                first
            }
        };
        for name in names {
            prefix = prefix.child(name)?;
            self.mkdir_step(&mut session, &prefix)?;
        }
        Ok(())
    }

    /// One prefix of a recursive create; existing directories are fine
    fn mkdir_step(&self, session: &mut Session<'_>, prefix: &RemotePath) -> Result<()> {
        let target = self.target(prefix)?;
        match self.mkdir_one(session, &target)? {
            Created::New => Ok(()),
            Created::Existing => {
                let stat = self.raw_stat(session, &target)?;
                if stat.is_dir() {
                    Ok(())
                } else {
                    Err(FsError::AlreadyExists {
                        path: target.display,
                    })
                }
            }
        }
    }

    fn mkdir_one(&self, session: &mut Session<'_>, target: &Target) -> Result<Created> {
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::Mkdir, &target.display, &endpoint);
        let err: TransportError = match session.call(|t| t.mkdir(&target.backend))? {
            Ok(()) => return Ok(Created::New),
            Err(e) => e,
        };

        if error_map::is_already_exists(&err.status, Operation::Mkdir) {
            return Ok(Created::Existing);
        }
        // Some servers only say "failure" when the name is taken
        if error_map::is_generic_failure(&err.status, Operation::Mkdir)
            && self.try_raw_stat(session, target)?.is_some()
        {
            return Ok(Created::Existing);
        }
        Err(error_map::map_error(err, &ctx))
    }

    /// Delete a file or an empty directory
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), path = %path)
    )]
    pub fn delete(&self, path: &RemotePath) -> Result<()> {
        let target = self.target(path)?;
        let mut session = self.session()?;
        self.delete_in(&mut session, &target)
    }

    fn delete_in(&self, session: &mut Session<'_>, target: &Target) -> Result<()> {
        let is_dir = self.raw_stat(session, target)?.is_dir();
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::Delete, &target.display, &endpoint)
            .with_known_directory(is_dir);
        self.run(session, &ctx, |t| t.remove(&target.backend, is_dir))
    }

    /// Copy `source` to `target` on this endpoint
    ///
    /// Files use the server's own copy where there is one and are staged
    /// through a local temporary file otherwise. Copying a directory
    /// creates an empty directory at `target`.
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), source = %source, target = %target)
    )]
    pub fn copy(&self, source: &RemotePath, target: &RemotePath, options: CopyOptions) -> Result<()> {
        if source.endpoint() != target.endpoint() {
            return Err(FsError::unsupported(
                self.endpoint_name(),
                "copy between endpoints",
            ));
        }
        let from = self.target(source)?;
        let to = self.target(target)?;
        let mut session = self.session()?;

        let source_stat = self.raw_stat(&mut session, &from)?;
        if from.path == to.path {
            return Ok(());
        }

        if let Some(existing) = self.try_raw_stat(&mut session, &to)? {
            if !options.replace_existing {
                return Err(FsError::AlreadyExists { path: to.display });
            }
            if existing.is_dir() || source_stat.is_dir() {
                self.delete_in(&mut session, &to)?;
            }
        }

        if source_stat.is_dir() {
            return match self.mkdir_one(&mut session, &to)? {
                Created::New => Ok(()),
                Created::Existing => Err(FsError::AlreadyExists { path: to.display }),
            };
        }

        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::Copy, &to.display, &endpoint);
        match session.call(|t| t.native_copy(&from.backend, &to.backend, options.replace_existing))? {
            Ok(()) => {
                tracing::debug!("server-side copy");
                return Ok(());
            }
            Err(e) => {
                let mapped = error_map::map_error(e, &ctx);
                if mapped.kind() != ErrorKind::UnsupportedOperation {
                    return Err(mapped);
                }
            }
        }

        self.copy_staged(&mut session, &from, &to)
    }

    fn copy_staged(&self, session: &mut Session<'_>, from: &Target, to: &Target) -> Result<()> {
        let mut staging = match &self.endpoint.config().staging_dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
            None => tempfile::NamedTempFile::new()?,
        };
        tracing::debug!(staging = %staging.path().display(), "staging copy");

        let endpoint = self.endpoint_name();
        let read_ctx = ErrorContext::new(Operation::Read, &from.display, &endpoint);
        let size = self.run(session, &read_ctx, |t| t.get(&from.backend, staging.as_file_mut()))?;

        staging.as_file_mut().seek(SeekFrom::Start(0))?;
        let write_ctx = ErrorContext::new(Operation::Write, &to.display, &endpoint);
        let written = self.run(session, &write_ctx, |t| t.put(&to.backend, staging.as_file_mut()))?;

        if written != size {
            return Err(FsError::IoFailure {
                path: to.display.clone(),
                message: format!("copied {} of {} bytes", written, size),
            });
        }
        staging.close()?;
        Ok(())
    }

    /// Apply `permissions` to `path`
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), path = %path, mode = %permissions)
    )]
    pub fn set_permissions(&self, path: &RemotePath, permissions: PermissionSet) -> Result<()> {
        let target = self.target(path)?;
        let mut session = self.session()?;
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::SetPermissions, &target.display, &endpoint);
        self.run(&mut session, &ctx, |t| {
            t.set_permissions(&target.backend, permissions.to_mask())
        })
    }

    /// Check that `path` exists and grants `modes` to its owner
    ///
    /// Backends that report no permissions grant every mode on existing
    /// paths.
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), path = %path)
    )]
    pub fn check_access(&self, path: &RemotePath, modes: AccessMode) -> Result<()> {
        let display = self.target(path)?.display;
        let attrs = self.stat(path)?;
        let Some(permissions) = attrs.permissions else {
            return Ok(());
        };

        let required = [
            (AccessMode::READ, PermissionSet::OWNER_READ),
            (AccessMode::WRITE, PermissionSet::OWNER_WRITE),
            (AccessMode::EXECUTE, PermissionSet::OWNER_EXECUTE),
        ];
        for (mode, bit) in required {
            if modes.contains(mode) && !permissions.contains(bit) {
                return Err(FsError::AccessDenied { path: display });
            }
        }
        Ok(())
    }

    /// Whole contents of the file at `path`
    #[tracing::instrument(
        skip(self),
        fields(endpoint = %self.endpoint.key(), path = %path)
    )]
    pub fn read(&self, path: &RemotePath) -> Result<Vec<u8>> {
        let target = self.target(path)?;
        let mut session = self.session()?;
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::Read, &target.display, &endpoint);
        let mut data = Vec::new();
        self.run(&mut session, &ctx, |t| t.get(&target.backend, &mut data))?;
        Ok(data)
    }

    /// Write `data` to the file at `path`
    #[tracing::instrument(
        skip(self, data),
        fields(endpoint = %self.endpoint.key(), path = %path, len = data.len())
    )]
    pub fn write(&self, path: &RemotePath, data: &[u8], mode: WriteMode) -> Result<()> {
        let target = self.target(path)?;
        let mut session = self.session()?;
        if mode == WriteMode::CreateNew && self.try_raw_stat(&mut session, &target)?.is_some() {
            return Err(FsError::AlreadyExists {
                path: target.display,
            });
        }
        let endpoint = self.endpoint_name();
        let ctx = ErrorContext::new(Operation::Write, &target.display, &endpoint);
        let mut source = data;
        self.run(&mut session, &ctx, |t| t.put(&target.backend, &mut source))?;
        Ok(())
    }
}

enum Created {
    New,
    Existing,
}
