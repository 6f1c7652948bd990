//! In-process backend
//!
//! A shared tree of files and directories that every connection of a
//! [`MemoryBackend`] sees. Failures are reported with the status codes of
//! the configured [`Dialect`], so the same tree can stand in for an SFTP
//! server, an SMB share or a WebDAV collection.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use super::error::{nt_status, sftp_status};
use super::{
    Connector, RawEntry, RawKind, RawStat, Status, Transport, TransportError, TransportResult,
};
use crate::config::FsConfig;
use crate::endpoint::{Credentials, EndpointKey};

const DEFAULT_FILE_MODE: u32 = 0o644;
const DEFAULT_DIR_MODE: u32 = 0o755;

/// Protocol whose status codes and quirks the tree imitates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// POSIX modes, `.`/`..` in listings, generic failure on rmdir of a
    /// non-empty directory
    Sftp,
    /// NTSTATUS codes, directory bit only, no POSIX modes
    Smb,
    /// HTTP statuses, collection bit only, server-side COPY
    Http,
}

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Directory,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    modified: SystemTime,
}

impl Node {
    fn file(data: Vec<u8>) -> Self {
        Self {
            kind: NodeKind::File(data),
            mode: DEFAULT_FILE_MODE,
            modified: SystemTime::now(),
        }
    }

    fn directory() -> Self {
        Self {
            kind: NodeKind::Directory,
            mode: DEFAULT_DIR_MODE,
            modified: SystemTime::now(),
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }
}

#[derive(Debug)]
struct State {
    dialect: Dialect,
    /// Keyed by normalized path without a leading separator; root is ""
    nodes: RwLock<BTreeMap<String, Node>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    reject_logins: AtomicBool,
    failing: Mutex<HashSet<String>>,
}

/// Handle to a shared in-memory tree
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<State>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Empty tree speaking the SFTP dialect
    pub fn new() -> Self {
        Self::with_dialect(Dialect::Sftp)
    }

    pub fn with_dialect(dialect: Dialect) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(String::new(), Node::directory());
        Self {
            state: Arc::new(State {
                dialect,
                nodes: RwLock::new(nodes),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                reject_logins: AtomicBool::new(false),
                failing: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.state.dialect
    }

    /// Create a file, along with any missing parent directories
    pub fn insert_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let key = normalize(path);
        let mut nodes = self.state.nodes.write();
        insert_parents(&mut nodes, &key);
        nodes.insert(key, Node::file(data.into()));
    }

    /// Create a directory, along with any missing parent directories
    pub fn insert_dir(&self, path: &str) {
        let key = normalize(path);
        let mut nodes = self.state.nodes.write();
        insert_parents(&mut nodes, &key);
        nodes.entry(key).or_insert_with(Node::directory);
    }

    /// Overwrite the mode bits of an existing node
    pub fn set_mode(&self, path: &str, mode: u32) {
        if let Some(node) = self.state.nodes.write().get_mut(&normalize(path)) {
            node.mode = mode;
        }
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.state.nodes.read().get(&normalize(path)).map(|n| n.mode)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.nodes.read().contains_key(&normalize(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state
            .nodes
            .read()
            .get(&normalize(path))
            .is_some_and(Node::is_dir)
    }

    /// File contents, if `path` is a file
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.nodes.read().get(&normalize(path)) {
            Some(Node {
                kind: NodeKind::File(data),
                ..
            }) => Some(data.clone()),
            _ => None,
        }
    }

    /// Refuse every subsequent login
    pub fn reject_logins(&self, reject: bool) {
        self.state.reject_logins.store(reject, Ordering::SeqCst);
    }

    /// Make the named primitive (`stat`, `list`, `mkdir`, `remove`, `get`,
    /// `put`, `set_permissions`, `copy`) fail with the dialect's generic
    /// failure status
    pub fn fail_on(&self, primitive: &str) {
        self.state.failing.lock().insert(primitive.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.failing.lock().clear();
    }

    /// Connections opened so far
    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Connections closed so far
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    parts.join("/")
}

fn parent_key(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    Some(key.rsplit_once('/').map_or("", |(parent, _)| parent))
}

fn insert_parents(nodes: &mut BTreeMap<String, Node>, key: &str) {
    let mut current = parent_key(key);
    let mut missing = Vec::new();
    while let Some(parent) = current {
        if nodes.contains_key(parent) {
            break;
        }
        missing.push(parent.to_string());
        current = parent_key(parent);
    }
    for dir in missing {
        nodes.insert(dir, Node::directory());
    }
}

fn children<'a>(
    nodes: &'a BTreeMap<String, Node>,
    key: &'a str,
) -> impl Iterator<Item = (&'a str, &'a Node)> + 'a {
    nodes.iter().filter_map(move |(k, node)| {
        let rest = if key.is_empty() {
            k.as_str()
        } else {
            k.strip_prefix(key)?.strip_prefix('/')?
        };
        (!rest.is_empty() && !rest.contains('/')).then_some((rest, node))
    })
}

/// Factory for connections to a [`MemoryBackend`]
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    backend: MemoryBackend,
}

impl MemoryConnector {
    pub fn new(backend: MemoryBackend) -> Self {
        Self { backend }
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        key: &EndpointKey,
        _credentials: &Credentials,
        _config: &FsConfig,
    ) -> TransportResult<Box<dyn Transport>> {
        let state = Arc::clone(&self.backend.state);
        if state.reject_logins.load(Ordering::SeqCst) {
            let message = format!("login refused for '{}'", key.principal);
            return Err(match state.dialect {
                Dialect::Sftp => TransportError::auth(message),
                Dialect::Smb => TransportError::smb(nt_status::LOGON_FAILURE, message),
                Dialect::Http => TransportError::http(401, "Unauthorized"),
            });
        }
        state.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(endpoint = %key, "memory connection opened");
        Ok(Box::new(MemoryTransport { state, open: true }))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// One connection to a [`MemoryBackend`]
#[derive(Debug)]
pub struct MemoryTransport {
    state: Arc<State>,
    open: bool,
}

impl MemoryTransport {
    fn dialect(&self) -> Dialect {
        self.state.dialect
    }

    fn not_found(&self, path: &str) -> TransportError {
        match self.dialect() {
            Dialect::Sftp => TransportError::sftp(sftp_status::NO_SUCH_FILE, "No such file"),
            Dialect::Smb => TransportError::smb(
                nt_status::OBJECT_NAME_NOT_FOUND,
                format!("STATUS_OBJECT_NAME_NOT_FOUND: {}", path),
            ),
            Dialect::Http => TransportError::http(404, "Not Found"),
        }
    }

    fn parent_missing(&self, path: &str) -> TransportError {
        match self.dialect() {
            Dialect::Sftp => TransportError::sftp(sftp_status::NO_SUCH_FILE, "No such file"),
            Dialect::Smb => TransportError::smb(
                nt_status::OBJECT_PATH_NOT_FOUND,
                format!("STATUS_OBJECT_PATH_NOT_FOUND: {}", path),
            ),
            Dialect::Http => TransportError::http(409, "Conflict"),
        }
    }

    fn already_exists(&self, path: &str) -> TransportError {
        match self.dialect() {
            // OpenSSH reports a plain failure here
            Dialect::Sftp => TransportError::sftp(sftp_status::FAILURE, "Failure"),
            Dialect::Smb => TransportError::smb(
                nt_status::OBJECT_NAME_COLLISION,
                format!("STATUS_OBJECT_NAME_COLLISION: {}", path),
            ),
            Dialect::Http => TransportError::http(405, "Method Not Allowed"),
        }
    }

    fn denied(&self, path: &str) -> TransportError {
        match self.dialect() {
            Dialect::Sftp => {
                TransportError::sftp(sftp_status::PERMISSION_DENIED, "Permission denied")
            }
            Dialect::Smb => TransportError::smb(
                nt_status::ACCESS_DENIED,
                format!("STATUS_ACCESS_DENIED: {}", path),
            ),
            Dialect::Http => TransportError::http(403, "Forbidden"),
        }
    }

    fn not_empty(&self, path: &str) -> TransportError {
        match self.dialect() {
            Dialect::Sftp => TransportError::sftp(sftp_status::FAILURE, "Failure"),
            Dialect::Smb => TransportError::smb(
                nt_status::DIRECTORY_NOT_EMPTY,
                format!("STATUS_DIRECTORY_NOT_EMPTY: {}", path),
            ),
            Dialect::Http => TransportError::http(409, "Conflict"),
        }
    }

    fn failure(&self, what: &str) -> TransportError {
        match self.dialect() {
            Dialect::Sftp => TransportError::sftp(sftp_status::FAILURE, format!("{} failed", what)),
            Dialect::Smb => TransportError::smb(
                nt_status::UNSUCCESSFUL,
                format!("STATUS_UNSUCCESSFUL: {} failed", what),
            ),
            Dialect::Http => TransportError::http(500, "Internal Server Error"),
        }
    }

    fn check(&self, primitive: &str) -> TransportResult<()> {
        if !self.open {
            return Err(TransportError::new(
                Status::Io(std::io::ErrorKind::NotConnected),
                "connection closed",
            ));
        }
        if self.state.failing.lock().contains(primitive) {
            return Err(self.failure(primitive));
        }
        Ok(())
    }

    fn raw_stat(&self, node: &Node) -> RawStat {
        let base = match &node.kind {
            NodeKind::File(data) => RawStat::file(data.len() as u64),
            NodeKind::Directory => RawStat::directory(),
        };
        let base = base.with_modified(node.modified);
        match self.dialect() {
            Dialect::Sftp => base.with_permissions(node.mode),
            Dialect::Smb => base
                .with_kind(RawKind::DirectoryFlag(node.is_dir()))
                .with_created(node.modified),
            Dialect::Http => base.with_kind(RawKind::DirectoryFlag(node.is_dir())),
        }
    }

    /// Writable parent directory of `key`
    fn check_parent(&self, nodes: &BTreeMap<String, Node>, key: &str, path: &str) -> TransportResult<()> {
        let parent = parent_key(key).ok_or_else(|| self.denied(path))?;
        match nodes.get(parent) {
            Some(node) if node.is_dir() => {
                if node.mode & 0o200 == 0 {
                    Err(self.denied(path))
                } else {
                    Ok(())
                }
            }
            _ => Err(self.parent_missing(path)),
        }
    }
}

impl Transport for MemoryTransport {
    fn stat(&mut self, path: &str) -> TransportResult<RawStat> {
        self.check("stat")?;
        let nodes = self.state.nodes.read();
        nodes
            .get(&normalize(path))
            .map(|node| self.raw_stat(node))
            .ok_or_else(|| self.not_found(path))
    }

    fn list(&mut self, path: &str) -> TransportResult<Vec<RawEntry>> {
        self.check("list")?;
        let key = normalize(path);
        let nodes = self.state.nodes.read();
        let dir = nodes.get(&key).ok_or_else(|| self.not_found(path))?;
        if !dir.is_dir() {
            return Err(self.failure("list"));
        }
        if dir.mode & 0o400 == 0 {
            return Err(self.denied(path));
        }

        let mut entries = Vec::new();
        if self.dialect() == Dialect::Sftp {
            entries.push(RawEntry::new(".", self.raw_stat(dir)));
            let parent = parent_key(&key).and_then(|p| nodes.get(p)).unwrap_or(dir);
            entries.push(RawEntry::new("..", self.raw_stat(parent)));
        }
        entries.extend(
            children(&nodes, &key).map(|(name, node)| RawEntry::new(name, self.raw_stat(node))),
        );
        Ok(entries)
    }

    fn mkdir(&mut self, path: &str) -> TransportResult<()> {
        self.check("mkdir")?;
        let key = normalize(path);
        let mut nodes = self.state.nodes.write();
        if nodes.contains_key(&key) {
            return Err(self.already_exists(path));
        }
        self.check_parent(&nodes, &key, path)?;
        nodes.insert(key, Node::directory());
        Ok(())
    }

    fn remove(&mut self, path: &str, is_dir: bool) -> TransportResult<()> {
        self.check("remove")?;
        let key = normalize(path);
        let mut nodes = self.state.nodes.write();
        let node = nodes.get(&key).ok_or_else(|| self.not_found(path))?;
        if node.is_dir() != is_dir {
            return Err(self.failure("remove"));
        }
        self.check_parent(&nodes, &key, path)?;
        if is_dir && children(&nodes, &key).next().is_some() {
            return Err(self.not_empty(path));
        }
        nodes.remove(&key);
        Ok(())
    }

    fn get(&mut self, path: &str, sink: &mut dyn Write) -> TransportResult<u64> {
        self.check("get")?;
        let data = {
            let nodes = self.state.nodes.read();
            match nodes.get(&normalize(path)) {
                None => return Err(self.not_found(path)),
                Some(node) if node.mode & 0o400 == 0 => return Err(self.denied(path)),
                Some(Node {
                    kind: NodeKind::File(data),
                    ..
                }) => data.clone(),
                Some(_) => return Err(self.failure("get")),
            }
        };
        sink.write_all(&data)?;
        Ok(data.len() as u64)
    }

    fn put(&mut self, path: &str, source: &mut dyn Read) -> TransportResult<u64> {
        self.check("put")?;
        let key = normalize(path);
        {
            let nodes = self.state.nodes.read();
            self.check_parent(&nodes, &key, path)?;
            match nodes.get(&key) {
                Some(node) if node.is_dir() => return Err(self.failure("put")),
                Some(node) if node.mode & 0o200 == 0 => return Err(self.denied(path)),
                _ => {}
            }
        }

        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        let len = data.len() as u64;

        let mut nodes = self.state.nodes.write();
        let mode = nodes.get(&key).map_or(DEFAULT_FILE_MODE, |n| n.mode);
        let mut node = Node::file(data);
        node.mode = mode;
        nodes.insert(key, node);
        Ok(len)
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> TransportResult<()> {
        self.check("set_permissions")?;
        match self.dialect() {
            Dialect::Sftp => {}
            Dialect::Smb => {
                return Err(TransportError::smb(
                    nt_status::NOT_SUPPORTED,
                    "STATUS_NOT_SUPPORTED: POSIX modes",
                ))
            }
            Dialect::Http => return Err(TransportError::unsupported("set_permissions")),
        }
        let mut nodes = self.state.nodes.write();
        let node = nodes.get_mut(&normalize(path)).ok_or_else(|| self.not_found(path))?;
        node.mode = mode & 0o7777;
        Ok(())
    }

    fn native_copy(&mut self, from: &str, to: &str, overwrite: bool) -> TransportResult<()> {
        if self.dialect() != Dialect::Http {
            return Err(TransportError::unsupported("copy"));
        }
        self.check("copy")?;
        let (from_key, to_key) = (normalize(from), normalize(to));
        let mut nodes = self.state.nodes.write();
        let source = nodes.get(&from_key).cloned().ok_or_else(|| self.not_found(from))?;
        self.check_parent(&nodes, &to_key, to)?;
        if nodes.contains_key(&to_key) {
            if !overwrite {
                return Err(TransportError::http(412, "Precondition Failed"));
            }
            let stale: Vec<String> = nodes
                .keys()
                .filter(|k| *k == &to_key || k.starts_with(&format!("{}/", to_key)))
                .cloned()
                .collect();
            for k in stale {
                nodes.remove(&k);
            }
        }
        let mut copy = source;
        copy.modified = SystemTime::now();
        nodes.insert(to_key, copy);
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        if self.open {
            self.open = false;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
