//! Endpoint identity and lifecycle
//!
//! An endpoint is one remote server reached through one backend protocol
//! as one principal. Its identity is the [`EndpointKey`]; passwords and
//! domains travel separately in [`Credentials`] and never take part in
//! equality or hashing.

use parking_lot::Mutex;
use secrecy::SecretString;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::Connector;
use crate::config::FsConfig;
use crate::error::{FsError, Result};
use crate::error_map::{self, ErrorContext, Operation};
use crate::path::RemotePath;
use crate::session::{SessionPolicy, SharedTransport};

/// Backend protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scheme {
    /// SSH file transfer protocol
    Sftp,
    /// SMB2/3 network share
    Smb,
    /// WebDAV over plain HTTP
    WebDav,
    /// WebDAV over HTTPS
    WebDavs,
    /// In-process backend
    Memory,
}

impl Scheme {
    /// Canonical scheme name used in rendered URIs
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Sftp => "sftp",
            Scheme::Smb => "smb",
            Scheme::WebDav => "webdav",
            Scheme::WebDavs => "webdavs",
            Scheme::Memory => "mem",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Sftp => 22,
            Scheme::Smb => 445,
            Scheme::WebDav => 80,
            Scheme::WebDavs => 443,
            Scheme::Memory => 0,
        }
    }

    /// Separator used when a path is rendered for the backend itself
    pub fn separator(&self) -> char {
        match self {
            Scheme::Smb => '\\',
            _ => '/',
        }
    }

    /// Leading segment that stands for the login directory
    pub fn home_marker(&self) -> Option<&'static str> {
        match self {
            Scheme::Sftp => Some("~"),
            _ => None,
        }
    }
}

impl FromStr for Scheme {
    type Err = FsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sftp" | "ssh" => Ok(Scheme::Sftp),
            "smb" | "cifs" => Ok(Scheme::Smb),
            "webdav" | "dav" => Ok(Scheme::WebDav),
            "webdavs" | "davs" => Ok(Scheme::WebDavs),
            "mem" | "memory" => Ok(Scheme::Memory),
            other => Err(FsError::Config(format!("Unsupported URI scheme: {}", other))),
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical endpoint identity: `(scheme, host, port, principal)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub scheme: Scheme,
    /// Lowercased host name
    pub host: String,
    /// Explicit port, or the scheme default
    pub port: u16,
    /// Resolved user name; empty for anonymous access
    pub principal: String,
}

impl EndpointKey {
    pub fn new(
        scheme: Scheme,
        host: impl Into<String>,
        port: Option<u16>,
        principal: impl Into<String>,
    ) -> Self {
        Self {
            scheme,
            host: host.into().to_ascii_lowercase(),
            port: port.unwrap_or_else(|| scheme.default_port()),
            principal: principal.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        if !self.principal.is_empty() {
            write!(f, "{}@", self.principal)?;
        }
        write!(f, "{}", self.host)?;
        if self.port != self.scheme.default_port() {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

/// Session secrets; not part of endpoint identity
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub password: Option<SecretString>,
    /// Windows domain for SMB logins
    pub domain: Option<String>,
    /// Private key for SFTP public key authentication
    pub key_file: Option<PathBuf>,
}

impl Credentials {
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into().into_boxed_str()));
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_key_file(mut self, key_file: impl Into<PathBuf>) -> Self {
        self.key_file = Some(key_file.into());
        self
    }
}

/// Everything needed to construct an endpoint
#[derive(Debug, Clone)]
pub struct EndpointTarget {
    pub key: EndpointKey,
    pub credentials: Credentials,
}

impl EndpointTarget {
    pub fn new(key: EndpointKey, credentials: Credentials) -> Self {
        Self { key, credentials }
    }
}

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity handle carried by every [`RemotePath`]
///
/// Two handles are equal only if they were cloned from the same endpoint
/// instance; an endpoint re-created after a close gets a new identity.
#[derive(Debug, Clone)]
pub struct EndpointRef {
    id: u64,
    key: Arc<EndpointKey>,
}

impl EndpointRef {
    /// Allocate a fresh identity for `key`
    pub fn new(key: EndpointKey) -> Self {
        Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
            key: Arc::new(key),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn scheme(&self) -> Scheme {
        self.key.scheme
    }
}

impl PartialEq for EndpointRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EndpointRef {}

impl std::hash::Hash for EndpointRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

/// A live endpoint as cached by the registry
pub struct Endpoint {
    reference: EndpointRef,
    credentials: Credentials,
    policy: SessionPolicy,
    connector: Arc<dyn Connector>,
    config: Arc<FsConfig>,
    closed: AtomicBool,
    persistent: Mutex<Option<SharedTransport>>,
}

impl Endpoint {
    /// Construct an endpoint; for the persistent policy the session is
    /// opened here so that authentication problems surface before the
    /// endpoint becomes visible to anyone.
    pub fn open(
        target: EndpointTarget,
        connector: Arc<dyn Connector>,
        config: Arc<FsConfig>,
    ) -> Result<Self> {
        let policy = config.session_policy(target.key.scheme);
        let reference = EndpointRef::new(target.key);

        let endpoint = Self {
            reference,
            credentials: target.credentials,
            policy,
            connector,
            config,
            closed: AtomicBool::new(false),
            persistent: Mutex::new(None),
        };

        if policy == SessionPolicy::Persistent {
            let transport = endpoint.connect()?;
            *endpoint.persistent.lock() = Some(Arc::new(Mutex::new(transport)));
        }

        tracing::debug!(
            endpoint = %endpoint.reference,
            id = endpoint.reference.id(),
            policy = ?policy,
            "endpoint opened"
        );
        Ok(endpoint)
    }

    pub fn key(&self) -> &EndpointKey {
        self.reference.key()
    }

    pub fn reference(&self) -> &EndpointRef {
        &self.reference
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Absolute root path of this endpoint
    pub fn root(&self) -> RemotePath {
        RemotePath::root(&self.reference)
    }

    /// Parse `raw` as a path on this endpoint
    pub fn path(&self, raw: &str) -> Result<RemotePath> {
        RemotePath::parse(&self.reference, raw)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FsError::EndpointClosed {
                endpoint: self.reference.to_string(),
            })
        }
    }

    /// Open and authenticate a new transport connection
    pub(crate) fn connect(&self) -> Result<Box<dyn crate::backend::Transport>> {
        let endpoint = self.reference.to_string();
        self.connector
            .connect(self.key(), &self.credentials, &self.config)
            .map_err(|e| {
                error_map::map_error(
                    e,
                    &ErrorContext::new(Operation::Connect, &endpoint, &endpoint),
                )
            })
    }

    pub(crate) fn persistent_transport(&self) -> Option<SharedTransport> {
        self.persistent.lock().clone()
    }

    /// Mark closed and shut the persistent session, if any. Idempotent.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = self.persistent.lock().take();
        if let Some(shared) = shared {
            if let Err(e) = shared.lock().close() {
                tracing::warn!(endpoint = %self.reference, error = %e, "failed to close session");
            }
        }
        tracing::debug!(endpoint = %self.reference, id = self.reference.id(), "endpoint closed");
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("key", self.key())
            .field("id", &self.reference.id())
            .field("policy", &self.policy)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_aliases() {
        assert_eq!("ssh".parse::<Scheme>().unwrap(), Scheme::Sftp);
        assert_eq!("CIFS".parse::<Scheme>().unwrap(), Scheme::Smb);
        assert_eq!("dav".parse::<Scheme>().unwrap(), Scheme::WebDav);
        assert_eq!("davs".parse::<Scheme>().unwrap(), Scheme::WebDavs);
        assert!("gopher".parse::<Scheme>().is_err());
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Scheme::Sftp.default_port(), 22);
        assert_eq!(Scheme::Smb.default_port(), 445);
        assert_eq!(Scheme::WebDav.default_port(), 80);
        assert_eq!(Scheme::WebDavs.default_port(), 443);
    }

    #[test]
    fn test_key_identity_ignores_case_of_host() {
        let a = EndpointKey::new(Scheme::Sftp, "Files.Example.com", None, "alice");
        let b = EndpointKey::new(Scheme::Sftp, "files.example.com", Some(22), "alice");
        assert_eq!(a, b);

        let c = EndpointKey::new(Scheme::Sftp, "files.example.com", Some(2222), "alice");
        assert_ne!(a, c);
        let d = EndpointKey::new(Scheme::Sftp, "files.example.com", None, "bob");
        assert_ne!(a, d);
    }

    #[test]
    fn test_key_display() {
        let key = EndpointKey::new(Scheme::Smb, "server", None, "jdoe");
        assert_eq!(key.to_string(), "smb://jdoe@server");
        let key = EndpointKey::new(Scheme::WebDav, "dav.local", Some(8080), "");
        assert_eq!(key.to_string(), "webdav://dav.local:8080");
    }

    #[test]
    fn test_endpoint_ref_identity() {
        let key = EndpointKey::new(Scheme::Memory, "box", None, "");
        let a = EndpointRef::new(key.clone());
        let b = EndpointRef::new(key);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::default().with_password("hunter2").with_domain("CORP");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("CORP"));
    }
}
