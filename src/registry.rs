//! Endpoint registry
//!
//! Caches one live [`Endpoint`] per [`EndpointKey`] and knows which
//! [`Connector`] serves each scheme. Endpoints stay cached until they are
//! closed explicitly; a closed endpoint is never handed out again.
//!
//! # Example
//!
//! ```
//! use farpath::backend::memory::{MemoryBackend, MemoryConnector};
//! use farpath::{EndpointRegistry, Scheme};
//! use std::sync::Arc;
//!
//! let registry = EndpointRegistry::new();
//! registry.register_connector(Scheme::Memory, Arc::new(MemoryConnector::new(MemoryBackend::new())));
//!
//! let (endpoint, path) = registry.open_uri("mem://scratch/reports/q3.csv").unwrap();
//! assert_eq!(path.to_string(), "/reports/q3.csv");
//! registry.close(&endpoint);
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::Connector;
use crate::config::FsConfig;
use crate::endpoint::{Endpoint, EndpointKey, EndpointTarget, Scheme};
use crate::error::{FsError, Result};
use crate::logging;
use crate::path::RemotePath;
use crate::uri;

/// Cache slot for one key, filled outside the map lock
type Slot = Arc<OnceCell<Arc<Endpoint>>>;

/// Process-wide cache of live endpoints
pub struct EndpointRegistry {
    endpoints: DashMap<EndpointKey, Slot>,
    connectors: RwLock<HashMap<Scheme, Arc<dyn Connector>>>,
    config: Arc<FsConfig>,
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.endpoints.len())
            .field("connectors", &self.connectors.read().keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl EndpointRegistry {
    /// Registry with default configuration and the built-in connectors
    pub fn new() -> Self {
        Self::with_config(FsConfig::default())
    }

    pub fn with_config(config: FsConfig) -> Self {
        let registry = Self {
            endpoints: DashMap::new(),
            connectors: RwLock::new(HashMap::new()),
            config: Arc::new(config),
        };
        registry.register_builtin();
        registry
    }

    /// Register connectors for every protocol compiled in
    fn register_builtin(&self) {
        #[cfg(feature = "sftp")]
        self.register_connector(
            Scheme::Sftp,
            Arc::new(crate::backend::sftp::SftpConnector::new()),
        );

        #[cfg(feature = "smb")]
        self.register_connector(Scheme::Smb, Arc::new(crate::backend::smb::SmbConnector::new()));

        #[cfg(feature = "webdav")]
        {
            let connector = Arc::new(crate::backend::webdav::WebDavConnector::new());
            self.register_connector(Scheme::WebDav, connector.clone());
            self.register_connector(Scheme::WebDavs, connector);
        }
    }

    /// Install or replace the connector for `scheme`
    pub fn register_connector(&self, scheme: Scheme, connector: Arc<dyn Connector>) {
        tracing::debug!(scheme = %scheme, backend = connector.backend_name(), "connector registered");
        self.connectors.write().insert(scheme, connector);
    }

    /// Check if a connector is registered for `scheme`
    pub fn has_connector(&self, scheme: Scheme) -> bool {
        self.connectors.read().contains_key(&scheme)
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    fn connector(&self, scheme: Scheme) -> Result<Arc<dyn Connector>> {
        self.connectors
            .read()
            .get(&scheme)
            .cloned()
            .ok_or_else(|| FsError::unsupported(scheme.as_str(), "connect"))
    }

    /// Cached endpoint for `key`, if any
    pub fn get(&self, key: &EndpointKey) -> Option<Arc<Endpoint>> {
        self.endpoints
            .get(key)
            .and_then(|slot| slot.value().get().cloned())
    }

    /// Return the cached endpoint for the target's key, or construct one
    ///
    /// The map only ever holds a slot per key; construction runs on the
    /// slot after the map lock is released, so a slow connect never
    /// stalls lookups of other keys. Concurrent callers for the same key
    /// wait on the slot and see exactly one construction. When
    /// construction fails (for instance authentication of a persistent
    /// session) the slot is evicted again.
    pub fn resolve(&self, target: EndpointTarget, create_if_absent: bool) -> Result<Arc<Endpoint>> {
        if let Some(existing) = self.get(&target.key) {
            return Ok(existing);
        }
        if !create_if_absent {
            return Err(FsError::NotFound {
                path: target.key.to_string(),
            });
        }

        let connector = self.connector(target.key.scheme)?;
        loop {
            let slot = Arc::clone(self.endpoints.entry(target.key.clone()).or_default().value());
            let filled = slot.get_or_try_init(|| {
                let endpoint =
                    Endpoint::open(target.clone(), Arc::clone(&connector), Arc::clone(&self.config))?;
                tracing::debug!(endpoint = %endpoint.key(), "endpoint registered");
                Ok::<_, FsError>(Arc::new(endpoint))
            });

            let endpoint = match filled {
                Ok(endpoint) => Arc::clone(endpoint),
                Err(e) => {
                    self.endpoints.remove_if(&target.key, |_, cached| {
                        Arc::ptr_eq(cached, &slot) && cached.get().is_none()
                    });
                    return Err(e);
                }
            };

            // A failed peer may have evicted the slot while it was filling
            let cached = match self.endpoints.entry(target.key.clone()) {
                Entry::Occupied(entry) => Arc::ptr_eq(entry.get(), &slot),
                Entry::Vacant(entry) => {
                    entry.insert(slot);
                    true
                }
            };
            if cached {
                return Ok(endpoint);
            }
            endpoint.close();
        }
    }

    /// Parse `uri`, resolve its endpoint (creating it if needed) and return
    /// the path on it
    pub fn open_uri(&self, uri: &str) -> Result<(Arc<Endpoint>, RemotePath)> {
        let parsed = uri::parse_uri(uri, &self.config)?;
        let endpoint = self.resolve(parsed.target, true)?;
        let path = endpoint.path(&parsed.path)?;
        Ok((endpoint, path))
    }

    /// Evict `endpoint` and close it
    ///
    /// Only this exact instance is evicted; a newer endpoint cached under
    /// the same key is left alone. Closing twice is harmless.
    pub fn close(&self, endpoint: &Arc<Endpoint>) {
        let removed = self
            .endpoints
            .remove_if(endpoint.key(), |_, slot| {
                slot.get().is_some_and(|cached| Arc::ptr_eq(cached, endpoint))
            })
            .is_some();
        endpoint.close();
        if removed {
            tracing::debug!(endpoint = %endpoint.key(), "endpoint evicted");
        }
    }

    /// Close and evict every cached endpoint
    pub fn close_all(&self) {
        let keys: Vec<EndpointKey> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some(endpoint) = self.endpoints.remove(&key).and_then(|(_, slot)| slot.get().cloned()) {
                endpoint.close();
            }
        }
    }

    /// Number of cached endpoints; slots still under construction do not count
    pub fn len(&self) -> usize {
        self.endpoints.iter().filter(|slot| slot.value().get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceCell<EndpointRegistry> = OnceCell::new();

/// Get the global endpoint registry, with default configuration unless
/// [`init_global`] ran first
pub fn global_registry() -> &'static EndpointRegistry {
    GLOBAL_REGISTRY.get_or_init(EndpointRegistry::new)
}

/// Configure the global registry from `config` and install its logging
///
/// Must run before anything touches the global registry; afterwards it
/// fails with a configuration error.
pub fn init_global(config: FsConfig) -> Result<&'static EndpointRegistry> {
    let mut installed = false;
    let registry = GLOBAL_REGISTRY.get_or_try_init(|| {
        if !logging::init_logging(&config.logging)? {
            tracing::debug!("keeping the log subscriber installed by the host");
        }
        installed = true;
        Ok::<_, FsError>(EndpointRegistry::with_config(config))
    })?;
    if !installed {
        return Err(FsError::Config(
            "global registry is already initialized".to_string(),
        ));
    }
    tracing::info!(connectors = registry.connectors.read().len(), "global registry configured");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryConnector};
    use crate::endpoint::Credentials;
    use crate::error::ErrorKind;
    use crate::backend::{Transport, TransportResult};
    use crate::session::SessionPolicy;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Takes its time connecting to the host named `slow`
    struct SlowConnector {
        inner: MemoryConnector,
        started: Arc<AtomicBool>,
    }

    impl Connector for SlowConnector {
        fn connect(
            &self,
            key: &EndpointKey,
            credentials: &Credentials,
            config: &FsConfig,
        ) -> TransportResult<Box<dyn Transport>> {
            if key.host == "slow" {
                self.started.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1500));
            }
            self.inner.connect(key, credentials, config)
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    fn registry(backend: &MemoryBackend) -> EndpointRegistry {
        let registry = EndpointRegistry::new();
        registry.register_connector(Scheme::Memory, Arc::new(MemoryConnector::new(backend.clone())));
        registry
    }

    fn target(host: &str) -> EndpointTarget {
        EndpointTarget::new(
            EndpointKey::new(Scheme::Memory, host, None, "tester"),
            Credentials::default(),
        )
    }

    #[test]
    fn test_resolve_caches() {
        let registry = registry(&MemoryBackend::new());
        let a = registry.resolve(target("box"), true).unwrap();
        let b = registry.resolve(target("BOX"), true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_without_create() {
        let registry = registry(&MemoryBackend::new());
        let err = registry.resolve(target("box"), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_scheme_connector() {
        let registry = EndpointRegistry::new();
        let err = registry.resolve(target("box"), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_close_then_resolve_creates_new_endpoint() {
        let registry = registry(&MemoryBackend::new());
        let first = registry.resolve(target("box"), true).unwrap();
        registry.close(&first);
        assert!(!first.is_open());
        assert!(registry.is_empty());

        let second = registry.resolve(target("box"), true).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_open());
        assert_ne!(first.reference(), second.reference());
    }

    #[test]
    fn test_close_stale_handle_keeps_new_endpoint() {
        let registry = registry(&MemoryBackend::new());
        let first = registry.resolve(target("box"), true).unwrap();
        registry.close(&first);
        let second = registry.resolve(target("box"), true).unwrap();

        registry.close(&first);
        assert!(second.is_open());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_construction_not_cached() {
        let backend = MemoryBackend::new();
        let mut config = FsConfig::default();
        config.sessions.memory = SessionPolicy::Persistent;
        let registry = EndpointRegistry::with_config(config);
        registry.register_connector(Scheme::Memory, Arc::new(MemoryConnector::new(backend.clone())));

        backend.reject_logins(true);
        let err = registry.resolve(target("box"), true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
        assert!(registry.is_empty());

        backend.reject_logins(false);
        assert!(registry.resolve(target("box"), true).is_ok());
    }

    #[test]
    fn test_open_uri() {
        let registry = registry(&MemoryBackend::new());
        let (endpoint, path) = registry.open_uri("mem://tester@box/a/b").unwrap();
        assert_eq!(endpoint.key(), &target("box").key);
        assert_eq!(path.to_string(), "/a/b");
        assert_eq!(path.endpoint(), endpoint.reference());
    }

    #[test]
    fn test_close_all() {
        let registry = registry(&MemoryBackend::new());
        let a = registry.resolve(target("one"), true).unwrap();
        let b = registry.resolve(target("two"), true).unwrap();
        registry.close_all();
        assert!(registry.is_empty());
        assert!(!a.is_open() && !b.is_open());
    }

    #[test]
    fn test_slow_construction_does_not_block_cached_endpoints() {
        let mut config = FsConfig::default();
        config.sessions.memory = SessionPolicy::Persistent;
        let registry = Arc::new(EndpointRegistry::with_config(config));
        let started = Arc::new(AtomicBool::new(false));
        registry.register_connector(
            Scheme::Memory,
            Arc::new(SlowConnector {
                inner: MemoryConnector::new(MemoryBackend::new()),
                started: Arc::clone(&started),
            }),
        );

        let hosts: Vec<String> = (0..64).map(|i| format!("host{}", i)).collect();
        for host in &hosts {
            registry.resolve(target(host), true).unwrap();
        }

        let slow = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.resolve(target("slow"), true))
        };
        while !started.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(5));
        }

        let begin = Instant::now();
        for host in &hosts {
            assert!(registry.get(&target(host).key).is_some());
        }
        assert!(registry.get(&target("slow").key).is_none());
        assert!(begin.elapsed() < Duration::from_millis(500));

        let slow = slow.join().unwrap().unwrap();
        assert!(Arc::ptr_eq(&slow, &registry.get(&target("slow").key).unwrap()));
        assert_eq!(registry.len(), 65);
    }
}
