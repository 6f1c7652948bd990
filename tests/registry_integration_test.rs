/*!
 * Integration tests for the endpoint registry and session scoping
 *
 * These tests verify endpoint identity under concurrency, eviction on
 * close, and that every session is released whatever the outcome of the
 * operation it served.
 */

use std::sync::{Arc, Barrier};
use std::thread;

use farpath::backend::memory::{MemoryBackend, MemoryConnector};
use farpath::{
    Credentials, EndpointKey, EndpointRegistry, EndpointTarget, ErrorKind, FsConfig, RemoteFs,
    Scheme, SessionPolicy, WriteMode,
};

fn registry_with(backend: &MemoryBackend, policy: SessionPolicy) -> EndpointRegistry {
    let mut config = FsConfig::default();
    config.sessions.memory = policy;
    let registry = EndpointRegistry::with_config(config);
    registry.register_connector(Scheme::Memory, Arc::new(MemoryConnector::new(backend.clone())));
    registry
}

fn target() -> EndpointTarget {
    EndpointTarget::new(
        EndpointKey::new(Scheme::Memory, "shared", None, "svc"),
        Credentials::default(),
    )
}

/// Concurrent resolution of one key constructs exactly one endpoint
#[test]
fn test_concurrent_resolve_constructs_once() {
    const THREADS: usize = 16;
    let backend = MemoryBackend::new();
    // Persistent endpoints connect while being constructed, so the
    // connection count equals the construction count
    let registry = Arc::new(registry_with(&backend, SessionPolicy::Persistent));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.resolve(target(), true).unwrap()
            })
        })
        .collect();
    let endpoints: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(backend.opened(), 1);
    assert_eq!(registry.len(), 1);
    assert!(endpoints.iter().all(|e| Arc::ptr_eq(e, &endpoints[0])));
}

#[test]
fn test_closed_endpoint_rejects_operations_and_is_replaced() {
    let backend = MemoryBackend::new();
    let registry = registry_with(&backend, SessionPolicy::Persistent);
    let (fs, path) = RemoteFs::open_in(&registry, "mem://svc@shared/file.txt").unwrap();
    fs.write(&path, b"v1", WriteMode::CreateNew).unwrap();

    registry.close(fs.endpoint());
    assert_eq!(backend.open_connections(), 0);
    let err = fs.read(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EndpointClosed);

    // Old paths do not carry over to the replacement endpoint
    let (fresh, fresh_path) = RemoteFs::open_in(&registry, "mem://svc@shared/file.txt").unwrap();
    assert!(!Arc::ptr_eq(fs.endpoint(), fresh.endpoint()));
    assert_ne!(path, fresh_path);
    assert_eq!(fresh.read(&fresh_path).unwrap(), b"v1");
    assert_eq!(fresh.read(&path).unwrap_err().kind(), ErrorKind::InvalidArgument);
}

#[test]
fn test_transient_sessions_released_on_success_and_failure() {
    let backend = MemoryBackend::new();
    backend.insert_file("/data/a.txt", "alpha");
    let registry = registry_with(&backend, SessionPolicy::Transient);
    let (fs, root) = RemoteFs::open_in(&registry, "mem://svc@shared/").unwrap();

    let a = root.resolve_str("data/a.txt").unwrap();
    fs.read(&a).unwrap();
    fs.stat(&a).unwrap();
    assert!(fs.read(&root.resolve_str("missing").unwrap()).is_err());

    backend.fail_on("get");
    assert!(fs.read(&a).is_err());
    backend.clear_failures();

    assert_eq!(backend.opened(), 4);
    assert_eq!(backend.open_connections(), 0);
}

#[test]
fn test_persistent_session_is_reused() {
    let backend = MemoryBackend::new();
    let registry = registry_with(&backend, SessionPolicy::Persistent);
    let (fs, dir) = RemoteFs::open_in(&registry, "mem://svc@shared/work").unwrap();

    fs.create_directory(&dir, false).unwrap();
    fs.write(&dir.child("x").unwrap(), b"x", WriteMode::Overwrite).unwrap();
    assert_eq!(fs.list_dir(&dir, |_| true).unwrap().count(), 1);

    assert_eq!(backend.opened(), 1);
    assert_eq!(backend.open_connections(), 1);
    registry.close_all();
    assert_eq!(backend.open_connections(), 0);
}

#[test]
fn test_rejected_login_surfaces_as_authentication_failure() {
    let backend = MemoryBackend::new();
    let registry = registry_with(&backend, SessionPolicy::Transient);
    let (fs, root) = RemoteFs::open_in(&registry, "mem://svc@shared/").unwrap();

    backend.reject_logins(true);
    let err = fs.stat(&root).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    assert!(err.to_string().contains("shared"));
}

#[test]
fn test_uri_identity_is_case_insensitive_for_hosts() {
    let backend = MemoryBackend::new();
    let registry = registry_with(&backend, SessionPolicy::Transient);
    let (a, _) = RemoteFs::open_in(&registry, "mem://svc@Shared/").unwrap();
    let (b, _) = RemoteFs::open_in(&registry, "mem://svc@SHARED/x").unwrap();
    let (c, _) = RemoteFs::open_in(&registry, "mem://other@shared/").unwrap();

    assert!(Arc::ptr_eq(a.endpoint(), b.endpoint()));
    assert!(!Arc::ptr_eq(a.endpoint(), c.endpoint()));
    assert_eq!(registry.len(), 2);
}
