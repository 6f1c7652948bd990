/*!
 * Integration tests for file operations across backend dialects
 *
 * The in-memory backend imitates the status codes of SFTP, SMB and
 * WebDAV servers, so each scenario here runs against all three.
 */

use std::sync::Arc;
use tempfile::TempDir;

use farpath::backend::memory::{Dialect, MemoryBackend, MemoryConnector};
use farpath::{
    AccessMode, CopyOptions, EndpointRegistry, ErrorKind, FsConfig, PermissionSet, RemoteFs,
    RemotePath, Scheme, WriteMode,
};

const DIALECTS: [Dialect; 3] = [Dialect::Sftp, Dialect::Smb, Dialect::Http];

fn open(backend: &MemoryBackend, config: FsConfig) -> (RemoteFs, RemotePath) {
    farpath::logging::init_test_logging();
    let registry = EndpointRegistry::with_config(config);
    registry.register_connector(Scheme::Memory, Arc::new(MemoryConnector::new(backend.clone())));
    RemoteFs::open_in(&registry, "mem://tester@box/").unwrap()
}

fn names(fs: &RemoteFs, dir: &RemotePath) -> Vec<String> {
    fs.list_dir(dir, |_| true)
        .unwrap()
        .map(|p| p.file_name().unwrap().to_string())
        .collect()
}

#[test]
fn test_delete_non_empty_directory_in_every_dialect() {
    for dialect in DIALECTS {
        let backend = MemoryBackend::with_dialect(dialect);
        backend.insert_file("/dir/keep.txt", "x");
        let (fs, root) = open(&backend, FsConfig::default());
        let dir = root.child("dir").unwrap();

        let err = fs.delete(&dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DirectoryNotEmpty, "{:?}", dialect);
        assert!(backend.exists("/dir/keep.txt"), "{:?}", dialect);

        let file = dir.child("keep.txt").unwrap();
        fs.delete(&file).unwrap();
        let err = fs.stat(&file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", dialect);

        fs.delete(&dir).unwrap();
        assert!(!backend.exists("/dir"), "{:?}", dialect);
        let err = fs.stat(&dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", dialect);
        assert!(!fs.exists(&dir).unwrap());

        let err = fs.delete(&dir).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", dialect);
    }
}

#[test]
fn test_recursive_create_in_every_dialect() {
    for dialect in DIALECTS {
        let backend = MemoryBackend::with_dialect(dialect);
        backend.insert_dir("/a");
        let (fs, root) = open(&backend, FsConfig::default());
        let deep = root.resolve_str("a/b/c/d").unwrap();

        fs.create_directory(&deep, true).unwrap();
        assert!(backend.is_dir("/a/b/c/d"), "{:?}", dialect);
        // Idempotent for existing directories
        fs.create_directory(&deep, true).unwrap();

        let err = fs.create_directory(&deep, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{:?}", dialect);
    }
}

#[test]
fn test_copy_is_staged_through_local_temp_file() {
    let staging = TempDir::new().unwrap();
    let config = FsConfig {
        staging_dir: Some(staging.path().to_path_buf()),
        ..FsConfig::default()
    };

    for dialect in [Dialect::Sftp, Dialect::Smb] {
        let backend = MemoryBackend::with_dialect(dialect);
        backend.insert_file("/src/report.csv", "a,b\n1,2\n");
        backend.insert_dir("/dst");
        let (fs, root) = open(&backend, config.clone());

        let from = root.resolve_str("src/report.csv").unwrap();
        let to = root.resolve_str("dst/report.csv").unwrap();
        fs.copy(&from, &to, CopyOptions::default()).unwrap();

        assert_eq!(backend.contents("/dst/report.csv").unwrap(), b"a,b\n1,2\n");
        assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
    }
}

#[test]
fn test_failed_staged_copy_cleans_up() {
    let staging = TempDir::new().unwrap();
    let config = FsConfig {
        staging_dir: Some(staging.path().to_path_buf()),
        ..FsConfig::default()
    };
    let backend = MemoryBackend::new();
    backend.insert_file("/f", "data");
    let (fs, root) = open(&backend, config);

    backend.fail_on("put");
    let err = fs
        .copy(&root.child("f").unwrap(), &root.child("g").unwrap(), CopyOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert!(!backend.exists("/g"));
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

#[test]
fn test_copy_uses_server_side_copy_where_available() {
    let staging = TempDir::new().unwrap();
    let config = FsConfig {
        staging_dir: Some(staging.path().to_path_buf()),
        ..FsConfig::default()
    };
    let backend = MemoryBackend::with_dialect(Dialect::Http);
    backend.insert_file("/a.txt", "payload");
    let (fs, root) = open(&backend, config);

    // The tree refuses reads, so only COPY can succeed
    backend.fail_on("get");
    fs.copy(&root.child("a.txt").unwrap(), &root.child("b.txt").unwrap(), CopyOptions::default())
        .unwrap();
    assert_eq!(backend.contents("/b.txt").unwrap(), b"payload");
}

#[test]
fn test_copy_replace_existing() {
    for dialect in DIALECTS {
        let backend = MemoryBackend::with_dialect(dialect);
        backend.insert_file("/a", "new");
        backend.insert_file("/b", "old");
        let (fs, root) = open(&backend, FsConfig::default());
        let (a, b) = (root.child("a").unwrap(), root.child("b").unwrap());

        let err = fs.copy(&a, &b, CopyOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{:?}", dialect);
        assert_eq!(backend.contents("/b").unwrap(), b"old");

        fs.copy(&a, &b, CopyOptions::replace_existing()).unwrap();
        assert_eq!(backend.contents("/b").unwrap(), b"new", "{:?}", dialect);
    }
}

#[test]
fn test_copy_directory_creates_empty_directory() {
    let backend = MemoryBackend::new();
    backend.insert_file("/tree/leaf", "x");
    let (fs, root) = open(&backend, FsConfig::default());

    fs.copy(&root.child("tree").unwrap(), &root.child("clone").unwrap(), CopyOptions::default())
        .unwrap();
    assert!(backend.is_dir("/clone"));
    assert!(!backend.exists("/clone/leaf"));
}

#[test]
fn test_listing_is_a_snapshot() {
    let backend = MemoryBackend::with_dialect(Dialect::Smb);
    backend.insert_file("/d/one", "1");
    let (fs, root) = open(&backend, FsConfig::default());
    let dir = root.child("d").unwrap();

    let listing = fs.list_dir(&dir, |_| true).unwrap();
    backend.insert_file("/d/two", "2");
    assert_eq!(listing.len(), 1);
    assert_eq!(names(&fs, &dir), ["one", "two"]);

    let err = fs.list_dir(&root.child("nope").unwrap(), |_| true).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_listing_keeps_odd_names_verbatim() {
    let backend = MemoryBackend::new();
    backend.insert_file("/d/~", "home-looking name");
    backend.insert_file("/d/a b", "space");
    let (fs, root) = open(&backend, FsConfig::default());
    let dir = root.child("d").unwrap();

    let entries: Vec<RemotePath> = fs.list_dir(&dir, |_| true).unwrap().collect();
    for entry in &entries {
        assert!(entry.is_absolute());
        assert!(entry.starts_with(&dir));
        fs.stat(entry).unwrap();
    }
    assert_eq!(names(&fs, &dir), ["a b", "~"]);
}

#[test]
fn test_access_denied_and_check_access() {
    let backend = MemoryBackend::new();
    backend.insert_dir("/locked");
    backend.set_mode("/locked", 0o500);
    let (fs, root) = open(&backend, FsConfig::default());
    let locked = root.child("locked").unwrap();

    let err = fs
        .write(&locked.child("f").unwrap(), b"x", WriteMode::Overwrite)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    fs.check_access(&locked, AccessMode::READ | AccessMode::EXECUTE).unwrap();
    let err = fs.check_access(&locked, AccessMode::WRITE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AccessDenied);

    let attrs = fs.stat(&locked).unwrap();
    assert!(attrs.is_directory());
    assert_eq!(attrs.permissions.unwrap().to_symbolic(), "-r-x------");
}

#[test]
fn test_permissions_round_trip_through_backend() {
    let backend = MemoryBackend::new();
    backend.insert_file("/run.sh", "#!/bin/sh\n");
    let (fs, root) = open(&backend, FsConfig::default());
    let script = root.child("run.sh").unwrap();

    let perms = PermissionSet::from_symbolic("rwxr-x---").unwrap();
    fs.set_permissions(&script, perms).unwrap();
    assert_eq!(fs.stat(&script).unwrap().permissions, Some(perms));
    fs.check_access(&script, AccessMode::all()).unwrap();
}

#[test]
fn test_attributes_without_posix_modes() {
    for dialect in [Dialect::Smb, Dialect::Http] {
        let backend = MemoryBackend::with_dialect(dialect);
        backend.insert_file("/doc.txt", "12345");
        let (fs, root) = open(&backend, FsConfig::default());

        let attrs = fs.stat(&root.child("doc.txt").unwrap()).unwrap();
        assert!(attrs.is_regular_file(), "{:?}", dialect);
        assert_eq!(attrs.size, 5);
        assert!(attrs.permissions.is_none());
        assert!(fs.stat(&root).unwrap().is_directory());
    }
}

#[test]
fn test_read_write_and_exists() {
    for dialect in DIALECTS {
        let backend = MemoryBackend::with_dialect(dialect);
        let (fs, root) = open(&backend, FsConfig::default());
        let file = root.child("notes.md").unwrap();

        assert!(!fs.exists(&file).unwrap());
        fs.write(&file, b"# notes", WriteMode::CreateNew).unwrap();
        assert!(fs.exists(&file).unwrap());
        assert_eq!(fs.read(&file).unwrap(), b"# notes");

        let err = fs
            .write(&root.resolve_str("missing/dir/x").unwrap(), b"x", WriteMode::Overwrite)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", dialect);
    }
}
