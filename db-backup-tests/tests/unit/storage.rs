//! Local backend and backend registry

use db_backup::error::StorageError;
use db_backup::storage::{LocalBackend, StorageBackend, StorageRegistry};
use rstest::rstest;
use std::io::{Cursor, Read};
use std::sync::Arc;
use test_utils::{MemoryBackend, TestContext};

#[rstest]
#[case("local", true)]
#[case("Local", true)]
#[case(" LOCAL ", true)]
#[case("azure", false)]
fn test_local_handles(#[case] name: &str, #[case] expected: bool) {
    assert_eq!(LocalBackend::new("/tmp").handles(name), expected);
}

#[test]
fn test_local_write_creates_nested_directories() {
    let ctx = TestContext::new();
    let backend = ctx.local_backend("store");

    let written = backend
        .write("daily/2024/shop.sql.gz", &mut Cursor::new(b"payload".to_vec()), None)
        .unwrap();

    assert_eq!(written, 7);
    assert_eq!(ctx.stored_files("store"), vec!["shop.sql.gz"]);

    let mut data = Vec::new();
    backend
        .read("daily/2024/shop.sql.gz", None)
        .unwrap()
        .read_to_end(&mut data)
        .unwrap();
    assert_eq!(data, b"payload");
}

#[test]
fn test_local_write_replaces_existing_object() {
    let ctx = TestContext::new();
    let backend = ctx.local_backend("store");
    backend.write("a.sql", &mut Cursor::new(b"old".to_vec()), None).unwrap();
    backend.write("a.sql", &mut Cursor::new(b"new".to_vec()), None).unwrap();

    let path = backend.object_path("a.sql").unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"new");
}

#[rstest]
#[case("../escape.sql")]
#[case("/etc/passwd")]
#[case("")]
fn test_local_rejects_unsafe_keys(#[case] key: &str) {
    let backend = LocalBackend::new("/tmp");
    assert!(matches!(
        backend.object_path(key),
        Err(StorageError::InvalidKey { .. })
    ));
}

#[test]
fn test_registry_resolves_names_case_insensitively() {
    let ctx = TestContext::new();
    let mut registry = StorageRegistry::new();
    registry.register(Arc::new(ctx.local_backend("store"))).unwrap();
    registry.register(Arc::new(MemoryBackend::new("Azure"))).unwrap();

    assert!(registry.get("LOCAL").is_some());
    assert!(registry.get("azure").is_some());
    assert!(registry
        .register(Arc::new(MemoryBackend::new("local")))
        .is_err());
}
