//! Checkpoint store backends and migration between them

use courier::kv::{self, Driver, KvError, Meta, Registry, SharedStorage, StorageOptions};
use courier::resume::{FinishedSet, ResumeSession};
use std::collections::HashMap;
use tempfile::TempDir;

fn open(driver: Driver, dir: &TempDir, name: &str) -> SharedStorage {
    let path = dir.path().join(name);
    Registry::builtin()
        .open(driver, &StorageOptions::with_path(path))
        .unwrap()
}

fn sample() -> Meta {
    let mut resume = HashMap::new();
    resume.insert("resume:abc".to_string(), b"{\"x\":1}".to_vec());
    resume.insert("resume:def".to_string(), vec![0, 255, 7, 0]);
    let mut other = HashMap::new();
    other.insert("empty".to_string(), Vec::new());
    other.insert("k".to_string(), b"v".to_vec());

    let mut meta = Meta::new();
    meta.insert("resume".to_string(), resume);
    meta.insert("other".to_string(), other);
    meta
}

/// Every backend pair round-trips a dump without loss
#[test]
fn test_migration_round_trip_between_all_backends() {
    let drivers = [Driver::Legacy, Driver::Embedded, Driver::File];
    for from in drivers {
        for to in drivers {
            let dir = TempDir::new().unwrap();
            let source = open(from, &dir, "source");
            source.migrate_from(sample()).unwrap();

            let target = open(to, &dir, "target");
            let keys = kv::migrate(source.as_ref(), target.as_ref()).unwrap();
            assert_eq!(keys, 4, "{from} -> {to}");
            assert_eq!(target.migrate_to().unwrap(), sample(), "{from} -> {to}");

            let mut namespaces = target.namespaces().unwrap();
            namespaces.sort();
            assert_eq!(namespaces, vec!["other", "resume"], "{from} -> {to}");
        }
    }
}

/// Namespaces are independent key spaces on every backend
#[test]
fn test_namespaces_are_isolated() {
    for driver in [Driver::Legacy, Driver::Embedded, Driver::File] {
        let dir = TempDir::new().unwrap();
        let storage = open(driver, &dir, "store");
        let a = storage.open("a").unwrap();
        let b = storage.open("b").unwrap();

        a.set("key", b"from a").unwrap();
        assert_eq!(a.get("key").unwrap(), b"from a");
        assert!(matches!(b.get("key"), Err(KvError::NotFound)), "{driver}");

        a.delete("key").unwrap();
        assert!(a.get("key").unwrap_err().is_not_found(), "{driver}");
        storage.close().unwrap();
    }
}

/// Resume records written through one backend are readable after migration
#[test]
fn test_resume_session_survives_migration() {
    let dir = TempDir::new().unwrap();
    let legacy = open(Driver::Legacy, &dir, "legacy");
    ResumeSession::open(&legacy, "fp-1")
        .unwrap()
        .save(&FinishedSet::from([0, 3, 9]))
        .unwrap();

    let file = open(Driver::File, &dir, "courier.json");
    kv::migrate(legacy.as_ref(), file.as_ref()).unwrap();
    file.close().unwrap();

    let reopened = open(Driver::File, &dir, "courier.json");
    let finished = ResumeSession::open(&reopened, "fp-1").unwrap().load().unwrap();
    assert_eq!(finished, Some(FinishedSet::from([0, 3, 9])));
}

/// `bolt` is accepted as the embedded driver's historical name
#[test]
fn test_open_with_map_aliases() {
    let dir = TempDir::new().unwrap();
    let options = format!("type=bolt,path={}", dir.path().join("db").display());
    let storage = Registry::builtin()
        .open_with_map(&StorageOptions::parse(&options).unwrap())
        .unwrap();
    assert_eq!(storage.name(), "embedded");
}

/// A registry only opens drivers it knows
#[test]
fn test_unregistered_driver() {
    let dir = TempDir::new().unwrap();
    let result = Registry::empty().open(Driver::File, &StorageOptions::with_path(dir.path()));
    assert!(matches!(result, Err(KvError::UnsupportedDriver(_))));
}
