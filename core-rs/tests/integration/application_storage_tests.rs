//! Integration tests for application bundle storage
//!
//! Tests the application views and the architecture precondition:
//! - Save updates both the identifier set and the application map
//! - Architecture mismatch is terminal and names both sets
//! - Re-saving an identifier supersedes the old entry
//! - Archive uploads

#[path = "../common/mod.rs"]
mod common;

use common::{entry_names, manager, write_bundle, write_tar_gz};
use idb_storage::{ErrorKind, Storage, StorageError};
use std::collections::BTreeSet;
use tempfile::TempDir;

/// Test: arm64 app saved on an arm64 target, then rejected on an x86_64 one
#[test]
fn test_application_architecture_scenario() {
    let temp = TempDir::new().unwrap();
    let app = write_bundle(&temp.path().join("input"), "Example.app", "com.example.app", &["arm64"]);

    let arm = manager(&temp, "T1", "arm64");
    arm.application().save_bundle_at(&app).unwrap();
    assert!(arm
        .application()
        .persisted_application_bundle_ids()
        .contains("com.example.app"));

    let intel = manager(&temp, "T2", "x86_64");
    let err = intel.application().save_bundle_at(&app).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArchitectureMismatch);
    match err {
        StorageError::ArchitectureMismatch { target, supported } => {
            assert_eq!(target, BTreeSet::from(["x86_64".to_string()]));
            assert_eq!(supported, BTreeSet::from(["arm64".to_string()]));
        }
        other => panic!("Expected ArchitectureMismatch, got {:?}", other),
    }
    assert!(intel.application().persisted_application_bundle_ids().is_empty());
}

/// Test: A universal app is accepted by both architectures
#[test]
fn test_universal_application_accepted_everywhere() {
    let temp = TempDir::new().unwrap();
    let app = write_bundle(
        &temp.path().join("input"),
        "Example.app",
        "com.example.app",
        &["arm64", "x86_64"],
    );

    for (udid, arch) in [("T1", "arm64"), ("T2", "x86_64")] {
        let manager = manager(&temp, udid, arch);
        let descriptor = manager.application().bundles().parser().parse(&app).unwrap();
        manager.application().check_architecture(&descriptor).unwrap();
        manager.application().save_bundle_at(&app).unwrap();
    }
}

/// Test: Identifier set and application map always agree
#[test]
fn test_views_are_consistent() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let input = temp.path().join("input");

    for (name, id) in [("A.app", "com.example.a"), ("B.app", "com.example.b")] {
        let app = write_bundle(&input, name, id, &["arm64"]);
        manager.application().save_bundle_at(&app).unwrap();

        let ids = manager.application().persisted_application_bundle_ids();
        let apps = manager.application().persisted_applications();
        assert_eq!(ids, apps.keys().cloned().collect::<BTreeSet<_>>());
    }

    let apps = manager.application().persisted_applications();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps["com.example.b"].descriptor.name, "B");
}

/// Test: Two bundles declaring one identifier leave a single entry
#[test]
fn test_same_identifier_supersedes() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");

    let first = write_bundle(&temp.path().join("v1"), "Example.app", "com.example.app", &["arm64"]);
    manager.application().save_bundle_at(&first).unwrap();
    let second = write_bundle(&temp.path().join("v2"), "ExampleRenamed.app", "com.example.app", &["arm64"]);
    let saved = manager.application().save_bundle_at(&second).unwrap();

    let apps = manager.application().persisted_applications();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps["com.example.app"].descriptor.path, saved);
    assert_eq!(entry_names(manager.application().root_path()), vec!["com.example.app"]);
    assert_eq!(
        entry_names(&manager.application().root_path().join("com.example.app")),
        vec!["ExampleRenamed.app"]
    );
}

/// Test: An app inside a gzip tarball is unpacked and stored
#[test]
fn test_save_application_from_archive() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let upload = temp.path().join("upload");
    write_bundle(&upload, "Example.app", "com.example.app", &["arm64"]);
    let archive = temp.path().join("Example.tar.gz");
    write_tar_gz(&upload, &archive);

    let saved = manager.application().save_bundle_from_archive(&archive).unwrap();

    assert!(saved.is_dir());
    assert!(saved.starts_with(manager.application().root_path()));
    assert!(manager
        .application()
        .persisted_application_bundle_ids()
        .contains("com.example.app"));
}

/// Test: An archive without an app is rejected
#[test]
fn test_archive_without_application_is_unresolvable() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let upload = temp.path().join("upload");
    write_bundle(&upload, "Example.framework", "com.example.framework", &["arm64"]);
    let archive = temp.path().join("Example.tar.gz");
    write_tar_gz(&upload, &archive);

    let err = manager.application().save_bundle_from_archive(&archive).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AmbiguousOrUnresolvableInput);
    assert!(manager.application().persisted_applications().is_empty());
}
