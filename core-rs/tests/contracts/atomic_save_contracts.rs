//! Atomic Save Contracts
//!
//! A failed save MUST leave the storage directory and index exactly as they
//! were before the call. A successful save MUST NOT leave scratch entries
//! behind.

#[path = "../common/mod.rs"]
mod common;

use common::{manager, tree, write_bundle, write_manifest};
use idb_storage::{ErrorKind, Storage};
use std::fs;
use tempfile::TempDir;

/// Contract: Architecture mismatch leaves bundle storage untouched
#[test]
fn contract_mismatch_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "x86_64");
    let input = temp.path().join("input");
    let existing = write_bundle(&input, "Existing.app", "com.example.existing", &["x86_64"]);
    manager.application().save_bundle_at(&existing).unwrap();
    let before_tree = tree(manager.application().root_path());
    let before_index = manager.application().persisted_applications();

    let rejected = write_bundle(&input, "Rejected.app", "com.example.existing", &["arm64"]);
    let err = manager.application().save_bundle_at(&rejected).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ArchitectureMismatch);
    assert_eq!(tree(manager.application().root_path()), before_tree);
    assert_eq!(manager.application().persisted_applications(), before_index);
}

/// Contract: An unresolvable test run removes nothing it would have superseded
#[test]
fn contract_unresolvable_test_run_keeps_existing_tests() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let installed = write_bundle(
        &temp.path().join("input"),
        "ExampleTests.xctest",
        "com.example.tests",
        &["arm64"],
    );
    manager.xctest().save_bundle_or_test_run(&installed).unwrap();
    let before_tree = tree(manager.xctest().root_path());

    let upload = temp.path().join("upload");
    write_bundle(&upload, "ExampleTests.xctest", "com.example.tests", &["arm64"]);
    let manifest = write_manifest(
        &upload,
        "Example.xctestrun",
        serde_json::json!({
            "ExampleTests": {"TestBundlePath": "__TESTROOT__/ExampleTests.xctest"},
            "ExampleUITests": {"TestBundleIdentifier": "com.example.uitests"}
        }),
    );
    let err = manager.xctest().save_bundle_or_test_run(&manifest).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::AmbiguousOrUnresolvableInput);
    assert_eq!(tree(manager.xctest().root_path()), before_tree);
    assert!(!manager
        .xctest()
        .test_descriptor_with_id("com.example.tests")
        .unwrap()
        .is_test_run());
}

/// Contract: A staged test run that cannot be read back is never committed
#[cfg(unix)]
#[test]
fn contract_unreadable_staged_test_run_keeps_existing_tests() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let installed = write_bundle(
        &temp.path().join("input"),
        "ExampleTests.xctest",
        "com.example.tests",
        &["arm64"],
    );
    manager.xctest().save_bundle_or_test_run(&installed).unwrap();
    let before_tree = tree(manager.xctest().root_path());

    // The bundle is reachable from the upload only through a relative link,
    // which dangles once the directory is copied into storage.
    let upload = temp.path().join("upload");
    write_bundle(&temp.path().join("real"), "ExampleTests.xctest", "com.example.tests", &["arm64"]);
    fs::create_dir_all(&upload).unwrap();
    std::os::unix::fs::symlink("../real/ExampleTests.xctest", upload.join("ExampleTests.xctest")).unwrap();
    let manifest = write_manifest(
        &upload,
        "Example.xctestrun",
        serde_json::json!({
            "ExampleTests": {"TestBundlePath": "__TESTROOT__/ExampleTests.xctest"}
        }),
    );

    assert!(manager.xctest().save_bundle_or_test_run(&manifest).is_err());

    assert_eq!(tree(manager.xctest().root_path()), before_tree);
    assert_eq!(manager.xctest().list_test_descriptors().unwrap().len(), 1);
    assert!(!manager
        .xctest()
        .test_descriptor_with_id("com.example.tests")
        .unwrap()
        .is_test_run());
}

/// Contract: A malformed bundle is rejected before anything is written
#[test]
fn contract_malformed_bundle_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let broken = temp.path().join("input").join("Broken.xctest");
    fs::create_dir_all(&broken).unwrap();
    fs::write(broken.join("Info.json"), b"{ not json").unwrap();

    let err = manager.xctest().save_bundle_or_test_run(&broken).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    assert!(tree(manager.xctest().root_path()).is_empty());
}

/// Contract: A missing dylib source fails with an I/O error and writes nothing
#[test]
fn contract_missing_file_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");

    let err = manager
        .dylib()
        .save_file(&temp.path().join("libMissing.dylib"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::IoFailure);
    assert!(tree(manager.dylib().root_path()).is_empty());
}

/// Contract: Successful saves leave no staging or superseded entries
#[test]
fn contract_no_scratch_left_after_success() {
    let temp = TempDir::new().unwrap();
    let manager = manager(&temp, "T1", "arm64");
    let input = temp.path().join("input");

    for round in 0..3 {
        let dir = input.join(format!("round-{}", round));
        let bundle = write_bundle(&dir, "Foo.framework", "com.example.foo", &["arm64"]);
        let descriptor = manager.framework().parser().parse(&bundle).unwrap();
        manager.framework().save_bundle(&descriptor).unwrap();

        fs::create_dir_all(&dir).unwrap();
        let dylib = dir.join("libFoo.dylib");
        fs::write(&dylib, format!("round {}", round)).unwrap();
        manager.dylib().save_file(&dylib).unwrap();
    }

    for root in [manager.framework().root_path(), manager.dylib().root_path()] {
        let hidden: Vec<_> = fs::read_dir(root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with('.'))
            .collect();
        assert!(hidden.is_empty(), "scratch entries left in {}: {:?}", root.display(), hidden);
    }
    assert_eq!(
        fs::read_to_string(manager.dylib().root_path().join("libFoo.dylib")).unwrap(),
        "round 2"
    );
}
