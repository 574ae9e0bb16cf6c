//! Shared fixtures for integration and contract tests
#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use idb_storage::{StorageConfig, StorageManager, TargetInfo};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Create a manager for target `udid` below `<temp>/data`.
pub fn manager(temp: &TempDir, udid: &str, arch: &str) -> StorageManager {
    StorageManager::manager_for_target(
        Arc::new(TargetInfo::new(udid, arch)),
        &StorageConfig::new(temp.path().join("data")),
    )
    .unwrap()
}

/// Create `<dir>/<file_name>` as a bundle declaring `identifier` and `architectures`.
pub fn write_bundle(dir: &Path, file_name: &str, identifier: &str, architectures: &[&str]) -> PathBuf {
    let bundle = dir.join(file_name);
    fs::create_dir_all(&bundle).unwrap();
    let info = serde_json::json!({
        "CFBundleIdentifier": identifier,
        "CFBundleShortVersionString": "1.0",
        "SupportedArchitectures": architectures,
    });
    fs::write(bundle.join("Info.json"), info.to_string()).unwrap();
    fs::write(bundle.join("binary"), b"\xcf\xfa\xed\xfe").unwrap();
    bundle
}

/// Create `<dir>/<file_name>` as a test-run manifest with the given targets.
pub fn write_manifest(dir: &Path, file_name: &str, targets: serde_json::Value) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let mut object = serde_json::Map::new();
    object.insert(
        "__xctestrun_metadata__".to_string(),
        serde_json::json!({"FormatVersion": 1}),
    );
    if let serde_json::Value::Object(targets) = targets {
        object.extend(targets);
    }
    let path = dir.join(file_name);
    fs::write(&path, serde_json::Value::Object(object).to_string()).unwrap();
    path
}

/// Pack the contents of `dir` into `<archive>` as gzip-compressed tar.
pub fn write_tar_gz(dir: &Path, archive: &Path) {
    let file = fs::File::create(archive).unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        let name = path.file_name().unwrap().to_owned();
        if path.is_dir() {
            builder.append_dir_all(&name, &path).unwrap();
        } else {
            builder.append_path_with_name(&path, &name).unwrap();
        }
    }
    builder.into_inner().unwrap().finish().unwrap();
}

/// Names of the visible top-level entries of `dir`, sorted.
pub fn entry_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// Every path below `dir`, relative to it, sorted. Includes hidden entries.
pub fn tree(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|entry| entry.unwrap().path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    paths.sort();
    paths
}
