//! Test-run manifests (`.xctestrun`)
//!
//! A manifest is a JSON object keyed by test-target name. The
//! `__xctestrun_metadata__` key carries format metadata and is not a target.
//! Paths may use `__TESTROOT__` (the manifest's directory) and `__TESTHOST__`
//! (the target's expanded `TestHostPath`).

use crate::errors::{IoResultExt, Result, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

pub const METADATA_KEY: &str = "__xctestrun_metadata__";
pub const TEST_ROOT_TOKEN: &str = "__TESTROOT__";
pub const TEST_HOST_TOKEN: &str = "__TESTHOST__";

/// Configuration of a single test target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestTargetConfig {
    #[serde(rename = "TestBundlePath", default, skip_serializing_if = "Option::is_none")]
    pub test_bundle_path: Option<String>,
    #[serde(rename = "TestHostPath", default, skip_serializing_if = "Option::is_none")]
    pub test_host_path: Option<String>,
    #[serde(rename = "TestBundleIdentifier", default, skip_serializing_if = "Option::is_none")]
    pub test_bundle_identifier: Option<String>,
    #[serde(rename = "EnvironmentVariables", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment_variables: BTreeMap<String, String>,
    #[serde(
        rename = "TestingEnvironmentVariables",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub testing_environment_variables: BTreeMap<String, String>,
    #[serde(rename = "CommandLineArguments", default, skip_serializing_if = "Vec::is_empty")]
    pub command_line_arguments: Vec<String>,
    #[serde(rename = "OnlyTestIdentifiers", default, skip_serializing_if = "Vec::is_empty")]
    pub only_test_identifiers: Vec<String>,
    #[serde(rename = "SkipTestIdentifiers", default, skip_serializing_if = "Vec::is_empty")]
    pub skip_test_identifiers: Vec<String>,
    #[serde(rename = "IsUITestBundle", default)]
    pub is_ui_test_bundle: bool,
    #[serde(rename = "UITargetAppPath", default, skip_serializing_if = "Option::is_none")]
    pub ui_target_app_path: Option<String>,
    /// Keys this crate does not interpret, kept so rewrites are lossless.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A parsed manifest file.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRunManifest {
    path: PathBuf,
    metadata: Option<Value>,
    targets: BTreeMap<String, TestTargetConfig>,
}

impl TestRunManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .with_context(|| "Failed to resolve the working directory".to_string())?
                .join(path)
        };
        let path = path.as_path();

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read test run {}", path.display()))?;

        let root: Value = serde_json::from_str(&content)
            .map_err(|e| StorageError::descriptor(path, format!("malformed test run manifest: {}", e)))?;
        let object = match root {
            Value::Object(object) => object,
            _ => return Err(StorageError::descriptor(path, "test run manifest is not an object")),
        };

        let mut metadata = None;
        let mut targets = BTreeMap::new();
        for (key, value) in object {
            if key == METADATA_KEY {
                metadata = Some(value);
                continue;
            }
            let config: TestTargetConfig = serde_json::from_value(value).map_err(|e| {
                StorageError::descriptor(path, format!("invalid test target '{}': {}", key, e))
            })?;
            targets.insert(key, config);
        }

        Ok(TestRunManifest {
            path: path.to_path_buf(),
            metadata,
            targets,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory `__TESTROOT__` expands to.
    pub fn test_root(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Test targets ordered by name.
    pub fn targets(&self) -> &BTreeMap<String, TestTargetConfig> {
        &self.targets
    }

    pub fn targets_mut(&mut self) -> &mut BTreeMap<String, TestTargetConfig> {
        &mut self.targets
    }

    pub fn test_host_path(&self, target: &TestTargetConfig) -> Option<PathBuf> {
        target.test_host_path.as_deref().map(|raw| self.expand(raw, None))
    }

    pub fn test_bundle_path(&self, target: &TestTargetConfig) -> Option<PathBuf> {
        let host = self.test_host_path(target);
        target
            .test_bundle_path
            .as_deref()
            .map(|raw| self.expand(raw, host.as_deref()))
    }

    pub fn ui_target_app_path(&self, target: &TestTargetConfig) -> Option<PathBuf> {
        target.ui_target_app_path.as_deref().map(|raw| self.expand(raw, None))
    }

    fn expand(&self, raw: &str, test_host: Option<&Path>) -> PathBuf {
        let root = self.test_root().to_string_lossy();
        let mut expanded = raw.replace(TEST_ROOT_TOKEN, &root);
        if let Some(host) = test_host {
            expanded = expanded.replace(TEST_HOST_TOKEN, &host.to_string_lossy());
        }
        PathBuf::from(expanded)
    }

    /// True if `path` lies inside the manifest's directory.
    pub fn is_colocated(&self, path: &Path) -> bool {
        path.starts_with(self.test_root())
            && !path.components().any(|c| matches!(c, Component::ParentDir))
    }

    /// Rewrite `path` relative to `__TESTROOT__` when it is co-located.
    pub fn relative_to_root(&self, path: &Path) -> Option<String> {
        if !self.is_colocated(path) {
            return None;
        }
        let relative = path.strip_prefix(self.test_root()).ok()?;
        Some(format!("{}/{}", TEST_ROOT_TOKEN, relative.to_string_lossy()))
    }

    /// Make every co-located path of every target `__TESTROOT__`-relative, so
    /// the manifest stays valid once its directory is moved.
    pub fn relativize_paths(&mut self) {
        let rewritten: Vec<(String, TestTargetConfig)> = self
            .targets
            .iter()
            .map(|(name, target)| {
                let mut target = target.clone();
                if let Some(rel) = self.test_host_path(&target).and_then(|p| self.relative_to_root(&p)) {
                    target.test_host_path = Some(rel);
                }
                if let Some(rel) = self.test_bundle_path(&target).and_then(|p| self.relative_to_root(&p)) {
                    target.test_bundle_path = Some(rel);
                }
                if let Some(rel) = self.ui_target_app_path(&target).and_then(|p| self.relative_to_root(&p)) {
                    target.ui_target_app_path = Some(rel);
                }
                (name.clone(), target)
            })
            .collect();
        self.targets = rewritten.into_iter().collect();
    }

    /// Serialize the manifest to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut object = Map::new();
        if let Some(metadata) = &self.metadata {
            object.insert(METADATA_KEY.to_string(), metadata.clone());
        }
        for (name, target) in &self.targets {
            object.insert(name.clone(), serde_json::to_value(target)?);
        }

        let content = serde_json::to_string_pretty(&Value::Object(object))?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
    }
}
