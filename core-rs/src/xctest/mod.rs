//! Test descriptors
//!
//! A persisted test artifact is either a loose `.xctest` bundle or one test
//! target of an `.xctestrun` manifest. Descriptors are produced by inspecting
//! persisted files and are never mutated; a new save replaces them.

pub mod manifest;

pub use manifest::{TestRunManifest, TestTargetConfig};

use crate::bundle::BundleDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const TEST_BUNDLE_EXTENSION: &str = "xctest";
pub const TEST_RUN_EXTENSION: &str = "xctestrun";

/// A standalone test bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestBundleDescriptor {
    pub bundle: BundleDescriptor,
}

/// One test target of a test-run manifest, resolved against persisted files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunDescriptor {
    pub manifest_path: PathBuf,
    pub target_name: String,
    pub test_bundle: BundleDescriptor,
    pub test_host_path: Option<PathBuf>,
    pub ui_target_app_path: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub testing_environment: BTreeMap<String, String>,
    pub arguments: Vec<String>,
    pub tests_to_run: Vec<String>,
    pub tests_to_skip: Vec<String>,
    pub is_ui_test: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestDescriptor {
    Bundle(TestBundleDescriptor),
    TestRun(TestRunDescriptor),
}

impl TestDescriptor {
    pub fn bundle_id(&self) -> &str {
        &self.test_bundle().identifier
    }

    pub fn test_bundle(&self) -> &BundleDescriptor {
        match self {
            TestDescriptor::Bundle(descriptor) => &descriptor.bundle,
            TestDescriptor::TestRun(descriptor) => &descriptor.test_bundle,
        }
    }

    /// The file that was persisted: the bundle itself or the manifest.
    pub fn path(&self) -> &Path {
        match self {
            TestDescriptor::Bundle(descriptor) => &descriptor.bundle.path,
            TestDescriptor::TestRun(descriptor) => &descriptor.manifest_path,
        }
    }

    pub fn is_test_run(&self) -> bool {
        matches!(self, TestDescriptor::TestRun(_))
    }
}
