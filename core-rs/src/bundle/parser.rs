//! Bundle descriptor parsing
//!
//! The default parser reads a JSON info manifest from the bundle root
//! (`Info.json`) or, for macOS-style and dSYM bundles, from
//! `Contents/Info.json`:
//!
//! ```json
//! {
//!   "CFBundleIdentifier": "com.example.app",
//!   "CFBundleName": "Example",
//!   "CFBundleShortVersionString": "1.0",
//!   "SupportedArchitectures": ["arm64"]
//! }
//! ```

use super::BundleDescriptor;
use crate::errors::{IoResultExt, Result, StorageError};
use crate::paths::is_safe_component;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// File name of the info manifest inside a bundle.
pub const INFO_MANIFEST_NAME: &str = "Info.json";

/// Extracts a [`BundleDescriptor`] from a bundle's root path.
pub trait BundleParser: Send + Sync + fmt::Debug {
    fn parse(&self, path: &Path) -> Result<BundleDescriptor>;
}

#[derive(Debug, Deserialize)]
struct InfoManifest {
    #[serde(rename = "CFBundleIdentifier")]
    identifier: Option<String>,
    #[serde(rename = "CFBundleName")]
    name: Option<String>,
    #[serde(rename = "CFBundleShortVersionString")]
    short_version: Option<String>,
    #[serde(rename = "CFBundleVersion")]
    version: Option<String>,
    #[serde(rename = "SupportedArchitectures", default)]
    architectures: Vec<String>,
}

/// Parser for bundles carrying an `Info.json` manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct InfoManifestParser;

impl InfoManifestParser {
    fn locate_manifest(path: &Path) -> Option<PathBuf> {
        [
            path.join(INFO_MANIFEST_NAME),
            path.join("Contents").join(INFO_MANIFEST_NAME),
        ]
        .into_iter()
        .find(|candidate| candidate.is_file())
    }
}

impl BundleParser for InfoManifestParser {
    fn parse(&self, path: &Path) -> Result<BundleDescriptor> {
        if !path.is_dir() {
            return Err(StorageError::descriptor(path, "not a bundle directory"));
        }

        let manifest_path = Self::locate_manifest(path)
            .ok_or_else(|| StorageError::descriptor(path, "no Info.json manifest"))?;

        let content = fs::read_to_string(&manifest_path)
            .with_context(|| format!("Failed to read {}", manifest_path.display()))?;

        let manifest: InfoManifest = serde_json::from_str(&content)
            .map_err(|e| StorageError::descriptor(path, format!("malformed Info.json: {}", e)))?;

        let identifier = manifest
            .identifier
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StorageError::descriptor(path, "missing CFBundleIdentifier"))?;

        if !is_safe_component(&identifier) {
            return Err(StorageError::descriptor(
                path,
                format!("bundle identifier '{}' is not usable as a directory name", identifier),
            ));
        }

        let version = manifest
            .short_version
            .or(manifest.version)
            .ok_or_else(|| StorageError::descriptor(path, "missing bundle version"))?;

        if manifest.architectures.is_empty() {
            return Err(StorageError::descriptor(path, "no supported architectures declared"));
        }

        let name = manifest.name.unwrap_or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().to_string())
                .unwrap_or_else(|| identifier.clone())
        });

        Ok(BundleDescriptor {
            identifier,
            name,
            version,
            path: path.to_path_buf(),
            architectures: manifest.architectures.into_iter().collect(),
        })
    }
}
