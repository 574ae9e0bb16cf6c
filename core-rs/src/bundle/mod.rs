//! Bundle descriptors and the parser seam
//!
//! A bundle is a directory artifact (`.app`, `.xctest`, `.framework`,
//! `.dSYM`) carrying an identifier, a version and the architectures its
//! binaries were built for.

pub mod parser;

pub use parser::{BundleParser, InfoManifestParser, INFO_MANIFEST_NAME};

use crate::target::ArchitectureSet;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Metadata of an on-disk bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDescriptor {
    /// Canonical identifier (e.g. `com.example.app`), the storage key.
    pub identifier: String,
    pub name: String,
    pub version: String,
    /// Root directory of the bundle.
    pub path: PathBuf,
    pub architectures: ArchitectureSet,
}

impl BundleDescriptor {
    /// Last path component of the bundle, e.g. `Example.app`.
    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}
