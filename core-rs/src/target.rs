//! Automation target seam
//!
//! The device or simulator abstraction lives outside this crate. Storage only
//! needs a stable identifier (used as a directory name) and the target's
//! architecture, both answered synchronously.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Set of instruction-set architecture names.
pub type ArchitectureSet = BTreeSet<String>;

/// A device or simulator that artifacts are staged against.
pub trait Target: Send + Sync + fmt::Debug {
    /// Stable identifier, usable as a directory name.
    fn unique_identifier(&self) -> &str;

    /// Architecture of the target, e.g. `arm64` or `x86_64`.
    fn architecture(&self) -> &str;

    /// Human-readable name, for logs.
    fn name(&self) -> &str {
        self.unique_identifier()
    }
}

/// Plain description of a target, as found in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub udid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub architecture: String,
}

impl TargetInfo {
    pub fn new(udid: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            udid: udid.into(),
            name: None,
            architecture: architecture.into(),
        }
    }
}

impl Target for TargetInfo {
    fn unique_identifier(&self) -> &str {
        &self.udid
    }

    fn architecture(&self) -> &str {
        &self.architecture
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.udid)
    }
}

/// Bundle architectures a target of `architecture` can execute.
///
/// `arm64e` hardware runs plain `arm64` binaries; every other architecture
/// only runs itself.
pub fn compatible_architectures(architecture: &str) -> ArchitectureSet {
    let mut set = ArchitectureSet::new();
    set.insert(architecture.to_string());
    if architecture == "arm64e" {
        set.insert("arm64".to_string());
    }
    set
}
