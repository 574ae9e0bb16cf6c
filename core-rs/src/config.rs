/**
 * config.rs
 * Storage configuration (YAML format)
 *
 * Format:
 * ```yaml
 * root: /var/db/idb/storage
 * target:
 *   udid: 5A1B22CD-0000-4000-8000-000000000001
 *   name: iPhone 15
 *   architecture: arm64
 * ```
 */

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{IoResultExt, Result, StorageError};
use crate::target::TargetInfo;

pub const ROOT_ENV: &str = "IDB_STORAGE_ROOT";
pub const TARGET_UDID_ENV: &str = "IDB_TARGET_UDID";
pub const TARGET_ARCH_ENV: &str = "IDB_TARGET_ARCH";
pub const TARGET_NAME_ENV: &str = "IDB_TARGET_NAME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per target.
    pub root: PathBuf,
    /// Target to store against, when not supplied by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetInfo>,
}

impl StorageConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StorageConfig {
            root: root.into(),
            target: None,
        }
    }

    /// `$HOME/.idb/storage`
    pub fn default_root() -> Result<PathBuf> {
        let home = env::var("HOME")
            .map_err(|_| StorageError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".idb").join("storage"))
    }

    /// Configuration rooted at [`StorageConfig::default_root`].
    pub fn from_defaults() -> Result<Self> {
        Ok(StorageConfig::new(Self::default_root()?))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: StorageConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config {}", path.display()))
    }

    /// Apply `IDB_STORAGE_ROOT` and `IDB_TARGET_*` overrides from the process environment.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(root) = env::var(ROOT_ENV) {
            self.root = PathBuf::from(root);
        }

        let udid = env::var(TARGET_UDID_ENV).ok();
        let arch = env::var(TARGET_ARCH_ENV).ok();
        let name = env::var(TARGET_NAME_ENV).ok();

        if udid.is_some() || arch.is_some() || name.is_some() {
            let current = self.target.take();
            let udid = udid
                .or_else(|| current.as_ref().map(|t| t.udid.clone()))
                .ok_or_else(|| StorageError::Config(format!("{} is required", TARGET_UDID_ENV)))?;
            let architecture = arch
                .or_else(|| current.as_ref().map(|t| t.architecture.clone()))
                .ok_or_else(|| StorageError::Config(format!("{} is required", TARGET_ARCH_ENV)))?;
            let name = name.or_else(|| current.and_then(|t| t.name));

            self.target = Some(TargetInfo {
                udid,
                name,
                architecture,
            });
        }

        Ok(self)
    }
}
