//! Storage manager
//!
//! Owns one storage per artifact kind for a single target, all below
//! `<config root>/<target udid>/`:
//!
//! ```text
//! <udid>/
//! ├── xctest/        TestBundleStorage
//! ├── application/   ApplicationBundleStorage
//! ├── dylib/         FileStorage
//! ├── dsym/          BundleStorage
//! └── framework/     BundleStorage
//! ```

use super::application::ApplicationBundleStorage;
use super::bundle::BundleStorage;
use super::file::FileStorage;
use super::xctest::TestBundleStorage;
use super::{Storage, StorageBase};
use crate::bundle::{BundleParser, InfoManifestParser};
use crate::config::StorageConfig;
use crate::errors::{Result, StorageError};
use crate::paths::is_safe_component;
use crate::target::Target;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Span;

pub const XCTEST_DIR: &str = "xctest";
pub const APPLICATION_DIR: &str = "application";
pub const DYLIB_DIR: &str = "dylib";
pub const DSYM_DIR: &str = "dsym";
pub const FRAMEWORK_DIR: &str = "framework";

pub const XCTEST_ROOT_TOKEN: &str = "IDB_XCTEST_ROOT";
pub const APPLICATION_ROOT_TOKEN: &str = "IDB_APPLICATION_ROOT";
pub const DYLIB_ROOT_TOKEN: &str = "IDB_DYLIB_ROOT";
pub const DSYM_ROOT_TOKEN: &str = "IDB_DSYM_ROOT";
pub const FRAMEWORK_ROOT_TOKEN: &str = "IDB_FRAMEWORK_ROOT";

/// `$` followed by the longest run of upper-case letters, digits and underscores.
pub const PLACEHOLDER_PATTERN: &str = r"\$([A-Z0-9_]+)";

#[derive(Debug)]
pub struct StorageManager {
    base_path: PathBuf,
    span: Span,
    placeholder: Regex,
    xctest: TestBundleStorage,
    application: ApplicationBundleStorage,
    dylib: FileStorage,
    dsym: BundleStorage,
    framework: BundleStorage,
}

impl StorageManager {
    /// Build the storages for `target` below `config.root`.
    pub fn manager_for_target(target: Arc<dyn Target>, config: &StorageConfig) -> Result<Self> {
        Self::manager_for_target_with_parser(target, config, Arc::new(InfoManifestParser))
    }

    pub fn manager_for_target_with_parser(
        target: Arc<dyn Target>,
        config: &StorageConfig,
        parser: Arc<dyn BundleParser>,
    ) -> Result<Self> {
        let udid = target.unique_identifier().to_string();
        if !is_safe_component(&udid) {
            return Err(StorageError::initialization(
                "target",
                StorageError::Config(format!("target identifier '{}' is not usable as a directory name", udid)),
            ));
        }

        let placeholder = Regex::new(PLACEHOLDER_PATTERN)
            .map_err(|e| StorageError::Config(format!("Regex error: {}", e)))?;
        let base_path = config.root.join(&udid);
        let span = tracing::info_span!("idb_storage", target = %udid);
        let make_base = |kind: &str| {
            StorageBase::new(
                Arc::clone(&target),
                base_path.join(kind),
                tracing::info_span!(parent: &span, "storage", kind = kind),
            )
            .map_err(|e| StorageError::initialization(kind, e))
        };

        let xctest = TestBundleStorage::new(BundleStorage::new(make_base(XCTEST_DIR)?, Arc::clone(&parser)))
            .map_err(|e| StorageError::initialization(XCTEST_DIR, e))?;
        let application =
            ApplicationBundleStorage::new(BundleStorage::new(make_base(APPLICATION_DIR)?, Arc::clone(&parser)))
                .map_err(|e| StorageError::initialization(APPLICATION_DIR, e))?;
        let dylib = FileStorage::new(make_base(DYLIB_DIR)?);
        let dsym = BundleStorage::new(make_base(DSYM_DIR)?, Arc::clone(&parser));
        let framework = BundleStorage::new(make_base(FRAMEWORK_DIR)?, parser);

        span.in_scope(|| {
            tracing::info!(target_name = target.name(), base = %base_path.display(), "storage ready");
        });

        Ok(StorageManager {
            base_path,
            span,
            placeholder,
            xctest,
            application,
            dylib,
            dsym,
            framework,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn xctest(&self) -> &TestBundleStorage {
        &self.xctest
    }

    pub fn application(&self) -> &ApplicationBundleStorage {
        &self.application
    }

    pub fn dylib(&self) -> &FileStorage {
        &self.dylib
    }

    pub fn dsym(&self) -> &BundleStorage {
        &self.dsym
    }

    pub fn framework(&self) -> &BundleStorage {
        &self.framework
    }

    /// Placeholder name (without `$`) to storage root.
    pub fn replacement_mapping(&self) -> BTreeMap<&'static str, PathBuf> {
        BTreeMap::from([
            (XCTEST_ROOT_TOKEN, self.xctest.root_path().to_path_buf()),
            (APPLICATION_ROOT_TOKEN, self.application.root_path().to_path_buf()),
            (DYLIB_ROOT_TOKEN, self.dylib.root_path().to_path_buf()),
            (DSYM_ROOT_TOKEN, self.dsym.root_path().to_path_buf()),
            (FRAMEWORK_ROOT_TOKEN, self.framework.root_path().to_path_buf()),
        ])
    }

    /// Substitute storage-root placeholders inside the values of `environment`.
    ///
    /// Keys and unknown placeholders pass through unchanged.
    pub fn interpolate_environment_replacements(
        &self,
        environment: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mapping = self.replacement_mapping();
        environment
            .iter()
            .map(|(key, value)| {
                let interpolated = self.placeholder.replace_all(value, |caps: &Captures| {
                    match mapping.get(&caps[1]) {
                        Some(root) => root.to_string_lossy().to_string(),
                        None => caps[0].to_string(),
                    }
                });
                (key.clone(), interpolated.into_owned())
            })
            .collect()
    }

    /// Remove every persisted artifact of every kind.
    pub fn clean(&self) -> Result<()> {
        let _entered = self.span.enter();
        self.xctest.clean()?;
        self.application.clean()?;
        self.dylib.clean()?;
        self.dsym.clean()?;
        self.framework.clean()?;
        tracing::info!("cleaned all storage");
        Ok(())
    }
}
