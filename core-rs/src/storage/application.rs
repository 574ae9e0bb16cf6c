//! Application bundle storage
//!
//! Saving goes through the generic bundle path. The index of persisted
//! applications is derived from the directory: it is rebuilt on construction
//! and after every successful save, and both views read the same snapshot.

use super::bundle::BundleStorage;
use super::{Storage, StorageBase};
use crate::archive::{self, ExtractedArchive};
use crate::bundle::BundleDescriptor;
use crate::errors::{IoResultExt, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

pub const APPLICATION_EXTENSION: &str = "app";

/// A persisted application and when it was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedApplication {
    pub descriptor: BundleDescriptor,
    pub persisted_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ApplicationBundleStorage {
    bundles: BundleStorage,
    index: RwLock<BTreeMap<String, PersistedApplication>>,
}

impl ApplicationBundleStorage {
    pub fn new(bundles: BundleStorage) -> Result<Self> {
        let storage = ApplicationBundleStorage {
            bundles,
            index: RwLock::new(BTreeMap::new()),
        };
        storage.base().serialized(|| storage.rebuild_index_locked())?;
        Ok(storage)
    }

    pub fn bundles(&self) -> &BundleStorage {
        &self.bundles
    }

    pub fn check_architecture(&self, bundle: &BundleDescriptor) -> Result<()> {
        self.bundles.check_architecture(bundle)
    }

    /// Persist an application, then refresh the index.
    pub fn save_bundle(&self, bundle: &BundleDescriptor) -> Result<PathBuf> {
        self.base().serialized(|| {
            let path = self.bundles.persist_bundle_locked(bundle)?;
            self.rebuild_index_locked()?;
            Ok(path)
        })
    }

    /// Parse and persist the application bundle at `path`.
    pub fn save_bundle_at(&self, path: &Path) -> Result<PathBuf> {
        let bundle = self.bundles.parser().parse(path)?;
        self.save_bundle(&bundle)
    }

    /// Unpack a `.tar.gz` holding a single `.app` and persist it.
    pub fn save_bundle_from_archive(&self, archive_path: &Path) -> Result<PathBuf> {
        let extracted = ExtractedArchive::extract(archive_path)?;
        let app = archive::find_single_with_extension(extracted.path(), APPLICATION_EXTENSION)?;
        self.save_bundle_at(&app)
    }

    pub fn persisted_application_bundle_ids(&self) -> BTreeSet<String> {
        self.base().serialized(|| self.read_index().keys().cloned().collect())
    }

    pub fn persisted_applications(&self) -> BTreeMap<String, PersistedApplication> {
        self.base().serialized(|| self.read_index().clone())
    }

    /// Re-scan the storage directory.
    pub fn rebuild_index(&self) -> Result<()> {
        self.base().serialized(|| self.rebuild_index_locked())
    }

    /// Remove every persisted application.
    pub fn clean(&self) -> Result<()> {
        self.base().serialized(|| {
            self.base().clean_locked()?;
            self.rebuild_index_locked()
        })
    }

    fn rebuild_index_locked(&self) -> Result<()> {
        let mut index = BTreeMap::new();
        for (identifier, descriptor) in self.bundles.scan_locked()? {
            let persisted_at = fs::metadata(&descriptor.path)
                .and_then(|metadata| metadata.modified())
                .with_context(|| format!("Failed to read {}", descriptor.path.display()))?;
            index.insert(
                identifier,
                PersistedApplication {
                    descriptor,
                    persisted_at: DateTime::<Utc>::from(persisted_at),
                },
            );
        }

        tracing::debug!(count = index.len(), "rebuilt application index");
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
        Ok(())
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, PersistedApplication>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for ApplicationBundleStorage {
    fn base(&self) -> &StorageBase {
        self.bundles.base()
    }
}
