//! Bundle storage with architecture gating
//!
//! Layout: `<root>/<bundle identifier>/<original bundle name>`.

use super::fs_ops::{self, Staging};
use super::{Storage, StorageBase};
use crate::bundle::{BundleDescriptor, BundleParser};
use crate::errors::{Result, StorageError};
use crate::target::compatible_architectures;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug)]
pub struct BundleStorage {
    base: StorageBase,
    parser: Arc<dyn BundleParser>,
}

/// A validated bundle copy waiting in staging.
#[derive(Debug)]
pub(crate) struct StagedBundle {
    pub(crate) staging: Staging,
    /// Entry directory the staging directory replaces.
    pub(crate) entry: PathBuf,
    /// Path of the bundle once committed.
    pub(crate) destination: PathBuf,
}

impl BundleStorage {
    pub fn new(base: StorageBase, parser: Arc<dyn BundleParser>) -> Self {
        BundleStorage { base, parser }
    }

    pub fn parser(&self) -> &dyn BundleParser {
        self.parser.as_ref()
    }

    /// Succeeds iff the target can execute one of the bundle's architectures.
    pub fn check_architecture(&self, bundle: &BundleDescriptor) -> Result<()> {
        let target = compatible_architectures(self.base.target().architecture());
        if bundle.architectures.iter().any(|arch| target.contains(arch)) {
            return Ok(());
        }

        Err(StorageError::ArchitectureMismatch {
            target,
            supported: bundle.architectures.clone(),
        })
    }

    /// Persist the bundle under its identifier, replacing any earlier copy.
    ///
    /// Returns the path of the persisted bundle.
    pub fn save_bundle(&self, bundle: &BundleDescriptor) -> Result<PathBuf> {
        self.base.serialized(|| self.persist_bundle_locked(bundle))
    }

    /// Directory owning everything persisted under `identifier`.
    pub fn entry_path(&self, identifier: &str) -> PathBuf {
        self.base.root().join(identifier)
    }

    pub(crate) fn persist_bundle_locked(&self, bundle: &BundleDescriptor) -> Result<PathBuf> {
        let staged = self.stage_bundle_locked(bundle)?;
        fs_ops::commit(self.base.root(), staged.staging.path(), &staged.entry, &[])?;

        tracing::info!(bundle_id = %bundle.identifier, "persisted bundle");
        Ok(staged.destination)
    }

    /// Copy `bundle` into a fresh staging directory and re-parse the copy.
    ///
    /// Nothing in the storage root changes until the caller commits.
    pub(crate) fn stage_bundle_locked(&self, bundle: &BundleDescriptor) -> Result<StagedBundle> {
        self.check_architecture(bundle)?;

        let file_name = bundle
            .file_name()
            .ok_or_else(|| StorageError::descriptor(&bundle.path, "bundle path has no file name"))?;
        let entry = self.entry_path(&bundle.identifier);
        let destination = entry.join(file_name);
        tracing::info!(
            bundle_id = %bundle.identifier,
            destination = %destination.display(),
            "persisting bundle"
        );

        let staging = Staging::new(self.base.root())?;
        let staged = staging.path().join(file_name);
        fs_ops::copy_tree(&bundle.path, &staged)?;

        let copied = self.parser.parse(&staged)?;
        if copied.identifier != bundle.identifier {
            return Err(StorageError::descriptor(
                &bundle.path,
                format!(
                    "copied bundle declares '{}', expected '{}'",
                    copied.identifier, bundle.identifier
                ),
            ));
        }

        Ok(StagedBundle {
            staging,
            entry,
            destination,
        })
    }

    /// Every persisted bundle, re-parsed from disk, keyed by identifier.
    pub fn persisted_bundles(&self) -> Result<BTreeMap<String, BundleDescriptor>> {
        self.base.serialized(|| self.scan_locked())
    }

    pub(crate) fn scan_locked(&self) -> Result<BTreeMap<String, BundleDescriptor>> {
        let mut bundles = BTreeMap::new();

        for entry in fs_ops::list_entries(self.base.root())? {
            if !entry.is_dir() {
                tracing::warn!(path = %entry.display(), "ignoring stray file in bundle storage");
                continue;
            }

            let descriptor = self.parser.parse(&single_bundle_in(&entry)?)?;
            insert_scanned(&mut bundles, &entry, descriptor);
        }

        tracing::debug!(count = bundles.len(), "scanned bundle storage");
        Ok(bundles)
    }

    pub fn clean(&self) -> Result<()> {
        self.base.clean()
    }
}

impl Storage for BundleStorage {
    fn base(&self) -> &StorageBase {
        &self.base
    }
}

/// The one bundle directory a persisted entry holds.
fn single_bundle_in(entry: &Path) -> Result<PathBuf> {
    let mut bundles: Vec<PathBuf> = fs_ops::list_entries(entry)?
        .into_iter()
        .filter(|path| path.is_dir())
        .collect();

    match bundles.len() {
        1 => Ok(bundles.remove(0)),
        n => Err(StorageError::Unresolvable(format!(
            "persisted entry {} holds {} bundles, expected 1",
            entry.display(),
            n
        ))),
    }
}

/// Index `descriptor`, preferring the entry whose directory is named after
/// the identifier if two entries claim the same one.
fn insert_scanned(
    bundles: &mut BTreeMap<String, BundleDescriptor>,
    entry: &Path,
    descriptor: BundleDescriptor,
) {
    let owns_name = entry.file_name().map(|n| n == descriptor.identifier.as_str()).unwrap_or(false);
    if bundles.contains_key(&descriptor.identifier) && !owns_name {
        tracing::warn!(
            bundle_id = %descriptor.identifier,
            entry = %entry.display(),
            "duplicate persisted bundle ignored"
        );
        return;
    }
    bundles.insert(descriptor.identifier.clone(), descriptor);
}
