//! Test bundle storage
//!
//! Persists loose `.xctest` bundles and `.xctestrun` manifests and keeps an
//! index of every installed test, keyed by test bundle identifier.
//!
//! Layout:
//! - loose bundle: `<root>/<bundle id>/<Name>.xctest`
//! - manifest: `<root>/<first target's bundle id>/` holding a copy of the
//!   manifest's directory, with every `TestBundlePath` rewritten relative to
//!   `__TESTROOT__`. Bundles resolved from storage are copied in under
//!   `InstalledTestBundles/<bundle id>/`.
//!
//! When a directory holds both a manifest and a loose bundle, the manifest wins.
//! A save replaces only the identifiers it stores: a test run that loses some
//! of its targets keeps the rest, under its new first target's identifier.

use super::bundle::BundleStorage;
use super::fs_ops::{self, Staging};
use super::{Storage, StorageBase};
use crate::archive::{self, ExtractedArchive};
use crate::bundle::BundleDescriptor;
use crate::errors::{IoResultExt, Result, StorageError};
use crate::xctest::manifest::TEST_ROOT_TOKEN;
use crate::xctest::{
    TestBundleDescriptor, TestDescriptor, TestRunDescriptor, TestRunManifest,
    TEST_BUNDLE_EXTENSION, TEST_RUN_EXTENSION,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

const INSTALLED_DIR: &str = "InstalledTestBundles";

#[derive(Debug, Clone)]
struct IndexEntry {
    /// Top-level storage directory the descriptor was read from.
    entry: PathBuf,
    descriptor: TestDescriptor,
}

#[derive(Debug)]
enum BundleSource {
    Colocated,
    Installed,
}

#[derive(Debug)]
struct ResolvedTarget {
    target_name: String,
    bundle: BundleDescriptor,
    source: BundleSource,
}

/// Surviving targets of a test run, restaged for their new entry.
#[derive(Debug)]
struct Remainder {
    staging: Staging,
    destination: PathBuf,
}

/// Existing entries affected by a save.
#[derive(Debug, Default)]
struct Displacement {
    superseded: Vec<PathBuf>,
    remainders: Vec<Remainder>,
}

impl Displacement {
    fn placements(&self) -> impl Iterator<Item = (&Path, &Path)> + '_ {
        self.remainders
            .iter()
            .map(|remainder| (remainder.staging.path(), remainder.destination.as_path()))
    }
}

#[derive(Debug)]
pub struct TestBundleStorage {
    bundles: BundleStorage,
    index: RwLock<BTreeMap<String, IndexEntry>>,
}

impl TestBundleStorage {
    /// Wrap `bundles` and index whatever it already holds.
    pub fn new(bundles: BundleStorage) -> Result<Self> {
        let storage = TestBundleStorage {
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

    /// Store the test bundle or test run found at the top level of `directory`.
    ///
    /// This is the path taken for uploads that were unpacked from an archive.
    pub fn save_bundle_or_test_run_from_base_directory(&self, directory: &Path) -> Result<String> {
        self.base().serialized(|| {
            let manifests: Vec<PathBuf> = fs_ops::entries_with_extension(directory, TEST_RUN_EXTENSION)?
                .into_iter()
                .filter(|path| path.is_file())
                .collect();
            let bundles: Vec<PathBuf> = fs_ops::entries_with_extension(directory, TEST_BUNDLE_EXTENSION)?
                .into_iter()
                .filter(|path| path.is_dir())
                .collect();

            match (manifests.as_slice(), bundles.as_slice()) {
                ([manifest], loose) => {
                    if !loose.is_empty() {
                        tracing::warn!(
                            directory = %directory.display(),
                            manifest = %manifest.display(),
                            "directory holds both a test run and a test bundle, using the test run"
                        );
                    }
                    self.save_test_run_locked(manifest)
                }
                ([], [bundle]) => self.save_test_bundle_locked(bundle),
                ([], []) => Err(StorageError::Unresolvable(format!(
                    "Neither a .xctest bundle or .xctestrun file provided in {}",
                    directory.display()
                ))),
                ([], loose) => Err(StorageError::Unresolvable(format!(
                    "{} .xctest bundles in {}, expected 1",
                    loose.len(),
                    directory.display()
                ))),
                (several, _) => Err(StorageError::Unresolvable(format!(
                    "{} .xctestrun files in {}, expected 1",
                    several.len(),
                    directory.display()
                ))),
            }
        })
    }

    /// Store the test bundle or test run at `path`.
    pub fn save_bundle_or_test_run(&self, path: &Path) -> Result<String> {
        self.base().serialized(|| {
            let metadata =
                fs::metadata(path).with_context(|| format!("Failed to read {}", path.display()))?;

            match path.extension().and_then(|ext| ext.to_str()) {
                Some(TEST_RUN_EXTENSION) if metadata.is_file() => self.save_test_run_locked(path),
                Some(TEST_BUNDLE_EXTENSION) if metadata.is_dir() => self.save_test_bundle_locked(path),
                _ => Err(StorageError::Unresolvable(format!(
                    "{} is not a .xctest bundle or .xctestrun file",
                    path.display()
                ))),
            }
        })
    }

    /// Unpack a `.tar.gz` upload and store the test bundle or test run inside.
    pub fn save_bundle_or_test_run_from_archive(&self, archive: &Path) -> Result<String> {
        let extracted = ExtractedArchive::extract(archive)?;
        self.save_bundle_or_test_run_from_base_directory(extracted.path())
    }

    /// Every installed test, sorted by bundle identifier.
    ///
    /// The index is rebuilt from disk first; any entry that cannot be read
    /// fails the whole listing.
    pub fn list_test_descriptors(&self) -> Result<Vec<TestDescriptor>> {
        self.base().serialized(|| {
            self.rebuild_index_locked()?;
            Ok(self
                .read_index()
                .values()
                .map(|entry| entry.descriptor.clone())
                .collect())
        })
    }

    pub fn test_descriptor_with_id(&self, bundle_id: &str) -> Result<TestDescriptor> {
        self.base().serialized(|| {
            self.read_index()
                .get(bundle_id)
                .map(|entry| entry.descriptor.clone())
                .ok_or_else(|| {
                    StorageError::NotFound(format!("No installed test with bundle id {}", bundle_id))
                })
        })
    }

    /// Remove every installed test.
    pub fn clean(&self) -> Result<()> {
        self.base().serialized(|| {
            self.base().clean_locked()?;
            self.rebuild_index_locked()
        })
    }

    fn save_test_bundle_locked(&self, path: &Path) -> Result<String> {
        let bundle = self.bundles.parser().parse(path)?;
        let ids = BTreeSet::from([bundle.identifier.as_str()]);
        let staged = self.bundles.stage_bundle_locked(&bundle)?;
        let displaced = self.displace_locked(&ids, &staged.entry)?;

        let mut placements = vec![(staged.staging.path(), staged.entry.as_path())];
        placements.extend(displaced.placements());
        fs_ops::commit_all(self.base().root(), &placements, &displaced.superseded)?;
        tracing::info!(bundle_id = %bundle.identifier, "persisted bundle");

        self.rebuild_index_locked()?;
        Ok(bundle.identifier)
    }

    fn save_test_run_locked(&self, manifest_path: &Path) -> Result<String> {
        let mut manifest = TestRunManifest::load(manifest_path)?;
        let root = self.base().root();

        if root.starts_with(manifest.test_root()) {
            return Err(StorageError::Unresolvable(format!(
                "{} contains the storage directory",
                manifest.test_root().display()
            )));
        }

        let resolved = self.resolve_targets_locked(&manifest)?;
        for target in &resolved {
            self.bundles.check_architecture(&target.bundle)?;
        }

        let primary = resolved[0].bundle.identifier.clone();
        let destination = self.bundles.entry_path(&primary);
        let ids: BTreeSet<&str> = resolved.iter().map(|t| t.bundle.identifier.as_str()).collect();
        tracing::info!(
            manifest = %manifest_path.display(),
            bundle_ids = ?ids,
            destination = %destination.display(),
            "persisting test run"
        );

        let staging = Staging::new(root)?;
        fs_ops::copy_tree(manifest.test_root(), staging.path())?;
        for sibling in fs_ops::entries_with_extension(staging.path(), TEST_RUN_EXTENSION)? {
            if sibling.is_file() {
                fs_ops::remove_path(&sibling)?;
            }
        }

        for target in resolved.iter().filter(|t| matches!(t.source, BundleSource::Installed)) {
            let file_name = target
                .bundle
                .file_name()
                .ok_or_else(|| StorageError::descriptor(&target.bundle.path, "bundle path has no file name"))?
                .to_string_lossy()
                .to_string();
            let copied = staging
                .path()
                .join(INSTALLED_DIR)
                .join(&target.bundle.identifier)
                .join(&file_name);
            if let Some(parent) = copied.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs_ops::copy_tree(&target.bundle.path, &copied)?;

            if let Some(config) = manifest.targets_mut().get_mut(&target.target_name) {
                config.test_bundle_path = Some(format!(
                    "{}/{}/{}/{}",
                    TEST_ROOT_TOKEN, INSTALLED_DIR, target.bundle.identifier, file_name
                ));
            }
        }

        manifest.relativize_paths();
        let manifest_name = manifest_path
            .file_name()
            .ok_or_else(|| StorageError::descriptor(manifest_path, "manifest path has no file name"))?;
        manifest.write(&staging.path().join(manifest_name))?;
        self.describe_entry(staging.path())?;

        let displaced = self.displace_locked(&ids, &destination)?;
        let mut placements = vec![(staging.path(), destination.as_path())];
        placements.extend(displaced.placements());
        fs_ops::commit_all(root, &placements, &displaced.superseded)?;
        tracing::info!(bundle_id = %primary, "persisted test run");

        self.rebuild_index_locked()?;
        Ok(primary)
    }

    /// Resolve every target's test bundle, alongside the manifest first and
    /// among installed tests second. Any unresolved target fails the save.
    fn resolve_targets_locked(&self, manifest: &TestRunManifest) -> Result<Vec<ResolvedTarget>> {
        if manifest.targets().is_empty() {
            return Err(StorageError::Unresolvable(format!(
                "{} declares no test targets",
                manifest.path().display()
            )));
        }

        let index = self.read_index();
        let mut seen = BTreeSet::new();
        let mut resolved = Vec::new();

        for (name, target) in manifest.targets() {
            let colocated = manifest
                .test_bundle_path(target)
                .filter(|path| manifest.is_colocated(path) && path.is_dir());

            let next = match colocated {
                Some(path) => {
                    let bundle = self.bundles.parser().parse(&path)?;
                    if let Some(expected) = &target.test_bundle_identifier {
                        if expected != &bundle.identifier {
                            return Err(StorageError::Unresolvable(format!(
                                "test target '{}' expects bundle '{}' but {} is '{}'",
                                name,
                                expected,
                                path.display(),
                                bundle.identifier
                            )));
                        }
                    }
                    ResolvedTarget {
                        target_name: name.clone(),
                        bundle,
                        source: BundleSource::Colocated,
                    }
                }
                None => {
                    let installed = target
                        .test_bundle_identifier
                        .as_deref()
                        .and_then(|id| index.get(id))
                        .ok_or_else(|| {
                            StorageError::Unresolvable(format!(
                                "test target '{}' in {} references a bundle ({}) that is neither alongside the manifest nor installed",
                                name,
                                manifest.path().display(),
                                target
                                    .test_bundle_identifier
                                    .as_deref()
                                    .or(target.test_bundle_path.as_deref())
                                    .unwrap_or("unspecified")
                            ))
                        })?;
                    ResolvedTarget {
                        target_name: name.clone(),
                        bundle: installed.descriptor.test_bundle().clone(),
                        source: BundleSource::Installed,
                    }
                }
            };

            if !seen.insert(next.bundle.identifier.clone()) {
                return Err(StorageError::Unresolvable(format!(
                    "bundle '{}' is referenced by more than one test target",
                    next.bundle.identifier
                )));
            }
            resolved.push(next);
        }

        Ok(resolved)
    }

    /// Work out what happens to existing entries once `ids` are stored at
    /// `destination`.
    ///
    /// An entry left with no installed test is superseded. A test run that
    /// still owns other targets is restaged without the shadowed ones and
    /// moves under its new first target's identifier.
    fn displace_locked(&self, ids: &BTreeSet<&str>, destination: &Path) -> Result<Displacement> {
        let index = self.read_index();
        let mut affected: BTreeSet<PathBuf> = ids
            .iter()
            .filter_map(|id| index.get(*id))
            .map(|indexed| indexed.entry.clone())
            .collect();
        if fs::symlink_metadata(destination).is_ok() {
            affected.insert(destination.to_path_buf());
        }

        let mut displacement = Displacement::default();
        for entry in &affected {
            let kept: BTreeSet<&str> = index
                .iter()
                .filter(|(id, indexed)| &indexed.entry == entry && !ids.contains(id.as_str()))
                .filter_map(|(_, indexed)| match &indexed.descriptor {
                    TestDescriptor::TestRun(run) => Some(run.target_name.as_str()),
                    TestDescriptor::Bundle(_) => None,
                })
                .collect();
            let manifest_path = index.values().find_map(|indexed| match &indexed.descriptor {
                TestDescriptor::TestRun(run) if &indexed.entry == entry => Some(run.manifest_path.clone()),
                _ => None,
            });

            displacement.superseded.push(entry.clone());
            let manifest_path = match manifest_path {
                Some(path) if !kept.is_empty() => path,
                _ => continue,
            };

            let remainder = self.stage_remainder_locked(entry, &manifest_path, &kept, ids)?;
            if remainder.destination != *entry
                && !affected.contains(&remainder.destination)
                && fs::symlink_metadata(&remainder.destination).is_ok()
            {
                return Err(StorageError::Unresolvable(format!(
                    "cannot move the remaining targets of {} to {}, it is already taken",
                    entry.display(),
                    remainder.destination.display()
                )));
            }
            tracing::info!(
                entry = %entry.display(),
                destination = %remainder.destination.display(),
                targets = ?kept,
                "keeping remaining test run targets"
            );
            displacement.remainders.push(remainder);
        }

        Ok(displacement)
    }

    /// Copy the test run at `entry` into staging keeping only `kept` targets.
    fn stage_remainder_locked(
        &self,
        entry: &Path,
        manifest_path: &Path,
        kept: &BTreeSet<&str>,
        shadowed: &BTreeSet<&str>,
    ) -> Result<Remainder> {
        let manifest_name = manifest_path
            .file_name()
            .ok_or_else(|| StorageError::descriptor(manifest_path, "manifest path has no file name"))?;

        let staging = Staging::new(self.base().root())?;
        fs_ops::copy_tree(entry, staging.path())?;

        let staged_manifest = staging.path().join(manifest_name);
        let mut manifest = TestRunManifest::load(&staged_manifest)?;
        manifest.targets_mut().retain(|name, _| kept.contains(name.as_str()));
        manifest.write(&staged_manifest)?;
        for id in shadowed {
            fs_ops::remove_path(&staging.path().join(INSTALLED_DIR).join(id))?;
        }

        let descriptors = self.describe_entry(staging.path())?;
        let first = descriptors.first().ok_or_else(|| {
            StorageError::Unresolvable(format!("{} has no remaining test targets", entry.display()))
        })?;
        let destination = self.bundles.entry_path(first.bundle_id());

        Ok(Remainder { staging, destination })
    }

    fn rebuild_index_locked(&self) -> Result<()> {
        let mut index = BTreeMap::new();

        for entry in fs_ops::list_entries(self.base().root())? {
            if !entry.is_dir() {
                tracing::warn!(path = %entry.display(), "ignoring stray file in test storage");
                continue;
            }

            for descriptor in self.describe_entry(&entry)? {
                let id = descriptor.bundle_id().to_string();
                let owns_name = entry.file_name().map(|n| n == id.as_str()).unwrap_or(false);
                if index.contains_key(&id) && !owns_name {
                    tracing::warn!(bundle_id = %id, entry = %entry.display(), "duplicate installed test ignored");
                    continue;
                }
                index.insert(
                    id,
                    IndexEntry {
                        entry: entry.clone(),
                        descriptor,
                    },
                );
            }
        }

        tracing::debug!(count = index.len(), "rebuilt test index");
        *self.index.write().unwrap_or_else(PoisonError::into_inner) = index;
        Ok(())
    }

    fn describe_entry(&self, entry: &Path) -> Result<Vec<TestDescriptor>> {
        let manifests: Vec<PathBuf> = fs_ops::entries_with_extension(entry, TEST_RUN_EXTENSION)?
            .into_iter()
            .filter(|path| path.is_file())
            .collect();

        match manifests.as_slice() {
            [manifest] => self.describe_test_run(manifest),
            [] => {
                let bundle_path = archive::find_single_with_extension(entry, TEST_BUNDLE_EXTENSION)?;
                let bundle = self.bundles.parser().parse(&bundle_path)?;
                Ok(vec![TestDescriptor::Bundle(TestBundleDescriptor { bundle })])
            }
            several => Err(StorageError::Unresolvable(format!(
                "{} .xctestrun files in {}",
                several.len(),
                entry.display()
            ))),
        }
    }

    fn describe_test_run(&self, manifest_path: &Path) -> Result<Vec<TestDescriptor>> {
        let manifest = TestRunManifest::load(manifest_path)?;

        manifest
            .targets()
            .iter()
            .map(|(name, target)| {
                let bundle_path = manifest.test_bundle_path(target).ok_or_else(|| {
                    StorageError::Unresolvable(format!(
                        "test target '{}' in {} has no TestBundlePath",
                        name,
                        manifest_path.display()
                    ))
                })?;
                let test_bundle = self.bundles.parser().parse(&bundle_path)?;

                Ok(TestDescriptor::TestRun(TestRunDescriptor {
                    manifest_path: manifest_path.to_path_buf(),
                    target_name: name.clone(),
                    test_bundle,
                    test_host_path: manifest.test_host_path(target),
                    ui_target_app_path: manifest.ui_target_app_path(target),
                    environment: target.environment_variables.clone(),
                    testing_environment: target.testing_environment_variables.clone(),
                    arguments: target.command_line_arguments.clone(),
                    tests_to_run: target.only_test_identifiers.clone(),
                    tests_to_skip: target.skip_test_identifiers.clone(),
                    is_ui_test: target.is_ui_test_bundle,
                }))
            })
            .collect()
    }

    fn read_index(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, IndexEntry>> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for TestBundleStorage {
    fn base(&self) -> &StorageBase {
        self.bundles.base()
    }
}
