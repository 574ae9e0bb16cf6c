//! Flat file storage (dylibs)

use super::fs_ops::{self, Staging};
use super::{Storage, StorageBase};
use crate::errors::{IoResultExt, Result, StorageError};
use std::fs;
use std::path::{Path, PathBuf};

/// Stores loose files by base name. No identity tracking: callers address
/// saved files by the returned path.
#[derive(Debug)]
pub struct FileStorage {
    base: StorageBase,
}

impl FileStorage {
    pub fn new(base: StorageBase) -> Self {
        FileStorage { base }
    }

    /// Copy the file at `source` into storage, keeping its base name.
    ///
    /// An existing file with the same name is replaced.
    pub fn save_file(&self, source: &Path) -> Result<PathBuf> {
        self.base.serialized(|| self.save_file_locked(source))
    }

    fn save_file_locked(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| StorageError::Unresolvable(format!("{} has no file name", source.display())))?;

        let metadata = fs::metadata(source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        if !metadata.is_file() {
            return Err(StorageError::Unresolvable(format!(
                "{} is not a regular file",
                source.display()
            )));
        }

        let destination = self.base.root().join(file_name);
        tracing::info!(source = %source.display(), destination = %destination.display(), "persisting file");

        let staging = Staging::new(self.base.root())?;
        let staged = staging.path().join(file_name);
        fs::copy(source, &staged)
            .with_context(|| format!("Failed to copy {} into storage", source.display()))?;
        fs_ops::commit(self.base.root(), &staged, &destination, &[])?;

        tracing::info!(destination = %destination.display(), "persisted file");
        Ok(destination)
    }

    /// Paths of every persisted file, sorted.
    pub fn persisted_files(&self) -> Result<Vec<PathBuf>> {
        self.base.serialized(|| {
            Ok(fs_ops::list_entries(self.base.root())?
                .into_iter()
                .filter(|path| path.is_file())
                .collect())
        })
    }

    pub fn clean(&self) -> Result<()> {
        self.base.clean()
    }
}

impl Storage for FileStorage {
    fn base(&self) -> &StorageBase {
        &self.base
    }
}
