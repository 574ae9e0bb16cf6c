//! Uploaded archives
//!
//! Artifacts usually arrive as gzipped tarballs. They are unpacked into a
//! scratch directory outside any storage root and then handed to the storage
//! that persists the unpacked content.

use crate::errors::{IoResultExt, Result, StorageError};
use crate::storage::fs_ops;
use flate2::read::GzDecoder;
use std::env;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::Archive;
use uuid::Uuid;

/// Unpack the `.tar.gz` at `archive` into `destination`.
pub fn extract_tar_gz(archive: &Path, destination: &Path) -> Result<()> {
    let tar_gz = File::open(archive)
        .with_context(|| format!("Failed to open archive {}", archive.display()))?;

    let mut archive_reader = Archive::new(GzDecoder::new(tar_gz));
    archive_reader
        .unpack(destination)
        .with_context(|| format!("Failed to extract archive {}", archive.display()))
}

/// A scratch directory holding an extracted archive, removed on drop.
#[derive(Debug)]
pub struct ExtractedArchive {
    path: PathBuf,
}

impl ExtractedArchive {
    pub fn extract(archive: &Path) -> Result<Self> {
        let path = env::temp_dir().join(format!("idb-extract-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create extraction directory {}", path.display()))?;

        let extracted = ExtractedArchive { path };
        extract_tar_gz(archive, &extracted.path)?;
        tracing::debug!(archive = %archive.display(), into = %extracted.path.display(), "extracted archive");
        Ok(extracted)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExtractedArchive {
    fn drop(&mut self) {
        if let Err(e) = fs_ops::remove_path(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove extraction directory");
        }
    }
}

/// The only top-level entry of `dir` with `extension`.
pub fn find_single_with_extension(dir: &Path, extension: &str) -> Result<PathBuf> {
    let mut matches = fs_ops::entries_with_extension(dir, extension)?;
    match matches.len() {
        0 => Err(StorageError::Unresolvable(format!(
            "no .{} found in {}",
            extension,
            dir.display()
        ))),
        1 => Ok(matches.remove(0)),
        n => Err(StorageError::Unresolvable(format!(
            "{} candidates with .{} in {}",
            n,
            extension,
            dir.display()
        ))),
    }
}
