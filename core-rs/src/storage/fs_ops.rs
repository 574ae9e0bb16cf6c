//! Filesystem primitives shared by the storages
//!
//! Every write goes through a hidden staging directory inside the storage
//! root and is committed with a rename, so a failed save never leaves a
//! half-copied entry behind.

use crate::errors::{IoResultExt, Result, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

const STAGING_PREFIX: &str = ".staging-";
const SUPERSEDED_PREFIX: &str = ".superseded-";

/// Hidden entries (staging, superseded, `.DS_Store`) are never artifacts.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(true)
}

/// Visible entries of `dir`, sorted by name. Any enumeration failure is an error.
pub fn list_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        if !is_hidden(&path) {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Visible top-level entries of `dir` whose extension is `extension`.
pub fn entries_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    Ok(list_entries(dir)?
        .into_iter()
        .filter(|path| path.extension().map(|ext| ext == extension).unwrap_or(false))
        .collect())
}

/// Recursively copy `source` to `destination`, preserving symlinks.
pub fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    if source.is_file() {
        fs::copy(source, destination).with_context(|| {
            format!("Failed to copy {} to {}", source.display(), destination.display())
        })?;
        return Ok(());
    }

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let context = format!("Failed to walk {}", source.display());
            match e.into_io_error() {
                Some(io) => StorageError::io(context, io),
                None => StorageError::io(
                    context,
                    std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"),
                ),
            }
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| StorageError::Unresolvable(e.to_string()))?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
        }
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let pointee = fs::read_link(link)
        .with_context(|| format!("Failed to read symlink {}", link.display()))?;
    std::os::unix::fs::symlink(&pointee, target)
        .with_context(|| format!("Failed to create symlink {}", target.display()))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> Result<()> {
    let resolved = fs::canonicalize(link)
        .with_context(|| format!("Failed to resolve symlink {}", link.display()))?;
    copy_tree(&resolved, target)
}

/// Remove a file or directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StorageError::io(format!("Failed to stat {}", path.display()), e)),
    };

    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.with_context(|| format!("Failed to remove {}", path.display()))
}

/// A hidden scratch directory inside a storage root, removed on drop.
#[derive(Debug)]
pub struct Staging {
    path: PathBuf,
}

impl Staging {
    pub fn new(root: &Path) -> Result<Self> {
        let path = root.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        fs::create_dir(&path)
            .with_context(|| format!("Failed to create staging directory {}", path.display()))?;
        Ok(Staging { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if let Err(e) = remove_path(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staging directory");
        }
    }
}

/// Move `staged` to `destination`, superseding whatever currently lives at
/// `destination` and at each of `superseded`.
pub fn commit(root: &Path, staged: &Path, destination: &Path, superseded: &[PathBuf]) -> Result<()> {
    commit_all(root, &[(staged, destination)], superseded)
}

/// Move every `(staged, destination)` pair into place as one unit.
///
/// Every destination and every `superseded` entry is first renamed aside and
/// only deleted once all staged entries are in place. If any rename fails,
/// the placed entries go back to staging and the replaced ones are restored.
pub fn commit_all(root: &Path, placements: &[(&Path, &Path)], superseded: &[PathBuf]) -> Result<()> {
    let mut replaced: Vec<&Path> = Vec::new();
    let candidates = placements
        .iter()
        .map(|(_, destination)| *destination)
        .chain(superseded.iter().map(PathBuf::as_path));
    for path in candidates {
        if !replaced.contains(&path) {
            replaced.push(path);
        }
    }

    let mut moved_aside: Vec<(PathBuf, PathBuf)> = Vec::new();
    for original in replaced {
        if fs::symlink_metadata(original).is_err() {
            continue;
        }
        let aside = root.join(format!("{}{}", SUPERSEDED_PREFIX, Uuid::new_v4()));
        if let Err(e) = fs::rename(original, &aside) {
            restore(&moved_aside);
            return Err(StorageError::io(
                format!("Failed to move aside {}", original.display()),
                e,
            ));
        }
        moved_aside.push((original.to_path_buf(), aside));
    }

    let mut placed: Vec<(PathBuf, PathBuf)> = Vec::new();
    for (staged, destination) in placements {
        if let Err(e) = fs::rename(staged, destination) {
            restore(&placed);
            restore(&moved_aside);
            return Err(StorageError::io(
                format!("Failed to commit {} to {}", staged.display(), destination.display()),
                e,
            ));
        }
        placed.push((staged.to_path_buf(), destination.to_path_buf()));
    }

    for (_, aside) in &moved_aside {
        if let Err(e) = remove_path(aside) {
            tracing::warn!(path = %aside.display(), error = %e, "failed to delete superseded entry");
        }
    }

    Ok(())
}

/// Rename each `(original, current)` pair back, newest first.
fn restore(moved: &[(PathBuf, PathBuf)]) {
    for (original, current) in moved.iter().rev() {
        if let Err(e) = fs::rename(current, original) {
            tracing::warn!(path = %original.display(), error = %e, "failed to restore entry");
        }
    }
}
