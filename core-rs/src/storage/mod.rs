//! Storage subsystem
//!
//! Each artifact kind is persisted by its own storage. All of them are built
//! from a [`StorageBase`]: a root directory owned exclusively by that storage,
//! the target being stored against, a logging span, and a serial queue that
//! every mutating or enumerating operation runs on.

pub mod application;
pub mod bundle;
pub mod file;
pub mod fs_ops;
pub mod manager;
pub mod xctest;

pub use application::{ApplicationBundleStorage, PersistedApplication};
pub use bundle::BundleStorage;
pub use file::FileStorage;
pub use manager::StorageManager;
pub use xctest::TestBundleStorage;

use crate::errors::{IoResultExt, Result};
use crate::target::Target;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Span;

/// Shared primitive of every storage.
#[derive(Debug)]
pub struct StorageBase {
    root: PathBuf,
    target: Arc<dyn Target>,
    span: Span,
    queue: Mutex<()>,
}

impl StorageBase {
    /// Create the storage, making sure `root` exists.
    pub fn new(target: Arc<dyn Target>, root: PathBuf, span: Span) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage directory {}", root.display()))?;

        Ok(StorageBase {
            root,
            target,
            span,
            queue: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Run `task` on this storage's queue.
    ///
    /// Tasks submitted to the same storage never interleave. A task that
    /// panicked does not poison the queue for later callers.
    pub fn serialized<T>(&self, task: impl FnOnce() -> T) -> T {
        let _turn = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let _entered = self.span.enter();
        task()
    }

    /// Remove every persisted entry. Must be called from a serialized task.
    pub(crate) fn clean_locked(&self) -> Result<()> {
        for entry in fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read directory {}", self.root.display()))?
        {
            let entry =
                entry.with_context(|| format!("Failed to read entry in {}", self.root.display()))?;
            fs_ops::remove_path(&entry.path())?;
        }
        tracing::info!(root = %self.root.display(), "cleaned storage");
        Ok(())
    }

    /// Remove every persisted entry.
    pub fn clean(&self) -> Result<()> {
        self.serialized(|| self.clean_locked())
    }
}

/// The interface every storage exposes.
pub trait Storage {
    fn base(&self) -> &StorageBase;

    fn root_path(&self) -> &Path {
        self.base().root()
    }
}

impl Storage for StorageBase {
    fn base(&self) -> &StorageBase {
        self
    }
}
