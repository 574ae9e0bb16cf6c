//! Error types for idb storage

use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Target architectures {target:?} not in the bundle's supported architectures {supported:?}")]
    ArchitectureMismatch {
        target: BTreeSet<String>,
        supported: BTreeSet<String>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Ambiguous or unresolvable input: {0}")]
    Unresolvable(String),

    #[error("Failed to initialize {storage} storage: {source}")]
    Initialization {
        storage: String,
        #[source]
        source: Box<StorageError>,
    },

    #[error("Invalid bundle at {}: {reason}", path.display())]
    Descriptor { path: PathBuf, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Flat classification of a [`StorageError`], for callers that translate
/// errors into protocol-level responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IoFailure,
    ArchitectureMismatch,
    NotFound,
    AmbiguousOrUnresolvableInput,
    InitializationFailure,
    InvalidDescriptor,
    Configuration,
}

impl StorageError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StorageError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn descriptor(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StorageError::Descriptor {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn initialization(storage: impl Into<String>, source: StorageError) -> Self {
        StorageError::Initialization {
            storage: storage.into(),
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Io { .. } => ErrorKind::IoFailure,
            StorageError::ArchitectureMismatch { .. } => ErrorKind::ArchitectureMismatch,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Unresolvable(_) => ErrorKind::AmbiguousOrUnresolvableInput,
            StorageError::Initialization { .. } => ErrorKind::InitializationFailure,
            StorageError::Descriptor { .. } | StorageError::Json(_) => ErrorKind::InvalidDescriptor,
            StorageError::Yaml(_) | StorageError::Config(_) => ErrorKind::Configuration,
        }
    }
}

/// Attaches a human-readable context to `std::io` failures.
pub trait IoResultExt<T> {
    fn with_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_context<F>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|source| StorageError::io(context(), source))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
