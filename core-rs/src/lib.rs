//! # idb-storage - Artifact storage for automation targets
//!
//! Persists the artifacts a test or automation session installs onto a
//! device or simulator: test bundles and test-run manifests, applications,
//! dynamic libraries, debug symbols and frameworks.
//!
//! ## Core Principle
//!
//! **The directory IS the index**: every storage derives what it holds from
//! its own directory. Saves are staged next to the destination and committed
//! by rename, so a reader never observes a half-written entry.
//!
//! ## Layout
//!
//! ```text
//! <root>/<target udid>/
//! ├── xctest/<bundle id>/AppTests.xctest
//! ├── xctest/<bundle id>/App.xctestrun
//! ├── application/<bundle id>/App.app
//! ├── dylib/libFoo.dylib
//! ├── dsym/<bundle id>/App.app.dSYM
//! └── framework/<bundle id>/Foo.framework
//! ```

pub mod archive;
pub mod bundle;
pub mod config;
pub mod errors;
pub mod paths;
pub mod storage;
pub mod target;
pub mod xctest;


pub use bundle::{BundleDescriptor, BundleParser, InfoManifestParser};
pub use config::StorageConfig;
pub use errors::{ErrorKind, StorageError};
pub use storage::{
    ApplicationBundleStorage, BundleStorage, FileStorage, PersistedApplication, Storage, StorageBase,
    StorageManager, TestBundleStorage,
};
pub use target::{ArchitectureSet, Target, TargetInfo};
pub use xctest::{TestBundleDescriptor, TestDescriptor, TestRunDescriptor, TestRunManifest};

/// Version of the storage layout
pub const VERSION: &str = "0.4.2";
