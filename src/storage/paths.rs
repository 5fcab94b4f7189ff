// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Path utilities for the on-disk storage layout.

use std::path::{Path, PathBuf};

/// Default data directory when none is configured.
pub const DATA_ROOT: &str = "./data";

/// Storage path utilities.
///
/// ```text
/// {root}/
///   envelopes.redb         # Envelope repository (redb)
///   blobs/
///     documents/{key}      # Uploaded documents (ciphertext)
///     verification/{key}   # Selfie and ID captures (ciphertext)
/// ```
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory for all persistent data.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the embedded envelope database.
    pub fn database_file(&self) -> PathBuf {
        self.root.join("envelopes.redb")
    }

    /// Root directory of the object store.
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    /// Path of a single object. Keys are `/`-separated relative paths.
    pub fn blob(&self, key: &str) -> PathBuf {
        key.split('/')
            .fold(self.blobs_dir(), |path, segment| path.join(segment))
    }
}
