// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Filesystem-backed object store.
//!
//! Objects are opaque byte blobs addressed by a `blob://{key}` URL. The store
//! knows nothing about encryption; [`super::vault::DocumentVault`] layers
//! authenticated encryption on top and hands the store ciphertext only.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};

use super::StoragePaths;

/// URL scheme for objects held in this store.
pub const BLOB_URL_SCHEME: &str = "blob://";

/// Max length kept from a client-supplied filename.
const MAX_NAME_LEN: usize = 96;

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object URL: {0}")]
    InvalidUrl(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Object store rooted at `{DATA_DIR}/blobs`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    paths: StoragePaths,
}

impl ObjectStore {
    /// Create the store and its root directory.
    pub fn open(paths: StoragePaths) -> ObjectStoreResult<Self> {
        fs::create_dir_all(paths.blobs_dir())?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Upload bytes under `{prefix}/{uuid}-{name}` and return the object URL.
    pub fn put(&self, prefix: &str, name: &str, data: &[u8]) -> ObjectStoreResult<String> {
        let key = format!("{prefix}/{}-{}", uuid::Uuid::new_v4(), sanitize_name(name));
        let path = self.paths.blob(&key);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("partial");
        {
            let file = File::create(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(data)?;
            writer.flush()?;
        }
        fs::rename(&temp_path, &path)?;

        Ok(format!("{BLOB_URL_SCHEME}{key}"))
    }

    /// Download the bytes behind an object URL.
    pub fn get(&self, url: &str) -> ObjectStoreResult<Vec<u8>> {
        let key = parse_key(url)?;
        fs::read(self.paths.blob(key)).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ObjectStoreError::NotFound(url.to_string()),
            _ => ObjectStoreError::Io(e),
        })
    }

    /// Delete an object. Missing objects are not an error.
    pub fn delete(&self, url: &str) -> ObjectStoreResult<()> {
        let key = parse_key(url)?;
        match fs::remove_file(self.paths.blob(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write-read-delete round trip against the blob root.
    pub fn health_check(&self) -> ObjectStoreResult<()> {
        let test_file = self.paths.blobs_dir().join(".health_check");
        let test_data = b"health_check_data";

        fs::write(&test_file, test_data)?;
        let read_data = fs::read(&test_file)?;
        fs::remove_file(&test_file)?;

        if read_data != test_data {
            return Err(ObjectStoreError::IntegrityViolation(
                "Health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

/// Extract and validate the key portion of a `blob://` URL.
fn parse_key(url: &str) -> ObjectStoreResult<&str> {
    let key = url
        .strip_prefix(BLOB_URL_SCHEME)
        .ok_or_else(|| ObjectStoreError::InvalidUrl(url.to_string()))?;

    let valid = !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !valid {
        return Err(ObjectStoreError::InvalidUrl(url.to_string()));
    }
    Ok(key)
}

/// Reduce a client filename to a safe single path segment.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();

    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "object".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ObjectStore) {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::open(StoragePaths::new(temp.path())).unwrap();
        (temp, store)
    }

    #[test]
    fn put_and_get_raw() {
        let (_temp, store) = setup();
        let data = b"raw test data with\nnewlines\nand bytes: \x00\x01\x02";

        let url = store.put("documents", "contract.pdf", data).unwrap();
        assert!(url.starts_with("blob://documents/"));
        assert!(url.ends_with("-contract.pdf"));

        assert_eq!(store.get(&url).unwrap(), data);
    }

    #[test]
    fn delete_removes_object_and_is_idempotent() {
        let (_temp, store) = setup();
        let url = store.put("documents", "a.txt", b"abc").unwrap();

        store.delete(&url).unwrap();
        assert!(matches!(store.get(&url), Err(ObjectStoreError::NotFound(_))));
        store.delete(&url).unwrap();
    }

    #[test]
    fn traversal_urls_are_rejected() {
        let (_temp, store) = setup();
        for url in [
            "blob://../secret",
            "blob://documents/../../etc/passwd",
            "https://example.com/x",
            "blob://",
        ] {
            assert!(
                matches!(store.get(url), Err(ObjectStoreError::InvalidUrl(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn filenames_are_sanitized() {
        assert_eq!(sanitize_name("../../evil name.pdf"), "evil_name.pdf");
        assert_eq!(sanitize_name("C:\\docs\\id card.png"), "id_card.png");
        assert_eq!(sanitize_name(".."), "object");
        assert_eq!(sanitize_name(""), "object");
    }

    #[test]
    fn health_check_works() {
        let (_temp, store) = setup();
        store.health_check().expect("Health check should pass");
    }
}
