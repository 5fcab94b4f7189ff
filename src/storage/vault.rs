// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document vault: authenticated encryption over the object store.
//!
//! Every object gets a fresh random 16-byte IV and is sealed with AES-256-GCM
//! under the server key. Only ciphertext reaches the object store; the IV and
//! the detached 16-byte tag are returned to the caller as [`EncryptionMeta`]
//! and persisted alongside the owning record in the repository.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce, Tag};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use super::object_store::{ObjectStore, ObjectStoreError};

/// AES-256-GCM with a 128-bit nonce.
type DocumentCipher = AesGcm<Aes256, U16>;

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// Authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Store(#[from] ObjectStoreError),

    /// Authentication tag did not verify. Plaintext is never returned.
    #[error("document failed integrity verification")]
    Tampered,

    #[error("invalid encryption metadata: {0}")]
    InvalidMetadata(String),

    #[error("encryption failure: {0}")]
    Crypto(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

/// Per-object encryption parameters, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionMeta {
    pub iv: String,
    pub auth_tag: String,
}

impl EncryptionMeta {
    fn decode(&self) -> VaultResult<([u8; IV_LEN], [u8; TAG_LEN])> {
        let iv = hex::decode(&self.iv)
            .map_err(|e| VaultError::InvalidMetadata(format!("iv: {e}")))?;
        let tag = hex::decode(&self.auth_tag)
            .map_err(|e| VaultError::InvalidMetadata(format!("auth_tag: {e}")))?;

        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| VaultError::InvalidMetadata(format!("iv must be {IV_LEN} bytes")))?;
        let tag: [u8; TAG_LEN] = tag
            .try_into()
            .map_err(|_| VaultError::InvalidMetadata(format!("auth_tag must be {TAG_LEN} bytes")))?;
        Ok((iv, tag))
    }
}

/// Result of a vault upload.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub url: String,
    pub encryption: Option<EncryptionMeta>,
}

#[derive(Clone)]
pub struct DocumentVault {
    store: ObjectStore,
    cipher: DocumentCipher,
    rng: SystemRandom,
}

impl std::fmt::Debug for DocumentVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentVault")
            .field("store", &self.store)
            .field("cipher", &"[REDACTED]")
            .finish()
    }
}

impl DocumentVault {
    pub fn new(store: ObjectStore, key: &[u8; 32]) -> Self {
        Self {
            store,
            cipher: DocumentCipher::new(Key::<DocumentCipher>::from_slice(key)),
            rng: SystemRandom::new(),
        }
    }

    pub fn object_store(&self) -> &ObjectStore {
        &self.store
    }

    /// Encrypt and upload. The returned metadata is required to read it back.
    pub fn store(&self, prefix: &str, name: &str, plaintext: &[u8]) -> VaultResult<StoredBlob> {
        let mut iv = [0u8; IV_LEN];
        self.rng
            .fill(&mut iv)
            .map_err(|_| VaultError::Crypto("random IV generation failed".to_string()))?;

        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::<U16>::from_slice(&iv), b"", &mut buffer)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;

        let url = self.store.put(prefix, name, &buffer)?;
        Ok(StoredBlob {
            url,
            encryption: Some(EncryptionMeta {
                iv: hex::encode(iv),
                auth_tag: hex::encode(tag.as_slice()),
            }),
        })
    }

    /// Upload without encryption.
    pub fn store_plain(&self, prefix: &str, name: &str, data: &[u8]) -> VaultResult<StoredBlob> {
        let url = self.store.put(prefix, name, data)?;
        Ok(StoredBlob {
            url,
            encryption: None,
        })
    }

    /// Download and, when metadata is present, decrypt and authenticate.
    pub fn retrieve(&self, url: &str, encryption: Option<&EncryptionMeta>) -> VaultResult<Vec<u8>> {
        let mut data = self.store.get(url)?;
        let Some(meta) = encryption else {
            return Ok(data);
        };

        let (iv, tag) = meta.decode()?;
        self.cipher
            .decrypt_in_place_detached(
                Nonce::<U16>::from_slice(&iv),
                b"",
                &mut data,
                Tag::from_slice(&tag),
            )
            .map_err(|_| VaultError::Tampered)?;
        Ok(data)
    }

    /// Best-effort removal of a batch of objects. Returns how many failed.
    pub fn delete_all<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> usize {
        let mut failures = 0;
        for url in urls {
            if let Err(e) = self.store.delete(url) {
                tracing::warn!(url = %url, error = %e, "Failed to delete stored object");
                failures += 1;
            }
        }
        failures
    }
}
