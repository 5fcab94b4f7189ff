// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! API key issuance and verification.
//!
//! Keys look like `idk_<64 hex>`. The database holds a per-key random salt
//! and `HMAC-SHA256(salt, key)`; the first [`PARTIAL_KEY_LEN`] characters
//! are kept in clear for display and candidate lookup. Comparison goes
//! through `Mac::verify_slice`, which is constant-time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use tracing::warn;

use super::AuthError;
use crate::storage::repository::{ApiKeyRepository, StoredApiKey};
use crate::storage::EnvelopeDb;

pub const API_KEY_PREFIX: &str = "idk_";

/// Clear-text prefix length kept for lookup and display.
pub const PARTIAL_KEY_LEN: usize = 12;

const KEY_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

type HmacSha256 = Hmac<Sha256>;

fn random_bytes<const N: usize>() -> Result<[u8; N], AuthError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AuthError::InternalError("random generator failure".to_string()))?;
    Ok(bytes)
}

fn keyed_mac(key: &[u8], message: &str) -> Result<HmacSha256, AuthError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Fresh plaintext key.
pub fn generate_api_key() -> Result<String, AuthError> {
    Ok(format!(
        "{API_KEY_PREFIX}{}",
        hex::encode(random_bytes::<KEY_BYTES>()?)
    ))
}

pub fn partial_key(key: &str) -> String {
    key.chars().take(PARTIAL_KEY_LEN).collect()
}

/// Hex `HMAC-SHA256(salt, key)`.
pub fn hash_api_key(salt: &[u8], key: &str) -> Result<String, AuthError> {
    Ok(hex::encode(keyed_mac(salt, key)?.finalize().into_bytes()))
}

/// Constant-time check of `presented` against a stored key.
pub fn key_matches(stored: &StoredApiKey, presented: &str) -> bool {
    let (Ok(salt), Ok(expected)) = (hex::decode(&stored.key_salt), hex::decode(&stored.key_hash))
    else {
        return false;
    };
    keyed_mac(&salt, presented)
        .map(|mac| mac.verify_slice(&expected).is_ok())
        .unwrap_or(false)
}

/// Build a new key record. The plaintext is returned once and never stored.
pub fn new_api_key(
    name: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<(StoredApiKey, String), AuthError> {
    let plaintext = generate_api_key()?;
    let salt = random_bytes::<SALT_BYTES>()?;
    let record = StoredApiKey {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        key_salt: hex::encode(salt),
        key_hash: hash_api_key(&salt, &plaintext)?,
        partial_key: partial_key(&plaintext),
        created_at: Utc::now(),
        expires_at,
        revoked: false,
        revoked_at: None,
        last_used: None,
    };
    Ok((record, plaintext))
}

/// Resolve a presented key to its record, updating `last_used`.
pub fn authenticate_api_key(db: &EnvelopeDb, presented: &str) -> Result<StoredApiKey, AuthError> {
    if !presented.starts_with(API_KEY_PREFIX) || presented.len() <= PARTIAL_KEY_LEN {
        return Err(AuthError::InvalidApiKey);
    }

    let repo = ApiKeyRepository::new(db);
    let candidates = repo
        .find_candidates(&partial_key(presented))
        .map_err(|e| AuthError::InternalError(e.to_string()))?;
    let key = candidates
        .into_iter()
        .find(|k| key_matches(k, presented))
        .ok_or(AuthError::InvalidApiKey)?;

    if key.revoked {
        return Err(AuthError::ApiKeyRevoked);
    }
    if !key.is_active_at(Utc::now()) {
        return Err(AuthError::ApiKeyExpired);
    }

    if let Err(e) = repo.touch_last_used(&key.id) {
        warn!(key_id = %key.id, error = %e, "Failed to update API key last_used");
    }
    Ok(key)
}

/// Admin bearer token, held only as an HMAC digest under a per-process key.
pub struct AdminCredential {
    mac_key: [u8; 32],
    digest: Vec<u8>,
}

impl AdminCredential {
    pub fn new(token: &str) -> Result<Self, AuthError> {
        let mac_key = random_bytes::<32>()?;
        let digest = keyed_mac(&mac_key, token)?.finalize().into_bytes().to_vec();
        Ok(Self { mac_key, digest })
    }

    pub fn verify(&self, presented: &str) -> bool {
        keyed_mac(&self.mac_key, presented)
            .map(|mac| mac.verify_slice(&self.digest).is_ok())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for AdminCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AdminCredential(<redacted>)")
    }
}
