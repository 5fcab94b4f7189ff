// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! API key repository.
//!
//! Only the salt and HMAC of a key are stored; the plaintext is shown once
//! at creation. `partial_key` (the first characters of the plaintext) is
//! indexed so authentication only has to check a handful of candidates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{
    get_json, make_prefix, make_prefix_end, put_json, scan_json, DbError, DbResult, EnvelopeDb,
    API_KEYS, API_KEY_PARTIALS,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredApiKey {
    pub id: String,
    pub name: String,
    /// Hex-encoded random salt.
    pub key_salt: String,
    /// Hex-encoded HMAC-SHA256(salt, key).
    pub key_hash: String,
    pub partial_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl StoredApiKey {
    /// Usable for authentication at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|exp| now <= exp)
    }
}

/// Key metadata safe to return to admins.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyInfo {
    pub id: String,
    pub name: String,
    pub partial_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl From<StoredApiKey> for ApiKeyInfo {
    fn from(key: StoredApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            partial_key: key.partial_key,
            created_at: key.created_at,
            expires_at: key.expires_at,
            revoked: key.revoked,
            revoked_at: key.revoked_at,
            last_used: key.last_used,
        }
    }
}

pub struct ApiKeyRepository<'a> {
    db: &'a EnvelopeDb,
}

impl<'a> ApiKeyRepository<'a> {
    pub fn new(db: &'a EnvelopeDb) -> Self {
        Self { db }
    }

    pub fn create(&self, key: &StoredApiKey) -> DbResult<()> {
        let index_key = {
            let mut k = make_prefix(&[&key.partial_key]);
            k.extend_from_slice(key.id.as_bytes());
            k
        };

        let write_txn = self.db.begin_write()?;
        {
            put_json(&mut write_txn.open_table(API_KEYS)?, &key.id, key)?;
            write_txn
                .open_table(API_KEY_PARTIALS)?
                .insert(index_key.as_slice(), key.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> DbResult<StoredApiKey> {
        let read_txn = self.db.begin_read()?;
        get_json(&read_txn.open_table(API_KEYS)?, id)?
            .ok_or_else(|| DbError::NotFound(format!("API key {id}")))
    }

    /// All keys, newest first.
    pub fn list(&self) -> DbResult<Vec<StoredApiKey>> {
        let read_txn = self.db.begin_read()?;
        let mut keys: Vec<StoredApiKey> = scan_json(&read_txn.open_table(API_KEYS)?)?;
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    /// Keys whose plaintext starts with `partial_key`.
    pub fn find_candidates(&self, partial_key: &str) -> DbResult<Vec<StoredApiKey>> {
        use redb::ReadableTable;

        let start = make_prefix(&[partial_key]);
        let end = make_prefix_end(&[partial_key]);

        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(API_KEY_PARTIALS)?;
        let keys = read_txn.open_table(API_KEYS)?;

        let mut candidates = Vec::new();
        for entry in index.range(start.as_slice()..end.as_slice())? {
            let entry = entry?;
            if let Some(key) = get_json(&keys, entry.1.value())? {
                candidates.push(key);
            }
        }
        Ok(candidates)
    }

    /// Revoke a key. Revoking twice keeps the first `revoked_at`.
    pub fn revoke(&self, id: &str) -> DbResult<StoredApiKey> {
        self.modify(id, |key| {
            if !key.revoked {
                key.revoked = true;
                key.revoked_at = Some(Utc::now());
            }
        })
    }

    pub fn touch_last_used(&self, id: &str) -> DbResult<()> {
        self.modify(id, |key| key.last_used = Some(Utc::now()))
            .map(|_| ())
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut StoredApiKey)) -> DbResult<StoredApiKey> {
        let write_txn = self.db.begin_write()?;
        let key = {
            let mut table = write_txn.open_table(API_KEYS)?;
            let mut key: StoredApiKey = get_json(&table, id)?
                .ok_or_else(|| DbError::NotFound(format!("API key {id}")))?;
            f(&mut key);
            put_json(&mut table, id, &key)?;
            key
        };
        write_txn.commit()?;
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::test_support::setup;

    fn key(id: &str, partial: &str) -> StoredApiKey {
        StoredApiKey {
            id: id.into(),
            name: format!("key {id}"),
            key_salt: "aa".into(),
            key_hash: "bb".into(),
            partial_key: partial.into(),
            created_at: Utc::now(),
            expires_at: None,
            revoked: false,
            revoked_at: None,
            last_used: None,
        }
    }

    #[test]
    fn candidates_are_found_by_partial_key() {
        let (_temp, db) = setup();
        let repo = ApiKeyRepository::new(&db);
        repo.create(&key("k1", "idk_aaaaaaaa")).unwrap();
        repo.create(&key("k2", "idk_bbbbbbbb")).unwrap();
        repo.create(&key("k3", "idk_aaaaaaaa")).unwrap();

        let mut ids: Vec<_> = repo
            .find_candidates("idk_aaaaaaaa")
            .unwrap()
            .into_iter()
            .map(|k| k.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["k1", "k3"]);
        assert!(repo.find_candidates("idk_cccccccc").unwrap().is_empty());
    }

    #[test]
    fn revoke_is_sticky() {
        let (_temp, db) = setup();
        let repo = ApiKeyRepository::new(&db);
        repo.create(&key("k1", "idk_aaaaaaaa")).unwrap();

        let first = repo.revoke("k1").unwrap();
        assert!(first.revoked);
        let second = repo.revoke("k1").unwrap();
        assert_eq!(first.revoked_at, second.revoked_at);
        assert!(!second.is_active_at(Utc::now()));
    }

    #[test]
    fn expired_keys_are_inactive() {
        let mut k = key("k1", "idk_aaaaaaaa");
        let now = Utc::now();
        assert!(k.is_active_at(now));
        k.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!k.is_active_at(now));
    }

    #[test]
    fn touch_updates_last_used() {
        let (_temp, db) = setup();
        let repo = ApiKeyRepository::new(&db);
        repo.create(&key("k1", "idk_aaaaaaaa")).unwrap();
        repo.touch_last_used("k1").unwrap();
        assert!(repo.get("k1").unwrap().last_used.is_some());
        assert!(matches!(repo.touch_last_used("nope"), Err(DbError::NotFound(_))));
    }
}
