// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded envelope database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `recipients`, `documents`, `envelopes`, `placeholders`, `signatures`,
//!   `signature_consents`, `signature_hashes`, `signing_tokens`,
//!   `face_attempts`, `webhooks`, `api_keys`: id → JSON record
//! - `children`: composite key (`parent|kind|child`) → child id. Every
//!   ownership edge lives here; cascades walk it inside one write transaction.
//! - `api_key_partials`: composite key (`partial|id`) → key id
//! - `audit_events`: composite key (`millis_be|event_id`) → JSON event
//!
//! redb serializes write transactions, so read-modify-write sequences done
//! inside one [`redb::WriteTransaction`] never interleave.

use std::path::Path;

use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata, Table,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

// =============================================================================
// Table Definitions
// =============================================================================

pub(crate) const RECIPIENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("recipients");
pub(crate) const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
pub(crate) const ENVELOPES: TableDefinition<&str, &[u8]> = TableDefinition::new("envelopes");
pub(crate) const PLACEHOLDERS: TableDefinition<&str, &[u8]> = TableDefinition::new("placeholders");
pub(crate) const SIGNATURES: TableDefinition<&str, &[u8]> = TableDefinition::new("signatures");

/// Keyed by signature id.
pub(crate) const CONSENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("signature_consents");

/// Keyed by signature id.
pub(crate) const SIGNATURE_HASHES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("signature_hashes");

/// Keyed by the token string itself.
pub(crate) const SIGNING_TOKENS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("signing_tokens");

pub(crate) const FACE_ATTEMPTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("face_attempts");
pub(crate) const WEBHOOKS: TableDefinition<&str, &[u8]> = TableDefinition::new("webhooks");
pub(crate) const API_KEYS: TableDefinition<&str, &[u8]> = TableDefinition::new("api_keys");

/// Ownership edges: `parent|kind|child` → child id.
pub(crate) const CHILDREN: TableDefinition<&[u8], &str> = TableDefinition::new("children");

/// Candidate lookup for API keys: `partial|id` → key id.
pub(crate) const API_KEY_PARTIALS: TableDefinition<&[u8], &str> =
    TableDefinition::new("api_key_partials");

/// Audit log: `millis_be|event_id` → JSON event.
pub(crate) const AUDIT_EVENTS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("audit_events");

/// Typed handle for a JSON record table opened in a write transaction.
pub(crate) type JsonTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Typed handle for an index table opened in a write transaction.
pub(crate) type IndexTable<'txn> = Table<'txn, &'static [u8], &'static str>;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Ownership Edges
// =============================================================================

/// Kinds of rows owned by a parent record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildKind {
    /// Recipient → Document
    Document,
    /// Envelope → SignaturePlaceholder
    Placeholder,
    /// Envelope → Signature (plus its consent and hash)
    Signature,
    /// Envelope → SigningToken
    SigningToken,
    /// Envelope → FaceVerificationAttempt
    FaceAttempt,
}

impl ChildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Placeholder => "placeholder",
            Self::Signature => "signature",
            Self::SigningToken => "token",
            Self::FaceAttempt => "face_attempt",
        }
    }
}

/// Build a `parent|kind|child` edge key.
fn make_edge_key(parent: &str, kind: ChildKind, child: &str) -> Vec<u8> {
    let mut key = make_prefix(&[parent, kind.as_str()]);
    key.extend_from_slice(child.as_bytes());
    key
}

/// Build a prefix key (`a|b|...|`) for range scanning an index.
pub(crate) fn make_prefix(parts: &[&str]) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(parts.iter().map(|p| p.len() + 1).sum());
    for part in parts {
        prefix.extend_from_slice(part.as_bytes());
        prefix.push(b'|');
    }
    prefix
}

/// Build the upper bound for a range scan (prefix with 0xFF bytes appended).
pub(crate) fn make_prefix_end(parts: &[&str]) -> Vec<u8> {
    let mut end = make_prefix(parts);
    // Append enough 0xFF bytes to be past any valid key with this prefix
    end.extend_from_slice(&[0xFF; 20]);
    end
}

/// Record an ownership edge.
pub(crate) fn add_child(
    children: &mut IndexTable<'_>,
    parent: &str,
    kind: ChildKind,
    child: &str,
) -> DbResult<()> {
    let key = make_edge_key(parent, kind, child);
    children.insert(key.as_slice(), child)?;
    Ok(())
}

/// All child ids of `kind` owned by `parent`, in key order.
pub(crate) fn child_ids(
    children: &impl ReadableTable<&'static [u8], &'static str>,
    parent: &str,
    kind: ChildKind,
) -> DbResult<Vec<String>> {
    let start = make_prefix(&[parent, kind.as_str()]);
    let end = make_prefix_end(&[parent, kind.as_str()]);

    let mut ids = Vec::new();
    for entry in children.range(start.as_slice()..end.as_slice())? {
        let entry = entry?;
        ids.push(entry.1.value().to_string());
    }
    Ok(ids)
}

/// Remove every edge of `kind` under `parent` and return the child ids.
pub(crate) fn take_children(
    children: &mut IndexTable<'_>,
    parent: &str,
    kind: ChildKind,
) -> DbResult<Vec<String>> {
    let ids = child_ids(&*children, parent, kind)?;
    for id in &ids {
        let key = make_edge_key(parent, kind, id);
        children.remove(key.as_slice())?;
    }
    Ok(ids)
}

// =============================================================================
// JSON Record Helpers
// =============================================================================

pub(crate) fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> DbResult<Option<T>> {
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn put_json<T: Serialize>(table: &mut JsonTable<'_>, key: &str, value: &T) -> DbResult<()> {
    let json = serde_json::to_vec(value)?;
    table.insert(key, json.as_slice())?;
    Ok(())
}

/// Remove a record, returning it if it existed.
pub(crate) fn take_json<T: DeserializeOwned>(
    table: &mut JsonTable<'_>,
    key: &str,
) -> DbResult<Option<T>> {
    // Copy out of the guard before the table is touched again
    let bytes = match table.remove(key)? {
        Some(value) => value.value().to_vec(),
        None => return Ok(None),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Deserialize every record in a table.
pub(crate) fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> DbResult<Vec<T>> {
    let mut records = Vec::new();
    for entry in table.iter()? {
        let entry = entry?;
        records.push(serde_json::from_slice(entry.1.value())?);
    }
    Ok(records)
}

/// Load the records behind a list of ids, skipping dangling ones.
pub(crate) fn load_all<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    ids: &[String],
) -> DbResult<Vec<T>> {
    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = get_json(table, id)? {
            records.push(record);
        }
    }
    Ok(records)
}

// =============================================================================
// EnvelopeDb
// =============================================================================

/// Embedded ACID database holding every persistent record except blobs.
pub struct EnvelopeDb {
    db: Database,
}

impl std::fmt::Debug for EnvelopeDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeDb").finish_non_exhaustive()
    }
}

impl EnvelopeDb {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            for def in [
                RECIPIENTS,
                DOCUMENTS,
                ENVELOPES,
                PLACEHOLDERS,
                SIGNATURES,
                CONSENTS,
                SIGNATURE_HASHES,
                SIGNING_TOKENS,
                FACE_ATTEMPTS,
                WEBHOOKS,
                API_KEYS,
            ] {
                let _ = write_txn.open_table(def)?;
            }
            let _ = write_txn.open_table(CHILDREN)?;
            let _ = write_txn.open_table(API_KEY_PARTIALS)?;
            let _ = write_txn.open_table(AUDIT_EVENTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn begin_read(&self) -> DbResult<ReadTransaction> {
        Ok(self.db.begin_read()?)
    }

    pub fn begin_write(&self) -> DbResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    /// Cheap read probe used by readiness checks.
    pub fn health_check(&self) -> DbResult<()> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENVELOPES)?;
        let _ = table.len()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: String,
        n: u32,
    }

    fn setup() -> (TempDir, EnvelopeDb) {
        let temp = TempDir::new().unwrap();
        let db = EnvelopeDb::open(&temp.path().join("nested/test.redb")).unwrap();
        (temp, db)
    }

    #[test]
    fn json_records_roundtrip_and_remove() {
        let (_temp, db) = setup();
        let row = Row {
            id: "r1".into(),
            n: 7,
        };

        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(ENVELOPES).unwrap();
            put_json(&mut table, &row.id, &row).unwrap();
        }
        txn.commit().unwrap();

        let read = db.begin_read().unwrap();
        let table = read.open_table(ENVELOPES).unwrap();
        assert_eq!(get_json::<Row>(&table, "r1").unwrap(), Some(row));
        assert_eq!(scan_json::<Row>(&table).unwrap().len(), 1);
        drop(table);
        drop(read);

        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(ENVELOPES).unwrap();
            let removed: Option<Row> = take_json(&mut table, "r1").unwrap();
            assert_eq!(removed.unwrap().n, 7);
            assert!(take_json::<Row>(&mut table, "r1").unwrap().is_none());
        }
        txn.commit().unwrap();
    }

    #[test]
    fn child_edges_are_scoped_by_parent_and_kind() {
        let (_temp, db) = setup();

        let txn = db.begin_write().unwrap();
        {
            let mut children = txn.open_table(CHILDREN).unwrap();
            add_child(&mut children, "env-1", ChildKind::Placeholder, "p1").unwrap();
            add_child(&mut children, "env-1", ChildKind::Placeholder, "p2").unwrap();
            add_child(&mut children, "env-1", ChildKind::Signature, "s1").unwrap();
            add_child(&mut children, "env-10", ChildKind::Placeholder, "p9").unwrap();
        }
        txn.commit().unwrap();

        let read = db.begin_read().unwrap();
        let children = read.open_table(CHILDREN).unwrap();
        assert_eq!(
            child_ids(&children, "env-1", ChildKind::Placeholder).unwrap(),
            vec!["p1".to_string(), "p2".to_string()]
        );
        assert_eq!(
            child_ids(&children, "env-1", ChildKind::Signature).unwrap(),
            vec!["s1".to_string()]
        );
        drop(children);
        drop(read);

        let txn = db.begin_write().unwrap();
        {
            let mut children = txn.open_table(CHILDREN).unwrap();
            let taken = take_children(&mut children, "env-1", ChildKind::Placeholder).unwrap();
            assert_eq!(taken.len(), 2);
            assert!(child_ids(&children, "env-1", ChildKind::Placeholder)
                .unwrap()
                .is_empty());
            assert_eq!(
                child_ids(&children, "env-10", ChildKind::Placeholder).unwrap(),
                vec!["p9".to_string()]
            );
        }
        txn.commit().unwrap();
    }

    #[test]
    fn aborted_transaction_leaves_no_trace() {
        let (_temp, db) = setup();

        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(ENVELOPES).unwrap();
            put_json(&mut table, "ghost", &Row { id: "ghost".into(), n: 1 }).unwrap();
        }
        drop(txn);

        let read = db.begin_read().unwrap();
        let table = read.open_table(ENVELOPES).unwrap();
        assert!(get_json::<Row>(&table, "ghost").unwrap().is_none());
    }

    #[test]
    fn health_check_passes_on_fresh_db() {
        let (_temp, db) = setup();
        db.health_check().unwrap();
    }
}
