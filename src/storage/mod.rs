// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state is split in two:
//!
//! - **Records** (envelopes, recipients, signatures, keys, webhooks, audit)
//!   live in one embedded redb database. Every multi-row operation is a
//!   single ACID write transaction.
//! - **Blobs** (uploaded documents, selfie and ID captures, signed PDFs)
//!   live in a filesystem object store. Sensitive blobs go through the
//!   [`DocumentVault`], which seals them with AES-256-GCM before they touch
//!   disk; the IV and tag are kept on the owning record.
//!
//! ## Storage Layout
//!
//! ```text
//! {DATA_DIR}/
//!   envelopes.redb
//!   blobs/
//!     documents/{uuid}-{name}     # Session documents (ciphertext)
//!     verification/{uuid}-{name}  # Selfie / ID captures (ciphertext)
//!     signed/{uuid}-{name}        # Signed PDFs (ciphertext)
//! ```

pub mod audit;
pub mod database;
pub mod object_store;
pub mod paths;
pub mod repository;
pub mod vault;

pub use audit::{AuditEvent, AuditEventType, AuditRepository};
pub use database::{DbError, DbResult, EnvelopeDb};
pub use object_store::{ObjectStore, ObjectStoreError};
pub use paths::StoragePaths;
pub use repository::{
    ApiKeyRepository, EnvelopeRepository, SessionRepository, StoredDocument, StoredEnvelope,
    WebhookRepository,
};
pub use vault::{DocumentVault, EncryptionMeta, StoredBlob, VaultError};

/// Object key prefixes.
pub mod prefixes {
    pub const DOCUMENTS: &str = "documents";
    pub const VERIFICATION: &str = "verification";
    pub const SIGNED: &str = "signed";
}
