// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing session repository.
//!
//! A session is the envelope together with its recipient and documents.
//! Creation and deletion each run as one write transaction: either every
//! row exists afterwards or none does.
//!
//! ## Ownership
//!
//! ```text
//! recipient ──document──> documents
//! envelope  ──placeholder / signature / token / face_attempt──> rows
//! ```
//!
//! Blobs are not part of the transaction. Callers store them first and
//! remove them best-effort when the transaction fails; on delete the URLs of
//! every removed blob are handed back for the same cleanup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::envelopes::{
    sort_placeholders, FaceVerificationAttempt, NewPlaceholder, SignaturePlaceholder,
    StoredEnvelope, StoredSignature, VerificationChecks,
};
use crate::envelope::status::EnvelopeStatus;
use crate::storage::database::{
    add_child, child_ids, get_json, load_all, put_json, scan_json, take_children, take_json,
    ChildKind, DbError, DbResult, EnvelopeDb, CHILDREN, CONSENTS, DOCUMENTS, ENVELOPES,
    FACE_ATTEMPTS, PLACEHOLDERS, RECIPIENTS, SIGNATURES, SIGNATURE_HASHES, SIGNING_TOKENS,
};
use crate::storage::object_store::BLOB_URL_SCHEME;
use crate::storage::vault::{EncryptionMeta, StoredBlob};

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Document metadata. Ciphertext lives in the object store at `storage_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    pub id: String,
    pub recipient_id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_url: String,
    /// `None` for documents stored without encryption.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub encryption: Option<EncryptionMeta>,
    pub uploaded_at: DateTime<Utc>,
}

/// Document already written to the vault, awaiting its row.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub blob: StoredBlob,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub recipient_name: String,
    pub recipient_email: String,
    pub workflow_id: String,
    pub expires_at: DateTime<Utc>,
    pub documents: Vec<NewDocument>,
    pub placeholders: Vec<NewPlaceholder>,
}

#[derive(Debug, Clone)]
pub struct SessionCreated {
    pub envelope: StoredEnvelope,
    pub recipient: Recipient,
    pub documents: Vec<StoredDocument>,
    pub placeholders: Vec<SignaturePlaceholder>,
}

/// Full session view.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub envelope: StoredEnvelope,
    pub recipient: Recipient,
    pub documents: Vec<StoredDocument>,
    pub signatures: Vec<StoredSignature>,
    pub placeholders: Vec<SignaturePlaceholder>,
}

/// Row of the admin session listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub recipient_name: String,
    pub recipient_email: String,
    pub status: EnvelopeStatus,
    pub workflow_id: String,
    pub document_count: usize,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Result of a cascade delete.
#[derive(Debug, Clone, Default)]
pub struct DeletedSession {
    pub envelope_id: String,
    pub tokens: usize,
    pub face_attempts: usize,
    pub signatures: usize,
    pub placeholders: usize,
    pub documents: usize,
    /// Objects that should now be removed from the blob store.
    pub blob_urls: Vec<String>,
}

// =============================================================================
// Repository
// =============================================================================

pub struct SessionRepository<'a> {
    db: &'a EnvelopeDb,
}

impl<'a> SessionRepository<'a> {
    pub fn new(db: &'a EnvelopeDb) -> Self {
        Self { db }
    }

    /// Insert recipient, documents, envelope (`pending`) and placeholders.
    pub fn create_signing_session(&self, new: NewSession) -> DbResult<SessionCreated> {
        let now = Utc::now();
        let recipient = Recipient {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.recipient_name,
            email: new.recipient_email,
            created_at: now,
        };
        let envelope = StoredEnvelope {
            id: uuid::Uuid::new_v4().to_string(),
            recipient_id: recipient.id.clone(),
            status: EnvelopeStatus::Pending,
            workflow_id: new.workflow_id,
            created_at: now,
            updated_at: now,
            expires_at: new.expires_at,
            signed_pdf_url: None,
            signed_pdf_encryption: None,
            checks: VerificationChecks::default(),
            status_reason: None,
        };
        let documents: Vec<StoredDocument> = new
            .documents
            .into_iter()
            .map(|doc| StoredDocument {
                id: uuid::Uuid::new_v4().to_string(),
                recipient_id: recipient.id.clone(),
                filename: doc.filename,
                content_type: doc.content_type,
                size_bytes: doc.size_bytes,
                storage_url: doc.blob.url,
                encryption: doc.blob.encryption,
                uploaded_at: now,
            })
            .collect();
        let mut placeholders: Vec<SignaturePlaceholder> = new
            .placeholders
            .iter()
            .map(|p| SignaturePlaceholder {
                id: uuid::Uuid::new_v4().to_string(),
                envelope_id: envelope.id.clone(),
                page_number: p.page_number,
                x: p.x,
                y: p.y,
                width: p.width,
                height: p.height,
                is_signed: false,
                signed_at: None,
            })
            .collect();

        let write_txn = self.db.begin_write()?;
        {
            let mut children = write_txn.open_table(CHILDREN)?;

            put_json(&mut write_txn.open_table(RECIPIENTS)?, &recipient.id, &recipient)?;

            let mut doc_table = write_txn.open_table(DOCUMENTS)?;
            for doc in &documents {
                put_json(&mut doc_table, &doc.id, doc)?;
                add_child(&mut children, &recipient.id, ChildKind::Document, &doc.id)?;
            }

            put_json(&mut write_txn.open_table(ENVELOPES)?, &envelope.id, &envelope)?;

            let mut placeholder_table = write_txn.open_table(PLACEHOLDERS)?;
            for p in &placeholders {
                put_json(&mut placeholder_table, &p.id, p)?;
                add_child(&mut children, &envelope.id, ChildKind::Placeholder, &p.id)?;
            }
        }
        write_txn.commit()?;

        sort_placeholders(&mut placeholders);
        Ok(SessionCreated {
            envelope,
            recipient,
            documents,
            placeholders,
        })
    }

    /// Envelope joined with recipient, documents, signatures and placeholders.
    pub fn get_session(&self, id: &str) -> DbResult<SessionSnapshot> {
        let read_txn = self.db.begin_read()?;
        let children = read_txn.open_table(CHILDREN)?;

        let envelope: StoredEnvelope = get_json(&read_txn.open_table(ENVELOPES)?, id)?
            .ok_or_else(|| DbError::NotFound(format!("Session {id}")))?;
        let recipient: Recipient =
            get_json(&read_txn.open_table(RECIPIENTS)?, &envelope.recipient_id)?.ok_or_else(
                || DbError::NotFound(format!("Recipient {}", envelope.recipient_id)),
            )?;

        let doc_ids = child_ids(&children, &recipient.id, ChildKind::Document)?;
        let documents = load_all(&read_txn.open_table(DOCUMENTS)?, &doc_ids)?;

        let sig_ids = child_ids(&children, id, ChildKind::Signature)?;
        let mut signatures: Vec<StoredSignature> =
            load_all(&read_txn.open_table(SIGNATURES)?, &sig_ids)?;
        signatures.sort_by_key(|s| s.created_at);

        let placeholder_ids = child_ids(&children, id, ChildKind::Placeholder)?;
        let mut placeholders: Vec<SignaturePlaceholder> =
            load_all(&read_txn.open_table(PLACEHOLDERS)?, &placeholder_ids)?;
        sort_placeholders(&mut placeholders);

        Ok(SessionSnapshot {
            envelope,
            recipient,
            documents,
            signatures,
            placeholders,
        })
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> DbResult<Vec<SessionSummary>> {
        let read_txn = self.db.begin_read()?;
        let children = read_txn.open_table(CHILDREN)?;
        let recipients = read_txn.open_table(RECIPIENTS)?;
        let envelopes: Vec<StoredEnvelope> = scan_json(&read_txn.open_table(ENVELOPES)?)?;

        let mut summaries = Vec::with_capacity(envelopes.len());
        for envelope in envelopes {
            let Some(recipient) = get_json::<Recipient>(&recipients, &envelope.recipient_id)?
            else {
                tracing::warn!(envelope_id = %envelope.id, "Envelope without recipient");
                continue;
            };
            let document_count = child_ids(&children, &recipient.id, ChildKind::Document)?.len();
            summaries.push(SessionSummary {
                session_id: envelope.id,
                recipient_name: recipient.name,
                recipient_email: recipient.email,
                status: envelope.status,
                workflow_id: envelope.workflow_id,
                document_count,
                created_at: envelope.created_at,
                expires_at: envelope.expires_at,
            });
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    pub fn get_document(&self, id: &str) -> DbResult<StoredDocument> {
        let read_txn = self.db.begin_read()?;
        get_json(&read_txn.open_table(DOCUMENTS)?, id)?
            .ok_or_else(|| DbError::NotFound(format!("Document {id}")))
    }

    /// Cascade delete, all-or-nothing.
    ///
    /// Order: tokens, face attempts, signatures (with consents and hashes),
    /// placeholders, documents, recipient, envelope.
    pub fn delete_session(&self, id: &str) -> DbResult<DeletedSession> {
        let mut deleted = DeletedSession {
            envelope_id: id.to_string(),
            ..Default::default()
        };

        let write_txn = self.db.begin_write()?;
        {
            let mut envelopes = write_txn.open_table(ENVELOPES)?;
            let envelope: StoredEnvelope = get_json(&envelopes, id)?
                .ok_or_else(|| DbError::NotFound(format!("Session {id}")))?;

            let mut children = write_txn.open_table(CHILDREN)?;

            let mut tokens = write_txn.open_table(SIGNING_TOKENS)?;
            for token in take_children(&mut children, id, ChildKind::SigningToken)? {
                tokens.remove(token.as_str())?;
                deleted.tokens += 1;
            }

            let mut attempts = write_txn.open_table(FACE_ATTEMPTS)?;
            for attempt_id in take_children(&mut children, id, ChildKind::FaceAttempt)? {
                if let Some(attempt) = take_json::<FaceVerificationAttempt>(&mut attempts, &attempt_id)? {
                    deleted.blob_urls.push(attempt.selfie_url);
                    deleted.blob_urls.push(attempt.document_url);
                    deleted.face_attempts += 1;
                }
            }

            let mut signatures = write_txn.open_table(SIGNATURES)?;
            let mut consents = write_txn.open_table(CONSENTS)?;
            let mut hashes = write_txn.open_table(SIGNATURE_HASHES)?;
            for signature_id in take_children(&mut children, id, ChildKind::Signature)? {
                consents.remove(signature_id.as_str())?;
                hashes.remove(signature_id.as_str())?;
                if signatures.remove(signature_id.as_str())?.is_some() {
                    deleted.signatures += 1;
                }
            }

            let mut placeholders = write_txn.open_table(PLACEHOLDERS)?;
            for placeholder_id in take_children(&mut children, id, ChildKind::Placeholder)? {
                if placeholders.remove(placeholder_id.as_str())?.is_some() {
                    deleted.placeholders += 1;
                }
            }

            let mut documents = write_txn.open_table(DOCUMENTS)?;
            for doc_id in take_children(&mut children, &envelope.recipient_id, ChildKind::Document)? {
                if let Some(doc) = take_json::<StoredDocument>(&mut documents, &doc_id)? {
                    deleted.blob_urls.push(doc.storage_url);
                    deleted.documents += 1;
                }
            }

            write_txn
                .open_table(RECIPIENTS)?
                .remove(envelope.recipient_id.as_str())?;
            // Caller-supplied signed PDF URLs may point outside the store
            if let Some(url) = envelope
                .signed_pdf_url
                .as_ref()
                .filter(|u| u.starts_with(BLOB_URL_SCHEME))
            {
                deleted.blob_urls.push(url.clone());
            }
            envelopes.remove(id)?;
        }
        write_txn.commit()?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::envelopes::{EnvelopeRepository, NewSignature, SignatureType, SigningToken};
    use crate::storage::repository::test_support::setup;
    use redb::{ReadableTable, ReadableTableMetadata};

    fn new_session(docs: usize, placeholders: Vec<NewPlaceholder>) -> NewSession {
        NewSession {
            recipient_name: "Ada Lovelace".into(),
            recipient_email: "ada@example.com".into(),
            workflow_id: "standard".into(),
            expires_at: Utc::now() + chrono::Duration::days(7),
            documents: (0..docs)
                .map(|i| NewDocument {
                    filename: format!("doc{i}.pdf"),
                    content_type: "application/pdf".into(),
                    size_bytes: 100,
                    blob: StoredBlob {
                        url: format!("blob://documents/doc{i}"),
                        encryption: Some(EncryptionMeta {
                            iv: "00".repeat(16),
                            auth_tag: "11".repeat(16),
                        }),
                    },
                })
                .collect(),
            placeholders,
        }
    }

    fn placeholder(page: u32, x: f64) -> NewPlaceholder {
        NewPlaceholder {
            page_number: page,
            x,
            y: 0.1,
            width: 0.2,
            height: 0.05,
        }
    }

    #[test]
    fn create_and_get_session() {
        let (_temp, db) = setup();
        let repo = SessionRepository::new(&db);

        let created = repo
            .create_signing_session(new_session(2, vec![placeholder(2, 0.5), placeholder(1, 0.3)]))
            .unwrap();
        assert_eq!(created.envelope.status, EnvelopeStatus::Pending);
        assert_eq!(created.documents.len(), 2);
        assert_eq!(created.placeholders[0].page_number, 1);

        let snapshot = repo.get_session(&created.envelope.id).unwrap();
        assert_eq!(snapshot.recipient.name, "Ada Lovelace");
        assert_eq!(snapshot.documents.len(), 2);
        assert_eq!(snapshot.placeholders.len(), 2);
        assert_eq!(snapshot.placeholders[0].page_number, 1);
        assert!(snapshot.signatures.is_empty());

        let doc = repo.get_document(&created.documents[0].id).unwrap();
        assert!(doc.encryption.is_some());
    }

    #[test]
    fn list_sessions_reports_document_counts() {
        let (_temp, db) = setup();
        let repo = SessionRepository::new(&db);
        repo.create_signing_session(new_session(1, vec![])).unwrap();
        repo.create_signing_session(new_session(3, vec![])).unwrap();

        let mut counts: Vec<_> = repo
            .list_sessions()
            .unwrap()
            .into_iter()
            .map(|s| s.document_count)
            .collect();
        counts.sort();
        assert_eq!(counts, vec![1, 3]);
    }

    #[test]
    fn delete_session_removes_every_dependent_row() {
        let (_temp, db) = setup();
        let sessions = SessionRepository::new(&db);
        let envelopes = EnvelopeRepository::new(&db);

        let created = sessions
            .create_signing_session(new_session(2, vec![placeholder(1, 0.1)]))
            .unwrap();
        let id = created.envelope.id.clone();

        envelopes
            .add_signature(
                &id,
                NewSignature {
                    signature_type: SignatureType::Uploaded,
                    data: "data:image/png;base64,AAAA".into(),
                    consent_given: true,
                    ip_address: None,
                },
            )
            .unwrap();
        envelopes
            .insert_token(&SigningToken {
                token: "tok".into(),
                envelope_id: id.clone(),
                created_at: Utc::now(),
                expires_at: Utc::now(),
            })
            .unwrap();
        envelopes
            .record_face_attempt(&FaceVerificationAttempt {
                id: "fa".into(),
                envelope_id: id.clone(),
                selfie_url: "blob://verification/selfie".into(),
                selfie_encryption: None,
                document_url: "blob://verification/id".into(),
                document_encryption: None,
                face_verified: false,
                confidence: None,
                reason: None,
                error: Some("timeout".into()),
                attempted_at: Utc::now(),
            })
            .unwrap();

        let deleted = sessions.delete_session(&id).unwrap();
        assert_eq!(deleted.tokens, 1);
        assert_eq!(deleted.face_attempts, 1);
        assert_eq!(deleted.signatures, 1);
        assert_eq!(deleted.placeholders, 1);
        assert_eq!(deleted.documents, 2);
        assert_eq!(deleted.blob_urls.len(), 4);

        assert!(matches!(sessions.get_session(&id), Err(DbError::NotFound(_))));
        assert!(envelopes.find_token("tok").unwrap().is_none());

        let read = db.begin_read().unwrap();
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
        ] {
            assert_eq!(read.open_table(def).unwrap().len().unwrap(), 0);
        }
        assert!(read.open_table(CHILDREN).unwrap().iter().unwrap().next().is_none());
    }

    #[test]
    fn deleting_one_session_leaves_others_intact() {
        let (_temp, db) = setup();
        let repo = SessionRepository::new(&db);
        let keep = repo.create_signing_session(new_session(1, vec![placeholder(1, 0.2)])).unwrap();
        let gone = repo.create_signing_session(new_session(1, vec![placeholder(1, 0.2)])).unwrap();

        repo.delete_session(&gone.envelope.id).unwrap();

        let snapshot = repo.get_session(&keep.envelope.id).unwrap();
        assert_eq!(snapshot.documents.len(), 1);
        assert_eq!(snapshot.placeholders.len(), 1);
    }

    #[test]
    fn deleting_unknown_session_is_not_found() {
        let (_temp, db) = setup();
        let repo = SessionRepository::new(&db);
        assert!(matches!(repo.delete_session("nope"), Err(DbError::NotFound(_))));
    }
}
