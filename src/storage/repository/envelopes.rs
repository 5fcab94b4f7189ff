// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope repository.
//!
//! The envelope is the aggregate root. Placeholders, signatures (with their
//! consent and hash rows), signing tokens and face verification attempts
//! hang off it through `children` edges so a session delete can find and
//! remove every one of them in the same write transaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;

use crate::envelope::status::EnvelopeStatus;
use crate::storage::database::{
    add_child, child_ids, get_json, load_all, put_json, ChildKind, DbError, DbResult,
    EnvelopeDb, CHILDREN, CONSENTS, ENVELOPES, FACE_ATTEMPTS, PLACEHOLDERS, SIGNATURES,
    SIGNATURE_HASHES, SIGNING_TOKENS,
};
use crate::storage::vault::EncryptionMeta;

/// Hash algorithm recorded for signature integrity rows.
pub const SIGNATURE_HASH_ALGORITHM: &str = "sha256";

// =============================================================================
// Records
// =============================================================================

/// Latest identity check results recorded against an envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationChecks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_confidence: Option<f64>,
    /// When the gate last passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

/// Envelope aggregate root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredEnvelope {
    pub id: String,
    pub recipient_id: String,
    pub status: EnvelopeStatus,
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_pdf_url: Option<String>,
    /// Set when the signed PDF was sealed by the vault.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub signed_pdf_encryption: Option<EncryptionMeta>,
    #[serde(default)]
    pub checks: VerificationChecks,
    /// Free-form reason supplied with the last caller-requested transition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_reason: Option<String>,
}

impl StoredEnvelope {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// A declared location where a signature is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignaturePlaceholder {
    pub id: String,
    pub envelope_id: String,
    /// 1-based page number.
    pub page_number: u32,
    /// Fraction of page width from the left edge.
    pub x: f64,
    /// Fraction of page height from the top edge.
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub is_signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

/// Placeholder as supplied by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewPlaceholder {
    pub page_number: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NewPlaceholder {
    /// Coordinates are fractions of the page and the box must fit on it.
    pub fn validate(&self) -> Result<(), String> {
        if self.page_number == 0 {
            return Err("pageNumber is 1-based".to_string());
        }
        let fractions = [("x", self.x), ("y", self.y)];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be a fraction in [0, 1]"));
            }
        }
        let sizes = [("width", self.width), ("height", self.height)];
        for (name, value) in sizes {
            if !(value > 0.0 && value <= 1.0) {
                return Err(format!("{name} must be a fraction in (0, 1]"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SignatureType {
    Drawn,
    Uploaded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredSignature {
    pub id: String,
    pub envelope_id: String,
    pub signature_type: SignatureType,
    /// Signature image as a data URL.
    pub data: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureConsent {
    pub signature_id: String,
    pub envelope_id: String,
    pub consent_given: bool,
    pub consented_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHash {
    pub signature_id: String,
    pub envelope_id: String,
    pub algorithm: String,
    pub digest_hex: String,
    pub created_at: DateTime<Utc>,
}

/// Signature submission written together with its consent and hash.
#[derive(Debug, Clone)]
pub struct NewSignature {
    pub signature_type: SignatureType,
    pub data: String,
    pub consent_given: bool,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningToken {
    pub token: String,
    pub envelope_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SigningToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// One face match attempt, recorded whether or not the verifier succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerificationAttempt {
    pub id: String,
    pub envelope_id: String,
    pub selfie_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub selfie_encryption: Option<EncryptionMeta>,
    pub document_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub document_encryption: Option<EncryptionMeta>,
    pub face_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Set when the verifier itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

// =============================================================================
// Helpers
// =============================================================================

fn load_envelope(
    table: &impl redb::ReadableTable<&'static str, &'static [u8]>,
    id: &str,
) -> DbResult<StoredEnvelope> {
    get_json(table, id)?.ok_or_else(|| DbError::NotFound(format!("Envelope {id}")))
}

fn digest_hex(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}

/// Insert signature, consent and hash in that order within `txn`.
fn write_signature(
    txn: &redb::WriteTransaction,
    envelope_id: &str,
    new: NewSignature,
) -> DbResult<StoredSignature> {
    let now = Utc::now();
    let signature = StoredSignature {
        id: uuid::Uuid::new_v4().to_string(),
        envelope_id: envelope_id.to_string(),
        signature_type: new.signature_type,
        data: new.data,
        created_at: now,
    };
    let consent = SignatureConsent {
        signature_id: signature.id.clone(),
        envelope_id: envelope_id.to_string(),
        consent_given: new.consent_given,
        consented_at: now,
        ip_address: new.ip_address,
    };
    let hash = SignatureHash {
        signature_id: signature.id.clone(),
        envelope_id: envelope_id.to_string(),
        algorithm: SIGNATURE_HASH_ALGORITHM.to_string(),
        digest_hex: digest_hex(&signature.data),
        created_at: now,
    };

    put_json(&mut txn.open_table(SIGNATURES)?, &signature.id, &signature)?;
    put_json(&mut txn.open_table(CONSENTS)?, &signature.id, &consent)?;
    put_json(&mut txn.open_table(SIGNATURE_HASHES)?, &signature.id, &hash)?;
    add_child(
        &mut txn.open_table(CHILDREN)?,
        envelope_id,
        ChildKind::Signature,
        &signature.id,
    )?;
    Ok(signature)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for envelopes and the rows they own.
pub struct EnvelopeRepository<'a> {
    db: &'a EnvelopeDb,
}

impl<'a> EnvelopeRepository<'a> {
    pub fn new(db: &'a EnvelopeDb) -> Self {
        Self { db }
    }

    /// Get an envelope by ID.
    pub fn get(&self, id: &str) -> DbResult<StoredEnvelope> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ENVELOPES)?;
        load_envelope(&table, id)
    }

    /// Read-modify-write one envelope inside a single write transaction.
    ///
    /// `updated_at` is refreshed before `f` runs. If `f` fails nothing is
    /// written.
    pub fn update_with<T, E>(
        &self,
        id: &str,
        f: impl FnOnce(&mut StoredEnvelope) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DbError>,
    {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(ENVELOPES).map_err(DbError::from)?;
            let mut envelope = load_envelope(&table, id)?;
            envelope.updated_at = Utc::now();
            let result = f(&mut envelope)?;
            put_json(&mut table, id, &envelope)?;
            result
        };
        write_txn.commit().map_err(DbError::from)?;
        Ok(result)
    }

    /// Like [`Self::update_with`], additionally persisting a signature with
    /// its consent and hash in the same transaction.
    pub fn update_with_signature<T, E>(
        &self,
        id: &str,
        signature: NewSignature,
        f: impl FnOnce(&mut StoredEnvelope) -> Result<T, E>,
    ) -> Result<(T, StoredSignature), E>
    where
        E: From<DbError>,
    {
        let write_txn = self.db.begin_write()?;
        let result = {
            let mut table = write_txn.open_table(ENVELOPES).map_err(DbError::from)?;
            let mut envelope = load_envelope(&table, id)?;
            envelope.updated_at = Utc::now();
            let result = f(&mut envelope)?;
            put_json(&mut table, id, &envelope)?;

            let stored = write_signature(&write_txn, id, signature)?;
            (result, stored)
        };
        write_txn.commit().map_err(DbError::from)?;
        Ok(result)
    }

    // =========================================================================
    // Placeholders
    // =========================================================================

    pub fn add_placeholder(
        &self,
        envelope_id: &str,
        placeholder: &NewPlaceholder,
    ) -> DbResult<SignaturePlaceholder> {
        let stored = SignaturePlaceholder {
            id: uuid::Uuid::new_v4().to_string(),
            envelope_id: envelope_id.to_string(),
            page_number: placeholder.page_number,
            x: placeholder.x,
            y: placeholder.y,
            width: placeholder.width,
            height: placeholder.height,
            is_signed: false,
            signed_at: None,
        };

        let write_txn = self.db.begin_write()?;
        {
            load_envelope(&write_txn.open_table(ENVELOPES)?, envelope_id)?;
            put_json(&mut write_txn.open_table(PLACEHOLDERS)?, &stored.id, &stored)?;
            add_child(
                &mut write_txn.open_table(CHILDREN)?,
                envelope_id,
                ChildKind::Placeholder,
                &stored.id,
            )?;
        }
        write_txn.commit()?;
        Ok(stored)
    }

    /// Placeholders ordered by page, then x.
    pub fn list_placeholders(&self, envelope_id: &str) -> DbResult<Vec<SignaturePlaceholder>> {
        let read_txn = self.db.begin_read()?;
        let children = read_txn.open_table(CHILDREN)?;
        let table = read_txn.open_table(PLACEHOLDERS)?;

        let ids = child_ids(&children, envelope_id, ChildKind::Placeholder)?;
        let mut placeholders: Vec<SignaturePlaceholder> = load_all(&table, &ids)?;
        sort_placeholders(&mut placeholders);
        Ok(placeholders)
    }

    /// Flip `is_signed` for a placeholder of this envelope.
    ///
    /// Returns `false` when it was already signed; the flag flips once.
    pub fn mark_placeholder_signed(&self, envelope_id: &str, placeholder_id: &str) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let flipped = {
            let mut table = write_txn.open_table(PLACEHOLDERS)?;
            let mut placeholder: SignaturePlaceholder = get_json(&table, placeholder_id)?
                .filter(|p: &SignaturePlaceholder| p.envelope_id == envelope_id)
                .ok_or_else(|| DbError::NotFound(format!("Placeholder {placeholder_id}")))?;

            if placeholder.is_signed {
                false
            } else {
                placeholder.is_signed = true;
                placeholder.signed_at = Some(Utc::now());
                put_json(&mut table, placeholder_id, &placeholder)?;
                true
            }
        };
        write_txn.commit()?;
        Ok(flipped)
    }

    // =========================================================================
    // Signatures
    // =========================================================================

    /// Persist a signature with its consent and hash, without a status change.
    pub fn add_signature(&self, envelope_id: &str, signature: NewSignature) -> DbResult<StoredSignature> {
        let write_txn = self.db.begin_write()?;
        let stored = {
            load_envelope(&write_txn.open_table(ENVELOPES)?, envelope_id)?;
            write_signature(&write_txn, envelope_id, signature)?
        };
        write_txn.commit()?;
        Ok(stored)
    }

    /// Signatures in creation order.
    pub fn list_signatures(&self, envelope_id: &str) -> DbResult<Vec<StoredSignature>> {
        let read_txn = self.db.begin_read()?;
        let children = read_txn.open_table(CHILDREN)?;
        let table = read_txn.open_table(SIGNATURES)?;

        let ids = child_ids(&children, envelope_id, ChildKind::Signature)?;
        let mut signatures: Vec<StoredSignature> = load_all(&table, &ids)?;
        signatures.sort_by_key(|s| s.created_at);
        Ok(signatures)
    }

    pub fn get_consent(&self, signature_id: &str) -> DbResult<Option<SignatureConsent>> {
        let read_txn = self.db.begin_read()?;
        get_json(&read_txn.open_table(CONSENTS)?, signature_id)
    }

    pub fn get_signature_hash(&self, signature_id: &str) -> DbResult<Option<SignatureHash>> {
        let read_txn = self.db.begin_read()?;
        get_json(&read_txn.open_table(SIGNATURE_HASHES)?, signature_id)
    }

    /// Re-hash the stored signature data and compare with the recorded digest.
    pub fn verify_signature_integrity(&self, signature_id: &str) -> DbResult<bool> {
        let read_txn = self.db.begin_read()?;
        let signature: StoredSignature = get_json(&read_txn.open_table(SIGNATURES)?, signature_id)?
            .ok_or_else(|| DbError::NotFound(format!("Signature {signature_id}")))?;
        let hash: SignatureHash = get_json(&read_txn.open_table(SIGNATURE_HASHES)?, signature_id)?
            .ok_or_else(|| DbError::NotFound(format!("Signature hash {signature_id}")))?;

        Ok(hash.algorithm == SIGNATURE_HASH_ALGORITHM
            && hash.digest_hex == digest_hex(&signature.data))
    }

    // =========================================================================
    // Signing tokens
    // =========================================================================

    pub fn insert_token(&self, token: &SigningToken) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            load_envelope(&write_txn.open_table(ENVELOPES)?, &token.envelope_id)?;
            put_json(&mut write_txn.open_table(SIGNING_TOKENS)?, &token.token, token)?;
            add_child(
                &mut write_txn.open_table(CHILDREN)?,
                &token.envelope_id,
                ChildKind::SigningToken,
                &token.token,
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn find_token(&self, token: &str) -> DbResult<Option<SigningToken>> {
        let read_txn = self.db.begin_read()?;
        get_json(&read_txn.open_table(SIGNING_TOKENS)?, token)
    }

    // =========================================================================
    // Face verification attempts
    // =========================================================================

    pub fn record_face_attempt(&self, attempt: &FaceVerificationAttempt) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            load_envelope(&write_txn.open_table(ENVELOPES)?, &attempt.envelope_id)?;
            put_json(&mut write_txn.open_table(FACE_ATTEMPTS)?, &attempt.id, attempt)?;
            add_child(
                &mut write_txn.open_table(CHILDREN)?,
                &attempt.envelope_id,
                ChildKind::FaceAttempt,
                &attempt.id,
            )?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Attempts oldest first.
    pub fn list_face_attempts(&self, envelope_id: &str) -> DbResult<Vec<FaceVerificationAttempt>> {
        let read_txn = self.db.begin_read()?;
        let children = read_txn.open_table(CHILDREN)?;
        let table = read_txn.open_table(FACE_ATTEMPTS)?;

        let ids = child_ids(&children, envelope_id, ChildKind::FaceAttempt)?;
        let mut attempts: Vec<FaceVerificationAttempt> = load_all(&table, &ids)?;
        attempts.sort_by_key(|a| a.attempted_at);
        Ok(attempts)
    }

    pub fn latest_face_attempt(&self, envelope_id: &str) -> DbResult<Option<FaceVerificationAttempt>> {
        Ok(self.list_face_attempts(envelope_id)?.pop())
    }
}

/// Order by page, then horizontal position.
pub(crate) fn sort_placeholders(placeholders: &mut [SignaturePlaceholder]) {
    placeholders.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.x.total_cmp(&b.x))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::test_support::{seed_envelope, setup};

    fn placeholder(page: u32, x: f64) -> NewPlaceholder {
        NewPlaceholder {
            page_number: page,
            x,
            y: 0.5,
            width: 0.2,
            height: 0.05,
        }
    }

    fn drawn(data: &str) -> NewSignature {
        NewSignature {
            signature_type: SignatureType::Drawn,
            data: data.to_string(),
            consent_given: true,
            ip_address: Some("10.0.0.1".to_string()),
        }
    }

    #[test]
    fn placeholders_are_ordered_by_page_then_x() {
        let (_temp, db) = setup();
        let env = seed_envelope(&db, EnvelopeStatus::Verified);
        let repo = EnvelopeRepository::new(&db);

        repo.add_placeholder(&env.id, &placeholder(2, 0.1)).unwrap();
        repo.add_placeholder(&env.id, &placeholder(1, 0.7)).unwrap();
        repo.add_placeholder(&env.id, &placeholder(1, 0.2)).unwrap();

        let listed = repo.list_placeholders(&env.id).unwrap();
        let order: Vec<_> = listed.iter().map(|p| (p.page_number, p.x)).collect();
        assert_eq!(order, vec![(1, 0.2), (1, 0.7), (2, 0.1)]);
    }

    #[test]
    fn marking_one_placeholder_leaves_the_other_unsigned() {
        let (_temp, db) = setup();
        let env = seed_envelope(&db, EnvelopeStatus::Verified);
        let repo = EnvelopeRepository::new(&db);

        let first = repo.add_placeholder(&env.id, &placeholder(1, 0.1)).unwrap();
        let second = repo.add_placeholder(&env.id, &placeholder(1, 0.6)).unwrap();

        assert!(repo.mark_placeholder_signed(&env.id, &first.id).unwrap());
        assert!(!repo.mark_placeholder_signed(&env.id, &first.id).unwrap());

        let listed = repo.list_placeholders(&env.id).unwrap();
        let signed: Vec<_> = listed.iter().map(|p| (p.id.clone(), p.is_signed)).collect();
        assert!(signed.contains(&(first.id.clone(), true)));
        assert!(signed.contains(&(second.id.clone(), false)));
    }

    #[test]
    fn placeholder_of_another_envelope_is_not_found() {
        let (_temp, db) = setup();
        let a = seed_envelope(&db, EnvelopeStatus::Verified);
        let b = seed_envelope(&db, EnvelopeStatus::Verified);
        let repo = EnvelopeRepository::new(&db);

        let p = repo.add_placeholder(&a.id, &placeholder(1, 0.1)).unwrap();
        assert!(matches!(
            repo.mark_placeholder_signed(&b.id, &p.id),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn placeholder_validation_rejects_out_of_page_values() {
        assert!(placeholder(1, 0.5).validate().is_ok());
        assert!(placeholder(0, 0.5).validate().is_err());
        assert!(placeholder(1, 1.5).validate().is_err());
        let mut zero = placeholder(1, 0.5);
        zero.width = 0.0;
        assert!(zero.validate().is_err());
    }

    #[test]
    fn failed_update_writes_nothing() {
        let (_temp, db) = setup();
        let env = seed_envelope(&db, EnvelopeStatus::Pending);
        let repo = EnvelopeRepository::new(&db);

        let result: Result<(), DbError> = repo.update_with(&env.id, |e| {
            e.status = EnvelopeStatus::Voided;
            Err(DbError::NotFound("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(repo.get(&env.id).unwrap().status, EnvelopeStatus::Pending);
    }

    #[test]
    fn signature_consent_and_hash_are_written_together() {
        let (_temp, db) = setup();
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);
        let repo = EnvelopeRepository::new(&db);

        let result: Result<((), StoredSignature), DbError> =
            repo.update_with_signature(&env.id, drawn("data:image/png;base64,AAAA"), |e| {
                e.status = EnvelopeStatus::Completed;
                Ok(())
            });
        let ((), signature) = result.unwrap();

        assert_eq!(repo.get(&env.id).unwrap().status, EnvelopeStatus::Completed);
        let consent = repo.get_consent(&signature.id).unwrap().unwrap();
        assert!(consent.consent_given);
        assert_eq!(consent.ip_address.as_deref(), Some("10.0.0.1"));

        let hash = repo.get_signature_hash(&signature.id).unwrap().unwrap();
        assert_eq!(hash.algorithm, "sha256");
        assert!(repo.verify_signature_integrity(&signature.id).unwrap());
        assert_eq!(repo.list_signatures(&env.id).unwrap().len(), 1);
    }

    #[test]
    fn tampered_signature_data_fails_integrity_check() {
        let (_temp, db) = setup();
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);
        let repo = EnvelopeRepository::new(&db);
        let signature = repo.add_signature(&env.id, drawn("original")).unwrap();

        let txn = db.begin_write().unwrap();
        {
            let mut table = txn.open_table(SIGNATURES).unwrap();
            let altered = StoredSignature {
                data: "forged".into(),
                ..signature.clone()
            };
            put_json(&mut table, &signature.id, &altered).unwrap();
        }
        txn.commit().unwrap();

        assert!(!repo.verify_signature_integrity(&signature.id).unwrap());
    }

    #[test]
    fn tokens_and_face_attempts_are_scoped_to_envelope() {
        let (_temp, db) = setup();
        let env = seed_envelope(&db, EnvelopeStatus::Verified);
        let repo = EnvelopeRepository::new(&db);
        let now = Utc::now();

        let token = SigningToken {
            token: "tok_1".into(),
            envelope_id: env.id.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::hours(1),
        };
        repo.insert_token(&token).unwrap();
        assert_eq!(repo.find_token("tok_1").unwrap(), Some(token.clone()));
        assert!(token.is_valid_at(now));
        assert!(!token.is_valid_at(now + chrono::Duration::hours(2)));

        for (i, verified) in [false, true].into_iter().enumerate() {
            repo.record_face_attempt(&FaceVerificationAttempt {
                id: format!("fa_{i}"),
                envelope_id: env.id.clone(),
                selfie_url: "blob://verification/s".into(),
                selfie_encryption: None,
                document_url: "blob://verification/d".into(),
                document_encryption: None,
                face_verified: verified,
                confidence: Some(0.9),
                reason: None,
                error: None,
                attempted_at: now + chrono::Duration::seconds(i as i64),
            })
            .unwrap();
        }
        let latest = repo.latest_face_attempt(&env.id).unwrap().unwrap();
        assert_eq!(latest.id, "fa_1");
        assert!(latest.face_verified);
    }

    #[test]
    fn rows_for_missing_envelope_are_rejected() {
        let (_temp, db) = setup();
        let repo = EnvelopeRepository::new(&db);
        assert!(matches!(
            repo.add_placeholder("missing", &placeholder(1, 0.1)),
            Err(DbError::NotFound(_))
        ));
        assert!(matches!(repo.get("missing"), Err(DbError::NotFound(_))));
    }
}
