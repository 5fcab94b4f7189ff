// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Envelope Lifecycle
//!
//! Every status change goes through here. Each operation validates the
//! requested transition against [`EnvelopeStatus`] inside the same write
//! transaction that persists it, then (after commit) appends an audit event
//! and publishes a domain event. The audit write is the authoritative
//! record; both side effects are logged on failure and never undo the
//! transition.
//!
//! Expiry is applied lazily: link issuance and signing call
//! [`EnvelopeLifecycle::ensure_not_expired`], which persists `expired` once
//! `now > expires_at` before reporting the error.

use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::status::EnvelopeStatus;
use super::workflow::{GateOutcome, Workflow};
use crate::audit_log;
use crate::events::{names, DomainEvent, EventDispatcher};
use crate::storage::repository::{
    EnvelopeRepository, NewSignature, SigningToken, StoredEnvelope, StoredSignature,
};
use crate::storage::object_store::BLOB_URL_SCHEME;
use crate::storage::{AuditEvent, AuditEventType, DbError, EnvelopeDb};

/// Signing token length in random bytes (hex encoded on the wire).
const TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0} not found")]
    NotFound(String),

    /// The operation is not valid for the envelope's current status.
    #[error("{0}")]
    Conflict(String),

    #[error("envelope {0} has expired")]
    Expired(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Db(DbError),

    #[error("{0}")]
    Internal(String),
}

impl From<DbError> for LifecycleError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => Self::NotFound(what),
            other => Self::Db(other),
        }
    }
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Who triggered an operation, for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub ip: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, ip: Option<String>) -> Self {
        Self { id: id.into(), ip }
    }
}

/// One identity check result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub verified: bool,
    pub confidence: Option<f64>,
}

impl CheckResult {
    pub fn new(verified: bool, confidence: Option<f64>) -> Self {
        Self {
            verified,
            confidence,
        }
    }
}

/// New check results; `None` leaves the recorded value untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VerificationUpdate {
    pub name: Option<CheckResult>,
    pub face: Option<CheckResult>,
}

#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub envelope: StoredEnvelope,
    pub previous: EnvelopeStatus,
    /// `None` when the envelope no longer accepts verification results.
    pub gate: Option<GateOutcome>,
}

impl VerificationOutcome {
    pub fn changed(&self) -> bool {
        self.envelope.status != self.previous
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SigningLink {
    pub link: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Caller-requested status change, optionally carrying a signature.
#[derive(Debug, Clone)]
pub struct StatusSubmission {
    pub status: EnvelopeStatus,
    pub reason: Option<String>,
    pub signed_pdf_url: Option<String>,
    pub signature: Option<NewSignature>,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub envelope: StoredEnvelope,
    pub previous: EnvelopeStatus,
    pub signature: Option<StoredSignature>,
}

/// Advisory placeholder check. Never gates a status write.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderCompletion {
    pub envelope_id: String,
    pub total: usize,
    pub signed: usize,
    pub unsigned_placeholder_ids: Vec<String>,
    pub complete: bool,
}

fn accepts_verification(status: EnvelopeStatus) -> bool {
    matches!(
        status,
        EnvelopeStatus::Pending | EnvelopeStatus::VerificationFailed
    )
}

fn transition_conflict(from: EnvelopeStatus, to: EnvelopeStatus) -> LifecycleError {
    LifecycleError::Conflict(format!("cannot move envelope from {from} to {to}"))
}

/// Random hex bearer token.
pub fn generate_token() -> LifecycleResult<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| LifecycleError::Internal("random generator failure".to_string()))?;
    Ok(hex::encode(bytes))
}

/// `{base}/sign?sessionId=..&token=..`
pub fn signing_link(base_url: &str, envelope_id: &str, token: &str) -> LifecycleResult<String> {
    let url = url::Url::parse_with_params(
        &format!("{}/sign", base_url.trim_end_matches('/')),
        &[("sessionId", envelope_id), ("token", token)],
    )
    .map_err(|e| LifecycleError::Internal(format!("invalid signing link base: {e}")))?;
    Ok(url.to_string())
}

pub struct EnvelopeLifecycle<'a> {
    db: &'a EnvelopeDb,
    events: &'a EventDispatcher,
}

impl<'a> EnvelopeLifecycle<'a> {
    pub fn new(db: &'a EnvelopeDb, events: &'a EventDispatcher) -> Self {
        Self { db, events }
    }

    fn repo(&self) -> EnvelopeRepository<'a> {
        EnvelopeRepository::new(self.db)
    }

    fn audit_transition(
        &self,
        envelope: &StoredEnvelope,
        from: EnvelopeStatus,
        actor: &Actor,
    ) {
        audit_log!(
            self.db,
            AuditEvent::new(AuditEventType::EnvelopeStatusChanged)
                .with_user(actor.id.clone())
                .with_resource("envelope", envelope.id.clone())
                .with_ip(actor.ip.clone())
                .with_details(json!({
                    "from": from,
                    "to": envelope.status,
                    "reason": envelope.status_reason,
                }))
        );
        info!(
            envelope_id = %envelope.id,
            from = %from,
            to = %envelope.status,
            "Envelope status changed"
        );
    }

    fn publish(&self, name: &str, data: serde_json::Value) {
        self.events.publish(DomainEvent::new(name, data));
    }

    /// Record new check results and run the workflow gate.
    ///
    /// Results arriving after the envelope has left `pending` /
    /// `verification_failed` are not recorded.
    pub fn record_verification(
        &self,
        id: &str,
        update: VerificationUpdate,
        actor: &Actor,
    ) -> LifecycleResult<VerificationOutcome> {
        if update.name.is_none() && update.face.is_none() {
            return Err(LifecycleError::Validation(
                "at least one of nameVerified or faceVerified is required".to_string(),
            ));
        }

        let current = self.repo().get(id)?;
        if !accepts_verification(current.status) {
            warn!(
                envelope_id = %id,
                status = %current.status,
                "Ignoring verification result for closed envelope"
            );
            return Ok(VerificationOutcome {
                previous: current.status,
                envelope: current,
                gate: None,
            });
        }

        let (previous, gate, envelope) = self.repo().update_with(id, |env| {
            let previous = env.status;
            if !accepts_verification(previous) {
                return Err(LifecycleError::Conflict(format!(
                    "envelope no longer accepts verification results (status: {previous})"
                )));
            }
            let workflow = Workflow::resolve(Some(&env.workflow_id)).ok_or_else(|| {
                LifecycleError::Validation(format!("unknown workflow {}", env.workflow_id))
            })?;

            if let Some(name) = update.name {
                env.checks.name_verified = Some(name.verified);
                env.checks.name_confidence = name.confidence;
            }
            if let Some(face) = update.face {
                env.checks.face_verified = Some(face.verified);
                env.checks.face_confidence = face.confidence;
            }

            let gate = workflow.evaluate(&env.checks);
            let next = match gate {
                GateOutcome::Passed => EnvelopeStatus::Verified,
                GateOutcome::Failed => EnvelopeStatus::VerificationFailed,
                GateOutcome::Undecided => previous,
            };
            if next != previous && !previous.can_transition_to(next) {
                return Err(transition_conflict(previous, next));
            }
            if next == EnvelopeStatus::Verified {
                env.checks.verified_at = Some(env.updated_at);
            }
            env.status = next;
            Ok((previous, gate, env.clone()))
        })?;

        self.publish(
            names::VERIFICATION_COMPLETED,
            json!({
                "envelopeId": envelope.id,
                "status": envelope.status,
                "checks": envelope.checks,
            }),
        );

        if envelope.status != previous {
            self.audit_transition(&envelope, previous, actor);
            let name = match envelope.status {
                EnvelopeStatus::Verified => names::ENVELOPE_VERIFIED,
                _ => names::ENVELOPE_VERIFICATION_FAILED,
            };
            self.publish(
                name,
                json!({ "envelopeId": envelope.id, "workflowId": envelope.workflow_id }),
            );
        }

        Ok(VerificationOutcome {
            envelope,
            previous,
            gate: Some(gate),
        })
    }

    /// `verified -> prepared`. Strict: any other status is a conflict.
    pub fn prepare(&self, id: &str, actor: &Actor) -> LifecycleResult<StoredEnvelope> {
        let envelope = self.repo().update_with(id, |env| {
            if env.status != EnvelopeStatus::Verified {
                return Err(LifecycleError::Conflict(format!(
                    "envelope must be verified to prepare (status: {})",
                    env.status
                )));
            }
            env.status = EnvelopeStatus::Prepared;
            Ok(env.clone())
        })?;

        self.audit_transition(&envelope, EnvelopeStatus::Verified, actor);
        self.publish(names::ENVELOPE_PREPARED, json!({ "envelopeId": envelope.id }));
        Ok(envelope)
    }

    /// Load the envelope, persisting `expired` if its deadline has passed.
    pub fn ensure_not_expired(&self, id: &str, actor: &Actor) -> LifecycleResult<StoredEnvelope> {
        let envelope = self.repo().get(id)?;
        if envelope.status == EnvelopeStatus::Expired {
            return Err(LifecycleError::Expired(id.to_string()));
        }
        if envelope.status.is_terminal() || !envelope.is_expired_at(Utc::now()) {
            return Ok(envelope);
        }

        let (previous, expired) = self.repo().update_with(id, |env| {
            let previous = env.status;
            if previous.can_transition_to(EnvelopeStatus::Expired) {
                env.status = EnvelopeStatus::Expired;
            }
            Ok::<_, LifecycleError>((previous, env.clone()))
        })?;

        if expired.status == EnvelopeStatus::Expired && previous != EnvelopeStatus::Expired {
            self.audit_transition(&expired, previous, actor);
            self.publish(
                names::ENVELOPE_EXPIRED,
                json!({ "envelopeId": id, "expiresAt": expired.expires_at }),
            );
        }
        Err(LifecycleError::Expired(id.to_string()))
    }

    /// Issue a signing token and build the link handed to the recipient.
    ///
    /// The token never outlives the envelope.
    pub fn issue_signing_link(
        &self,
        id: &str,
        base_url: &str,
        ttl: chrono::Duration,
        actor: &Actor,
    ) -> LifecycleResult<SigningLink> {
        let envelope = self.ensure_not_expired(id, actor)?;
        if !envelope.status.can_issue_signing_link() {
            return Err(LifecycleError::Conflict(format!(
                "signing link requires a verified or prepared envelope (status: {})",
                envelope.status
            )));
        }

        let now = Utc::now();
        let token = SigningToken {
            token: generate_token()?,
            envelope_id: id.to_string(),
            created_at: now,
            expires_at: (now + ttl).min(envelope.expires_at),
        };
        let link = signing_link(base_url, id, &token.token)?;
        self.repo().insert_token(&token)?;

        audit_log!(
            self.db,
            AuditEvent::new(AuditEventType::SigningLinkIssued)
                .with_user(actor.id.clone())
                .with_resource("envelope", id)
                .with_ip(actor.ip.clone())
                .with_details(json!({ "expiresAt": token.expires_at }))
        );
        self.publish(
            names::SIGNING_LINK_ISSUED,
            json!({ "envelopeId": id, "expiresAt": token.expires_at }),
        );

        Ok(SigningLink {
            link,
            token: token.token,
            expires_at: token.expires_at,
        })
    }

    /// Apply a caller-declared status, storing the signature in the same
    /// transaction when one is supplied.
    ///
    /// `completed` is accepted without checking placeholders; see
    /// [`Self::placeholder_completion`].
    pub fn submit_status(
        &self,
        id: &str,
        submission: StatusSubmission,
        actor: &Actor,
    ) -> LifecycleResult<StatusChange> {
        let target = submission.status;
        match target {
            EnvelopeStatus::Expired => {
                return Err(LifecycleError::Validation(
                    "expired is applied automatically and cannot be requested".to_string(),
                ))
            }
            EnvelopeStatus::Verified | EnvelopeStatus::VerificationFailed => {
                return Err(LifecycleError::Validation(format!(
                    "{target} is decided by verification results and cannot be requested"
                )))
            }
            _ => {}
        }
        if let Some(url) = &submission.signed_pdf_url {
            if url.starts_with(BLOB_URL_SCHEME) {
                return Err(LifecycleError::Validation(
                    "signedPdfUrl must point outside the document store".to_string(),
                ));
            }
        }
        if let Some(signature) = &submission.signature {
            if !signature.consent_given {
                return Err(LifecycleError::Validation(
                    "consentGiven must be true when submitting a signature".to_string(),
                ));
            }
            if signature.data.trim().is_empty() {
                return Err(LifecycleError::Validation(
                    "signatureData must not be empty".to_string(),
                ));
            }
        }

        self.ensure_not_expired(id, actor)?;

        let has_signature = submission.signature.is_some();
        let reason = submission.reason;
        let signed_pdf_url = submission.signed_pdf_url;
        let apply = |env: &mut StoredEnvelope| {
            let previous = env.status;
            if !previous.can_transition_to(target) {
                return Err(transition_conflict(previous, target));
            }
            if has_signature && !previous.accepts_signatures() {
                return Err(LifecycleError::Conflict(format!(
                    "envelope does not accept signatures (status: {previous})"
                )));
            }
            env.status = target;
            env.status_reason = reason;
            if signed_pdf_url.is_some() {
                env.signed_pdf_url = signed_pdf_url;
                env.signed_pdf_encryption = None;
            }
            Ok((previous, env.clone()))
        };

        let ((previous, envelope), signature) = match submission.signature {
            Some(new) => {
                let (change, stored) = self.repo().update_with_signature(id, new, apply)?;
                (change, Some(stored))
            }
            None => (self.repo().update_with(id, apply)?, None),
        };

        self.audit_transition(&envelope, previous, actor);
        if let Some(signature) = &signature {
            audit_log!(
                self.db,
                AuditEvent::new(AuditEventType::SignatureSubmitted)
                    .with_user(actor.id.clone())
                    .with_resource("signature", signature.id.clone())
                    .with_ip(actor.ip.clone())
                    .with_details(json!({
                        "envelopeId": id,
                        "signatureType": signature.signature_type,
                    }))
            );
        }

        self.publish(
            names::ENVELOPE_STATUS_CHANGED,
            json!({ "envelopeId": id, "from": previous, "to": envelope.status }),
        );
        if envelope.status == EnvelopeStatus::Completed {
            self.publish(
                names::ENVELOPE_COMPLETED,
                json!({ "envelopeId": id, "signedPdfUrl": envelope.signed_pdf_url }),
            );
        }

        Ok(StatusChange {
            envelope,
            previous,
            signature,
        })
    }

    pub fn placeholder_completion(&self, id: &str) -> LifecycleResult<PlaceholderCompletion> {
        let repo = self.repo();
        repo.get(id)?;
        let placeholders = repo.list_placeholders(id)?;

        let unsigned: Vec<String> = placeholders
            .iter()
            .filter(|p| !p.is_signed)
            .map(|p| p.id.clone())
            .collect();

        Ok(PlaceholderCompletion {
            envelope_id: id.to_string(),
            total: placeholders.len(),
            signed: placeholders.len() - unsigned.len(),
            complete: unsigned.is_empty(),
            unsigned_placeholder_ids: unsigned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::test_support::{seed_envelope, setup};
    use crate::storage::repository::{NewPlaceholder, SignatureType};
    use tokio::sync::mpsc;

    fn events() -> (EventDispatcher, mpsc::Receiver<DomainEvent>) {
        EventDispatcher::channel(64)
    }

    fn drain(rx: &mut mpsc::Receiver<DomainEvent>) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.event);
        }
        seen
    }

    fn actor() -> Actor {
        Actor::new("key_test", Some("203.0.113.7".into()))
    }

    fn both(name: bool, face: bool) -> VerificationUpdate {
        VerificationUpdate {
            name: Some(CheckResult::new(name, Some(0.9))),
            face: Some(CheckResult::new(face, Some(0.9))),
        }
    }

    fn expire_now(db: &EnvelopeDb, id: &str) {
        EnvelopeRepository::new(db)
            .update_with(id, |env| {
                env.expires_at = Utc::now() - chrono::Duration::minutes(1);
                Ok::<_, DbError>(())
            })
            .unwrap();
    }

    fn status_to(status: EnvelopeStatus) -> StatusSubmission {
        StatusSubmission {
            status,
            reason: None,
            signed_pdf_url: None,
            signature: None,
        }
    }

    #[test]
    fn passing_checks_verify_and_publish() {
        let (_temp, db) = setup();
        let (dispatcher, mut rx) = events();
        let env = seed_envelope(&db, EnvelopeStatus::Pending);
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);

        let outcome = lifecycle
            .record_verification(&env.id, both(true, true), &actor())
            .unwrap();
        assert!(outcome.changed());
        assert_eq!(outcome.envelope.status, EnvelopeStatus::Verified);
        assert!(outcome.envelope.checks.verified_at.is_some());
        assert_eq!(
            drain(&mut rx),
            vec!["verification.completed", "envelope.verified"]
        );
    }

    #[test]
    fn partial_results_keep_envelope_pending() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let env = seed_envelope(&db, EnvelopeStatus::Pending);
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);

        let outcome = lifecycle
            .record_verification(
                &env.id,
                VerificationUpdate {
                    name: Some(CheckResult::new(true, None)),
                    face: None,
                },
                &actor(),
            )
            .unwrap();
        assert_eq!(outcome.gate, Some(GateOutcome::Undecided));
        assert_eq!(outcome.envelope.status, EnvelopeStatus::Pending);
    }

    #[test]
    fn weak_confidence_fails_a_high_assurance_envelope() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let env = seed_envelope(&db, EnvelopeStatus::Pending);
        EnvelopeRepository::new(&db)
            .update_with(&env.id, |e| {
                e.workflow_id = "high_assurance".into();
                Ok::<_, DbError>(())
            })
            .unwrap();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);

        let weak = VerificationUpdate {
            name: Some(CheckResult::new(true, Some(0.95))),
            face: Some(CheckResult::new(true, Some(0.3))),
        };
        let outcome = lifecycle.record_verification(&env.id, weak, &actor()).unwrap();
        assert_eq!(outcome.gate, Some(GateOutcome::Failed));
        assert_eq!(outcome.envelope.status, EnvelopeStatus::VerificationFailed);
        assert!(outcome.envelope.checks.verified_at.is_none());

        let retried = lifecycle
            .record_verification(&env.id, both(true, true), &actor())
            .unwrap();
        assert_eq!(retried.envelope.status, EnvelopeStatus::Verified);
    }

    #[test]
    fn failed_check_can_be_retried() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let env = seed_envelope(&db, EnvelopeStatus::Pending);
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);

        let failed = lifecycle
            .record_verification(&env.id, both(true, false), &actor())
            .unwrap();
        assert_eq!(failed.envelope.status, EnvelopeStatus::VerificationFailed);

        let passed = lifecycle
            .record_verification(&env.id, both(true, true), &actor())
            .unwrap();
        assert_eq!(passed.envelope.status, EnvelopeStatus::Verified);
    }

    #[test]
    fn verification_after_completion_is_ignored() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let env = seed_envelope(&db, EnvelopeStatus::Completed);
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);

        let outcome = lifecycle
            .record_verification(&env.id, both(false, false), &actor())
            .unwrap();
        assert_eq!(outcome.gate, None);
        assert_eq!(outcome.envelope.status, EnvelopeStatus::Completed);
    }

    #[test]
    fn prepare_is_strict() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);

        let pending = seed_envelope(&db, EnvelopeStatus::Pending);
        assert!(matches!(
            lifecycle.prepare(&pending.id, &actor()),
            Err(LifecycleError::Conflict(_))
        ));

        let verified = seed_envelope(&db, EnvelopeStatus::Verified);
        let prepared = lifecycle.prepare(&verified.id, &actor()).unwrap();
        assert_eq!(prepared.status, EnvelopeStatus::Prepared);
        assert!(matches!(
            lifecycle.prepare(&verified.id, &actor()),
            Err(LifecycleError::Conflict(_))
        ));
    }

    #[test]
    fn signing_link_requires_verified_or_prepared() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let ttl = chrono::Duration::hours(24);

        let pending = seed_envelope(&db, EnvelopeStatus::Pending);
        assert!(matches!(
            lifecycle.issue_signing_link(&pending.id, "http://app.test", ttl, &actor()),
            Err(LifecycleError::Conflict(_))
        ));

        let verified = seed_envelope(&db, EnvelopeStatus::Verified);
        let link = lifecycle
            .issue_signing_link(&verified.id, "http://app.test/", ttl, &actor())
            .unwrap();
        assert_eq!(link.token.len(), TOKEN_BYTES * 2);
        assert_eq!(
            link.link,
            format!("http://app.test/sign?sessionId={}&token={}", verified.id, link.token)
        );

        let stored = EnvelopeRepository::new(&db)
            .find_token(&link.token)
            .unwrap()
            .unwrap();
        assert_eq!(stored.envelope_id, verified.id);
    }

    #[test]
    fn token_lifetime_is_capped_by_envelope_expiry() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);

        let link = lifecycle
            .issue_signing_link(&env.id, "http://app.test", chrono::Duration::days(30), &actor())
            .unwrap();
        assert_eq!(link.expires_at, env.expires_at);
    }

    #[test]
    fn expired_envelope_is_persisted_as_expired() {
        let (_temp, db) = setup();
        let (dispatcher, mut rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Verified);
        expire_now(&db, &env.id);

        let err = lifecycle
            .issue_signing_link(&env.id, "http://app.test", chrono::Duration::hours(1), &actor())
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Expired(_)));
        assert_eq!(
            EnvelopeRepository::new(&db).get(&env.id).unwrap().status,
            EnvelopeStatus::Expired
        );
        assert_eq!(drain(&mut rx), vec!["envelope.expired"]);

        // Second attempt reports expiry without another transition
        assert!(matches!(
            lifecycle.ensure_not_expired(&env.id, &actor()),
            Err(LifecycleError::Expired(_))
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn status_submission_follows_the_graph() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Pending);

        assert!(matches!(
            lifecycle.submit_status(&env.id, status_to(EnvelopeStatus::Completed), &actor()),
            Err(LifecycleError::Conflict(_))
        ));
        assert!(matches!(
            lifecycle.submit_status(&env.id, status_to(EnvelopeStatus::Expired), &actor()),
            Err(LifecycleError::Validation(_))
        ));

        let voided = lifecycle
            .submit_status(
                &env.id,
                StatusSubmission {
                    reason: Some("duplicate".into()),
                    ..status_to(EnvelopeStatus::Voided)
                },
                &actor(),
            )
            .unwrap();
        assert_eq!(voided.previous, EnvelopeStatus::Pending);
        assert_eq!(voided.envelope.status_reason.as_deref(), Some("duplicate"));
    }

    #[test]
    fn verification_statuses_cannot_be_requested() {
        let (_temp, db) = setup();
        let (dispatcher, mut rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Pending);

        for target in [EnvelopeStatus::Verified, EnvelopeStatus::VerificationFailed] {
            assert!(matches!(
                lifecycle.submit_status(&env.id, status_to(target), &actor()),
                Err(LifecycleError::Validation(_))
            ));
        }
        let stored = EnvelopeRepository::new(&db).get(&env.id).unwrap();
        assert_eq!(stored.status, EnvelopeStatus::Pending);
        assert!(stored.checks.verified_at.is_none());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn store_urls_cannot_be_supplied_as_signed_pdf() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);

        let err = lifecycle
            .submit_status(
                &env.id,
                StatusSubmission {
                    signed_pdf_url: Some("blob://documents/other-envelope.pdf".into()),
                    ..status_to(EnvelopeStatus::Completed)
                },
                &actor(),
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let stored = EnvelopeRepository::new(&db).get(&env.id).unwrap();
        assert_eq!(stored.status, EnvelopeStatus::Prepared);
        assert!(stored.signed_pdf_url.is_none());
    }

    #[test]
    fn signature_without_consent_is_rejected_and_not_stored() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);

        let err = lifecycle
            .submit_status(
                &env.id,
                StatusSubmission {
                    signature: Some(NewSignature {
                        signature_type: SignatureType::Drawn,
                        data: "data:image/png;base64,AAAA".into(),
                        consent_given: false,
                        ip_address: None,
                    }),
                    ..status_to(EnvelopeStatus::Completed)
                },
                &actor(),
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Validation(_)));

        let repo = EnvelopeRepository::new(&db);
        assert!(repo.list_signatures(&env.id).unwrap().is_empty());
        assert_eq!(repo.get(&env.id).unwrap().status, EnvelopeStatus::Prepared);
    }

    #[test]
    fn completion_with_signature_stores_it_and_publishes() {
        let (_temp, db) = setup();
        let (dispatcher, mut rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);

        let change = lifecycle
            .submit_status(
                &env.id,
                StatusSubmission {
                    signature: Some(NewSignature {
                        signature_type: SignatureType::Uploaded,
                        data: "data:image/png;base64,AAAA".into(),
                        consent_given: true,
                        ip_address: Some("203.0.113.7".into()),
                    }),
                    signed_pdf_url: Some("https://files.example.com/x.pdf".into()),
                    ..status_to(EnvelopeStatus::Completed)
                },
                &actor(),
            )
            .unwrap();

        let signature = change.signature.unwrap();
        let repo = EnvelopeRepository::new(&db);
        assert!(repo.verify_signature_integrity(&signature.id).unwrap());
        assert_eq!(
            change.envelope.signed_pdf_url.as_deref(),
            Some("https://files.example.com/x.pdf")
        );
        assert_eq!(
            drain(&mut rx),
            vec!["envelope.status_changed", "envelope.completed"]
        );
    }

    #[test]
    fn placeholder_completion_is_advisory() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        let env = seed_envelope(&db, EnvelopeStatus::Prepared);
        let repo = EnvelopeRepository::new(&db);

        let mut ids = Vec::new();
        for x in [0.1, 0.6] {
            let p = repo
                .add_placeholder(
                    &env.id,
                    &NewPlaceholder {
                        page_number: 1,
                        x,
                        y: 0.8,
                        width: 0.2,
                        height: 0.05,
                    },
                )
                .unwrap();
            ids.push(p.id);
        }
        repo.mark_placeholder_signed(&env.id, &ids[0]).unwrap();

        let completion = lifecycle.placeholder_completion(&env.id).unwrap();
        assert_eq!(completion.total, 2);
        assert_eq!(completion.signed, 1);
        assert!(!completion.complete);
        assert_eq!(completion.unsigned_placeholder_ids, vec![ids[1].clone()]);

        // Completion is still accepted
        let change = lifecycle
            .submit_status(&env.id, status_to(EnvelopeStatus::Completed), &actor())
            .unwrap();
        assert_eq!(change.envelope.status, EnvelopeStatus::Completed);
    }

    #[test]
    fn missing_envelope_is_not_found() {
        let (_temp, db) = setup();
        let (dispatcher, _rx) = events();
        let lifecycle = EnvelopeLifecycle::new(&db, &dispatcher);
        assert!(matches!(
            lifecycle.prepare("nope", &actor()),
            Err(LifecycleError::NotFound(_))
        ));
    }
}
