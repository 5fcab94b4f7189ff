// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Document signing against an envelope.
//!
//! Wraps the pure [`PdfSigner`] with the envelope side: status and expiry
//! checks, placeholder bookkeeping, evidence retrieval from the latest face
//! attempt and custody of the signed output. Without an envelope the PDF is
//! signed standalone and nothing is persisted.

use serde_json::json;
use tracing::{info, warn};

use super::lifecycle::{Actor, EnvelopeLifecycle, LifecycleError};
use crate::audit_log;
use crate::events::{names, DomainEvent, EventDispatcher};
use crate::pdf::{PdfError, PdfSigner, SignatureBatch, SignedPdf};
use crate::storage::repository::EnvelopeRepository;
use crate::storage::{
    prefixes, AuditEvent, AuditEventType, DocumentVault, EnvelopeDb, VaultError,
};

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Pdf(#[from] PdfError),

    #[error(transparent)]
    Vault(#[from] VaultError),
}

/// Borrowed services the signing flow needs.
#[derive(Clone, Copy)]
pub struct SigningServices<'a> {
    pub db: &'a EnvelopeDb,
    pub vault: &'a DocumentVault,
    pub events: &'a EventDispatcher,
}

#[derive(Debug, Clone)]
pub struct SignedDocument {
    pub pdf: SignedPdf,
    /// Vault URL of the stored copy, when signed against an envelope.
    pub stored_url: Option<String>,
}

/// Latest face attempt's ID image, decrypted. Best-effort.
fn evidence_image(
    services: &SigningServices<'_>,
    envelope_id: &str,
) -> Option<Vec<u8>> {
    let attempt = match EnvelopeRepository::new(services.db).latest_face_attempt(envelope_id) {
        Ok(Some(attempt)) => attempt,
        Ok(None) => return None,
        Err(e) => {
            warn!(envelope_id, error = %e, "Failed to load face attempts for evidence page");
            return None;
        }
    };

    match services
        .vault
        .retrieve(&attempt.document_url, attempt.document_encryption.as_ref())
    {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(
                envelope_id,
                attempt_id = %attempt.id,
                error = %e,
                "Failed to retrieve evidence image"
            );
            None
        }
    }
}

pub fn sign_document(
    services: &SigningServices<'_>,
    pdf: &[u8],
    batch: &SignatureBatch,
    envelope_id: Option<&str>,
    actor: &Actor,
) -> Result<SignedDocument, SigningError> {
    let lifecycle = EnvelopeLifecycle::new(services.db, services.events);

    if let Some(id) = envelope_id {
        let envelope = lifecycle.ensure_not_expired(id, actor)?;
        if !envelope.status.accepts_signatures() {
            return Err(LifecycleError::Conflict(format!(
                "envelope does not accept signatures (status: {})",
                envelope.status
            ))
            .into());
        }
    }

    let evidence = envelope_id.and_then(|id| evidence_image(services, id));
    let signed = PdfSigner.sign_batch(pdf, batch, evidence.as_deref())?;

    let Some(id) = envelope_id else {
        audit_log!(
            services.db,
            AuditEvent::new(AuditEventType::DocumentSigned)
                .with_user(actor.id.clone())
                .with_ip(actor.ip.clone())
                .with_details(json!({ "applied": signed.applied, "standalone": true }))
        );
        return Ok(SignedDocument {
            pdf: signed,
            stored_url: None,
        });
    };

    // Only placements that made it onto the page count as signed
    let repo = EnvelopeRepository::new(services.db);
    let skipped: Vec<usize> = signed.skipped.iter().map(|s| s.index).collect();
    for (index, entry) in batch.entries() {
        let Some(placeholder_id) = entry.placeholder_id.as_deref() else {
            continue;
        };
        if skipped.contains(&index) {
            continue;
        }
        if let Err(e) = repo.mark_placeholder_signed(id, placeholder_id) {
            warn!(
                envelope_id = id,
                placeholder_id,
                error = %e,
                "Failed to mark placeholder signed"
            );
        }
    }

    let blob = services
        .vault
        .store(prefixes::SIGNED, &format!("{id}.pdf"), &signed.bytes)?;
    let replaced = repo.update_with(id, |env| {
        let previous = env.signed_pdf_url.replace(blob.url.clone());
        env.signed_pdf_encryption = blob.encryption.clone();
        Ok::<_, LifecycleError>(previous)
    });
    let replaced = match replaced {
        Ok(previous) => previous,
        Err(e) => {
            services.vault.delete_all([blob.url.as_str()]);
            return Err(e.into());
        }
    };
    if let Some(old) = replaced.filter(|u| u.starts_with(crate::storage::object_store::BLOB_URL_SCHEME)) {
        services.vault.delete_all([old.as_str()]);
    }

    audit_log!(
        services.db,
        AuditEvent::new(AuditEventType::DocumentSigned)
            .with_user(actor.id.clone())
            .with_resource("envelope", id)
            .with_ip(actor.ip.clone())
            .with_details(json!({
                "applied": signed.applied,
                "skipped": signed.skipped.len(),
                "evidencePageAppended": signed.evidence_page_appended,
            }))
    );
    services.events.publish(DomainEvent::new(
        names::DOCUMENT_SIGNED,
        json!({
            "envelopeId": id,
            "applied": signed.applied,
            "skipped": signed.skipped.len(),
            "evidencePageAppended": signed.evidence_page_appended,
        }),
    ));
    info!(
        envelope_id = id,
        applied = signed.applied,
        skipped = signed.skipped.len(),
        "Document signed"
    );

    Ok(SignedDocument {
        pdf: signed,
        stored_url: Some(blob.url),
    })
}
