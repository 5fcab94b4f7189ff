// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{ApiKeyAuth, AuthError, ClientIp, SigningAccess},
    envelope::{
        Actor, CheckResult, EnvelopeStatus, GateOutcome, PlaceholderCompletion, SigningLink,
        StatusSubmission, VerificationUpdate,
    },
    error::ApiError,
    state::AppState,
    storage::{
        object_store::BLOB_URL_SCHEME,
        repository::{NewSignature, SignatureType, StoredSignature, VerificationChecks},
        EnvelopeRepository, StoredEnvelope,
    },
};

/// Statuses a recipient holding a signing token may request.
const TOKEN_REQUESTABLE: [EnvelopeStatus; 3] = [
    EnvelopeStatus::Completed,
    EnvelopeStatus::SigningDeclined,
    EnvelopeStatus::SigningDeferred,
];

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub name_verified: Option<bool>,
    pub face_verified: Option<bool>,
    /// Confidence in [0, 1] for the name result.
    pub name_confidence: Option<f64>,
    pub face_confidence: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub envelope_id: String,
    pub status: EnvelopeStatus,
    pub previous_status: EnvelopeStatus,
    pub changed: bool,
    pub checks: VerificationChecks,
    /// `passed`, `failed`, `undecided`, or `ignored` when the envelope no
    /// longer accepts results.
    #[schema(value_type = String)]
    pub gate: &'static str,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub status: String,
    pub signature_type: Option<SignatureType>,
    /// Signature image as a data URL.
    pub signature_data: Option<String>,
    pub consent_given: Option<bool>,
    pub reason: Option<String>,
    pub signed_pdf_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub envelope: StoredEnvelope,
    pub previous_status: EnvelopeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<StoredSignature>,
}

fn gate_label(gate: Option<GateOutcome>) -> &'static str {
    match gate {
        Some(GateOutcome::Passed) => "passed",
        Some(GateOutcome::Failed) => "failed",
        Some(GateOutcome::Undecided) => "undecided",
        None => "ignored",
    }
}

fn check_confidence(name: &str, value: Option<f64>) -> Result<(), ApiError> {
    match value {
        Some(c) if !(0.0..=1.0).contains(&c) => Err(ApiError::bad_request(format!(
            "{name} must be within [0, 1]"
        ))),
        _ => Ok(()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Record identity check results and run the workflow gate.
///
/// Results for an envelope that has already left `pending` /
/// `verification_failed` are acknowledged but not recorded.
#[utoipa::path(
    post,
    path = "/envelope/{id}/verify",
    tag = "Envelopes",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Envelope id")),
    request_body = VerifyRequest,
    responses(
        (status = 200, description = "Results recorded", body = VerifyResponse),
        (status = 400, description = "No result supplied"),
        (status = 404, description = "Envelope not found")
    )
)]
pub async fn verify_envelope(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    check_confidence("nameConfidence", req.name_confidence)?;
    check_confidence("faceConfidence", req.face_confidence)?;

    let update = VerificationUpdate {
        name: req
            .name_verified
            .map(|v| CheckResult::new(v, req.name_confidence)),
        face: req
            .face_verified
            .map(|v| CheckResult::new(v, req.face_confidence)),
    };
    let actor = Actor::new(principal.key_id, ip);
    let outcome = state.lifecycle().record_verification(&id, update, &actor)?;

    Ok(Json(VerifyResponse {
        changed: outcome.changed(),
        gate: gate_label(outcome.gate),
        envelope_id: outcome.envelope.id,
        status: outcome.envelope.status,
        previous_status: outcome.previous,
        checks: outcome.envelope.checks,
    }))
}

/// Issue a signing link for a verified or prepared envelope.
#[utoipa::path(
    get,
    path = "/envelope/{id}/signing-link",
    tag = "Envelopes",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Envelope id")),
    responses(
        (status = 200, description = "Signing link issued", body = SigningLink),
        (status = 403, description = "Envelope not verified, or expired"),
        (status = 404, description = "Envelope not found")
    )
)]
pub async fn get_signing_link(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Json<SigningLink>, ApiError> {
    let actor = Actor::new(principal.key_id, ip);
    let link = state.lifecycle().issue_signing_link(
        &id,
        &state.settings.app_base_url,
        state.settings.signing_link_ttl,
        &actor,
    )?;
    Ok(Json(link))
}

/// Apply a caller-declared status, optionally with a signature.
///
/// Signing tokens may only request `completed`, `signing_declined` or
/// `signing_deferred`. `completed` does not require every placeholder to
/// be signed; see `/placeholders/validation`.
#[utoipa::path(
    post,
    path = "/envelope/{id}/status",
    tag = "Envelopes",
    security(("api_key" = []), ("signing_token" = [])),
    params(("id" = String, Path, description = "Envelope id")),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status applied", body = StatusResponse),
        (status = 400, description = "Invalid status or signature"),
        (status = 403, description = "Transition not allowed"),
        (status = 404, description = "Envelope not found")
    )
)]
pub async fn update_status(
    State(state): State<AppState>,
    access: SigningAccess,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    access.authorize(&id)?;
    let status: EnvelopeStatus = req
        .status
        .parse()
        .map_err(|e: crate::envelope::status::UnknownStatus| ApiError::bad_request(e.to_string()))?;
    if access.scoped_envelope().is_some() && !TOKEN_REQUESTABLE.contains(&status) {
        return Err(AuthError::TokenScopeMismatch.into());
    }

    let signature = req.signature_data.map(|data| NewSignature {
        signature_type: req.signature_type.unwrap_or(SignatureType::Drawn),
        data,
        consent_given: req.consent_given.unwrap_or(false),
        ip_address: ip.clone(),
    });
    let submission = StatusSubmission {
        status,
        reason: req.reason,
        signed_pdf_url: req.signed_pdf_url,
        signature,
    };

    let actor = Actor::new(access.actor_id(), ip);
    let change = state.lifecycle().submit_status(&id, submission, &actor)?;
    Ok(Json(StatusResponse {
        envelope: change.envelope,
        previous_status: change.previous,
        signature: change.signature,
    }))
}

/// Move a verified envelope to `prepared`.
#[utoipa::path(
    post,
    path = "/envelope/{id}/prepare",
    tag = "Envelopes",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Envelope id")),
    responses(
        (status = 200, description = "Envelope prepared", body = StoredEnvelope),
        (status = 403, description = "Envelope is not verified"),
        (status = 404, description = "Envelope not found")
    )
)]
pub async fn prepare_envelope(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Json<StoredEnvelope>, ApiError> {
    let actor = Actor::new(principal.key_id, ip);
    Ok(Json(state.lifecycle().prepare(&id, &actor)?))
}

/// Report which placeholders are still unsigned. Advisory only.
#[utoipa::path(
    get,
    path = "/envelope/{id}/placeholders/validation",
    tag = "Envelopes",
    security(("api_key" = []), ("signing_token" = [])),
    params(("id" = String, Path, description = "Envelope id")),
    responses(
        (status = 200, description = "Placeholder completion", body = PlaceholderCompletion),
        (status = 404, description = "Envelope not found")
    )
)]
pub async fn validate_placeholders(
    State(state): State<AppState>,
    access: SigningAccess,
    Path(id): Path<String>,
) -> Result<Json<PlaceholderCompletion>, ApiError> {
    access.authorize(&id)?;
    Ok(Json(state.lifecycle().placeholder_completion(&id)?))
}

/// Download the signed PDF stored for an envelope.
#[utoipa::path(
    get,
    path = "/envelope/{id}/signed-pdf",
    tag = "Envelopes",
    security(("api_key" = []), ("signing_token" = [])),
    params(("id" = String, Path, description = "Envelope id")),
    responses(
        (status = 200, description = "Signed PDF", content_type = "application/pdf"),
        (status = 404, description = "Envelope or signed PDF not found")
    )
)]
pub async fn download_signed_pdf(
    State(state): State<AppState>,
    access: SigningAccess,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    access.authorize(&id)?;
    let envelope = EnvelopeRepository::new(&state.db).get(&id)?;
    let url = envelope
        .signed_pdf_url
        .as_deref()
        .ok_or_else(|| ApiError::not_found(format!("Envelope {id} has no signed PDF")))?;
    if !url.starts_with(BLOB_URL_SCHEME) {
        return Err(ApiError::not_found(format!(
            "Signed PDF for envelope {id} is held externally at {url}"
        )));
    }
    let bytes = state
        .vault
        .retrieve(url, envelope.signed_pdf_encryption.as_ref())?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}-signed.pdf\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
