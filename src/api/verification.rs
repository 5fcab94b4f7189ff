// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity verification endpoints backed by the vision model.
//!
//! Both endpoints take multipart images. When an envelope is named, the
//! verdict is recorded against it and the workflow gate runs.

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;

use super::upload::UploadForm;
use crate::{
    audit_log,
    auth::{ApiKeyAuth, ClientIp},
    envelope::{Actor, CheckResult, EnvelopeStatus, VerificationUpdate},
    error::ApiError,
    state::AppState,
    storage::{
        prefixes,
        repository::FaceVerificationAttempt,
        AuditEvent, AuditEventType, EnvelopeRepository, SessionRepository,
    },
    verification::{DocumentNameVerdict, FaceVerdict, ImageInput, VerificationClient},
};

/// Multipart body of `POST /verify/document-name`.
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct DocumentNameForm {
    /// Image of the identity document.
    #[schema(value_type = String, format = Binary)]
    pub document: Vec<u8>,
    /// Defaults to the envelope recipient's name.
    pub claimed_name: Option<String>,
    pub envelope_id: Option<String>,
}

/// Multipart body of `POST /verify/face`.
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct FaceForm {
    #[schema(value_type = String, format = Binary)]
    pub selfie: Vec<u8>,
    #[schema(value_type = String, format = Binary)]
    pub document: Vec<u8>,
    pub envelope_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNameResponse {
    #[serde(flatten)]
    pub verdict: DocumentNameVerdict,
    pub claimed_name: String,
    /// Envelope status after the result was recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope_status: Option<EnvelopeStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FaceResponse {
    #[serde(flatten)]
    pub verdict: FaceVerdict,
    pub attempt_id: String,
    pub envelope_status: EnvelopeStatus,
}

fn verifier(state: &AppState) -> Result<Arc<VerificationClient>, ApiError> {
    state
        .verifier
        .clone()
        .ok_or_else(|| ApiError::unavailable("identity verification is not configured"))
}

/// Read the name on an identity document and compare it with the claimed
/// name.
#[utoipa::path(
    post,
    path = "/verify/document-name",
    tag = "Verification",
    security(("api_key" = [])),
    request_body(content = DocumentNameForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Verdict", body = DocumentNameResponse),
        (status = 400, description = "Invalid form"),
        (status = 502, description = "Vision reply unreadable"),
        (status = 503, description = "Verification not configured")
    )
)]
pub async fn verify_document_name(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    multipart: Multipart,
) -> Result<Json<DocumentNameResponse>, ApiError> {
    let verifier = verifier(&state)?;
    let mut form = UploadForm::read(multipart).await?;
    let document = form.require_file("document")?;
    let envelope_id = form.text("envelopeId")?;

    let claimed_name = match (form.text("claimedName")?, envelope_id.as_deref()) {
        (Some(name), Some(id)) => {
            EnvelopeRepository::new(&state.db).get(id)?;
            name
        }
        (Some(name), None) => name,
        (None, Some(id)) => SessionRepository::new(&state.db).get_session(id)?.recipient.name,
        (None, None) => {
            return Err(ApiError::bad_request(
                "claimedName is required when no envelopeId is given",
            ))
        }
    };

    let image = ImageInput {
        bytes: &document.bytes,
        content_type: &document.content_type,
    };
    let result = verifier.verify_document_name(image, &claimed_name).await;

    let audit = AuditEvent::new(AuditEventType::DocumentNameVerified)
        .with_user(principal.key_id.clone())
        .with_ip(ip.clone());
    let audit = match &envelope_id {
        Some(id) => audit.with_resource("envelope", id.clone()),
        None => audit,
    };
    let verdict = match result {
        Ok(verdict) => {
            audit_log!(
                &state.db,
                audit.with_details(json!({
                    "nameVerified": verdict.name_verified,
                    "confidence": verdict.confidence,
                    "localNameMatch": verdict.local_name_match,
                }))
            );
            verdict
        }
        Err(e) => {
            audit_log!(&state.db, audit.failed(e.to_string()));
            return Err(e.into());
        }
    };

    let envelope_status = match envelope_id {
        Some(id) => {
            let update = VerificationUpdate {
                name: Some(CheckResult::new(verdict.name_verified, verdict.confidence)),
                face: None,
            };
            let actor = Actor::new(principal.key_id, ip);
            let outcome = state.lifecycle().record_verification(&id, update, &actor)?;
            Some(outcome.envelope.status)
        }
        None => None,
    };

    Ok(Json(DocumentNameResponse {
        verdict,
        claimed_name,
        envelope_status,
    }))
}

/// Compare a selfie with the photo on an identity document.
///
/// Both images are kept (encrypted) with the attempt, whether or not the
/// vision call succeeds. The latest attempt's document image becomes the
/// evidence page of the signed PDF.
#[utoipa::path(
    post,
    path = "/verify/face",
    tag = "Verification",
    security(("api_key" = [])),
    request_body(content = FaceForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Verdict", body = FaceResponse),
        (status = 400, description = "Invalid form"),
        (status = 404, description = "Envelope not found"),
        (status = 502, description = "Vision reply unreadable"),
        (status = 503, description = "Verification not configured")
    )
)]
pub async fn verify_face(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    multipart: Multipart,
) -> Result<Json<FaceResponse>, ApiError> {
    let verifier = verifier(&state)?;
    let mut form = UploadForm::read(multipart).await?;
    let envelope_id = form.require_text("envelopeId")?;
    let selfie = form.require_file("selfie")?;
    let document = form.require_file("document")?;
    EnvelopeRepository::new(&state.db).get(&envelope_id)?;

    let selfie_blob = state
        .vault
        .store(prefixes::VERIFICATION, &selfie.filename, &selfie.bytes)?;
    let document_blob = state
        .vault
        .store(prefixes::VERIFICATION, &document.filename, &document.bytes)
        .inspect_err(|_| {
            state.vault.delete_all([selfie_blob.url.as_str()]);
        })?;

    let result = verifier
        .verify_face(
            ImageInput {
                bytes: &selfie.bytes,
                content_type: &selfie.content_type,
            },
            ImageInput {
                bytes: &document.bytes,
                content_type: &document.content_type,
            },
        )
        .await;

    let attempt = FaceVerificationAttempt {
        id: uuid::Uuid::new_v4().to_string(),
        envelope_id: envelope_id.clone(),
        selfie_url: selfie_blob.url,
        selfie_encryption: selfie_blob.encryption,
        document_url: document_blob.url,
        document_encryption: document_blob.encryption,
        face_verified: result.as_ref().is_ok_and(|v| v.face_verified),
        confidence: result.as_ref().ok().and_then(|v| v.confidence),
        reason: result.as_ref().ok().and_then(|v| v.reason.clone()),
        error: result.as_ref().err().map(ToString::to_string),
        attempted_at: Utc::now(),
    };
    EnvelopeRepository::new(&state.db)
        .record_face_attempt(&attempt)
        .inspect_err(|_| {
            state
                .vault
                .delete_all([attempt.selfie_url.as_str(), attempt.document_url.as_str()]);
        })?;

    let audit = AuditEvent::new(AuditEventType::FaceVerificationAttempted)
        .with_user(principal.key_id.clone())
        .with_resource("envelope", envelope_id.clone())
        .with_ip(ip.clone())
        .with_details(json!({
            "attemptId": attempt.id,
            "faceVerified": attempt.face_verified,
            "confidence": attempt.confidence,
        }));
    let verdict = match result {
        Ok(verdict) => {
            audit_log!(&state.db, audit);
            verdict
        }
        Err(e) => {
            warn!(envelope_id = %envelope_id, attempt_id = %attempt.id, error = %e, "Face verification failed");
            audit_log!(&state.db, audit.failed(e.to_string()));
            return Err(e.into());
        }
    };

    let update = VerificationUpdate {
        name: None,
        face: Some(CheckResult::new(verdict.face_verified, verdict.confidence)),
    };
    let actor = Actor::new(principal.key_id, ip);
    let outcome = state
        .lifecycle()
        .record_verification(&envelope_id, update, &actor)?;
    info!(
        envelope_id = %envelope_id,
        face_verified = verdict.face_verified,
        status = %outcome.envelope.status,
        "Face verification recorded"
    );

    Ok(Json(FaceResponse {
        verdict,
        attempt_id: attempt.id,
        envelope_status: outcome.envelope.status,
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::StatusCode;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::api::test_support::{multipart_request, TestApp};
    use crate::api::upload::fixtures::FormPart;
    use crate::config::VisionConfig;
    use crate::envelope::EnvelopeStatus;
    use crate::storage::repository::test_support::seed_envelope;
    use crate::storage::EnvelopeRepository;
    use crate::verification::VerificationClient;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nimage";

    async fn vision_replying(content: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": content } }]
            })))
            .mount(&server)
            .await;
        server
    }

    fn app_with_vision(server: &MockServer) -> TestApp {
        let client = VerificationClient::new(&VisionConfig {
            api_key: "sk-test".into(),
            base_url: server.uri(),
            model: "vision-test".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();
        TestApp::with_verifier(client)
    }

    fn image_part<'a>(name: &'a str) -> FormPart<'a> {
        FormPart::File {
            name,
            filename: "capture.png",
            content_type: "image/png",
            bytes: PNG,
        }
    }

    #[tokio::test]
    async fn face_match_records_attempt_and_updates_envelope() {
        let server = vision_replying(r#"{"face_verified": true, "confidence": 92, "reason": "same"}"#).await;
        let app = app_with_vision(&server);
        let env = seed_envelope(&app.state.db, EnvelopeStatus::Pending);

        let form = [
            FormPart::Text("envelopeId", &env.id),
            image_part("selfie"),
            image_part("document"),
        ];
        let (status, body) = app
            .send_json(multipart_request(&app.api_key, "/verify/face", &form))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["faceVerified"], true);
        assert_eq!(body["confidence"], 0.92);
        // Standard workflow still waits for the name check
        assert_eq!(body["envelopeStatus"], "pending");

        let attempt = EnvelopeRepository::new(&app.state.db)
            .latest_face_attempt(&env.id)
            .unwrap()
            .unwrap();
        assert!(attempt.face_verified);
        assert!(attempt.document_encryption.is_some());
        assert_eq!(app.blob_count("verification"), 2);
    }

    #[tokio::test]
    async fn unreadable_face_verdict_is_recorded_as_failed_attempt() {
        let server = vision_replying("I think they match.").await;
        let app = app_with_vision(&server);
        let env = seed_envelope(&app.state.db, EnvelopeStatus::Pending);

        let form = [
            FormPart::Text("envelopeId", &env.id),
            image_part("selfie"),
            image_part("document"),
        ];
        let (status, body) = app
            .send_json(multipart_request(&app.api_key, "/verify/face", &form))
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error_code"], "upstream_error");

        let attempt = EnvelopeRepository::new(&app.state.db)
            .latest_face_attempt(&env.id)
            .unwrap()
            .unwrap();
        assert!(!attempt.face_verified);
        assert!(attempt.error.is_some());

        let envelope = EnvelopeRepository::new(&app.state.db).get(&env.id).unwrap();
        assert_eq!(envelope.checks.face_verified, None);
    }

    #[tokio::test]
    async fn document_name_defaults_to_recipient_and_records_result() {
        let server = vision_replying(
            r#"{"name_verified": true, "confidence": 0.9, "extracted_name": "ANA MARIA", "document_type": "passport"}"#,
        )
        .await;
        let app = app_with_vision(&server);
        let session_id = app.create_session("Ana María").await;

        let form = [FormPart::Text("envelopeId", &session_id), image_part("document")];
        let (status, body) = app
            .send_json(multipart_request(&app.api_key, "/verify/document-name", &form))
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["claimedName"], "Ana María");
        assert_eq!(body["nameVerified"], true);
        assert_eq!(body["localNameMatch"], true);
        assert_eq!(body["envelopeStatus"], "pending");

        let envelope = EnvelopeRepository::new(&app.state.db).get(&session_id).unwrap();
        assert_eq!(envelope.checks.name_verified, Some(true));
    }

    #[tokio::test]
    async fn verification_disabled_without_backend() {
        let app = TestApp::new();
        let form = [FormPart::Text("claimedName", "Ana"), image_part("document")];
        let (status, body) = app
            .send_json(multipart_request(&app.api_key, "/verify/document-name", &form))
            .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error_code"], "upstream_error");
    }

    #[tokio::test]
    async fn face_requires_existing_envelope() {
        let server = vision_replying(r#"{"face_verified": true}"#).await;
        let app = app_with_vision(&server);
        let form = [
            FormPart::Text("envelopeId", "missing"),
            image_part("selfie"),
            image_part("document"),
        ];
        let (status, _) = app
            .send_json(multipart_request(&app.api_key, "/verify/face", &form))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.blob_count("verification"), 0);
    }
}
