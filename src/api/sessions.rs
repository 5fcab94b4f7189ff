// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing session endpoints.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use super::upload::UploadForm;
use crate::{
    audit_log,
    auth::{ApiKeyAuth, ClientIp, SigningAccess},
    envelope::Workflow,
    error::ApiError,
    events::{names, DomainEvent},
    state::AppState,
    storage::{
        prefixes,
        repository::{
            NewDocument, NewPlaceholder, NewSession, SessionSnapshot, SignaturePlaceholder,
            StoredDocument,
        },
        AuditEvent, AuditEventType, SessionRepository,
    },
};

/// Multipart body of `POST /signing-session`.
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct CreateSessionForm {
    pub recipient_name: String,
    pub recipient_email: String,
    /// `standard` (default), `document_only`, `face_only` or `high_assurance`.
    pub workflow_id: Option<String>,
    /// JSON array of `{pageNumber, x, y, width, height}`.
    pub signature_placeholders: Option<String>,
    /// One or more files, sent as `documents` or `documents[]`.
    #[schema(value_type = Vec<String>, format = Binary)]
    pub documents: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInfo {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub download_url: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<StoredDocument> for DocumentInfo {
    fn from(doc: StoredDocument) -> Self {
        Self {
            download_url: download_path(&doc.id),
            id: doc.id,
            filename: doc.filename,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            uploaded_at: doc.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub recipient_id: String,
    pub document_urls: Vec<String>,
    pub documents: Vec<DocumentInfo>,
    pub expires_at: DateTime<Utc>,
    pub workflow: Workflow,
    pub placeholders: Vec<SignaturePlaceholder>,
}

fn download_path(document_id: &str) -> String {
    format!("/document/{document_id}/download")
}

fn parse_placeholders(raw: Option<String>) -> Result<Vec<NewPlaceholder>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    let placeholders: Vec<NewPlaceholder> = serde_json::from_str(&raw)
        .map_err(|e| ApiError::bad_request(format!("signaturePlaceholders is not valid JSON: {e}")))?;
    for (index, placeholder) in placeholders.iter().enumerate() {
        placeholder
            .validate()
            .map_err(|e| ApiError::bad_request(format!("signaturePlaceholders[{index}]: {e}")))?;
    }
    Ok(placeholders)
}

/// Create a signing session.
///
/// Uploads the documents (encrypted), then writes recipient, documents,
/// envelope and placeholders in one transaction. Uploaded blobs are removed
/// again if any step fails.
#[utoipa::path(
    post,
    path = "/signing-session",
    tag = "Sessions",
    security(("api_key" = [])),
    request_body(content = CreateSessionForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid form"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_signing_session(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let mut form = UploadForm::read(multipart).await?;

    let recipient_name = form.require_text("recipientName")?;
    let recipient_email = form.require_text("recipientEmail")?;
    if !recipient_email.contains('@') {
        return Err(ApiError::bad_request("recipientEmail is not an email address"));
    }
    let workflow_id = form.text("workflowId")?;
    let workflow = Workflow::resolve(workflow_id.as_deref()).ok_or_else(|| {
        ApiError::bad_request(format!(
            "unknown workflowId: {}",
            workflow_id.as_deref().unwrap_or_default()
        ))
    })?;
    let placeholders = parse_placeholders(form.text("signaturePlaceholders")?)?;

    let files = form.files("documents");
    if files.is_empty() {
        return Err(ApiError::bad_request("at least one document is required"));
    }

    let mut documents = Vec::with_capacity(files.len());
    for file in &files {
        match state
            .vault
            .store(prefixes::DOCUMENTS, &file.filename, &file.bytes)
        {
            Ok(blob) => documents.push(NewDocument {
                filename: file.filename.clone(),
                content_type: file.content_type.clone(),
                size_bytes: file.bytes.len() as u64,
                blob,
            }),
            Err(e) => {
                state
                    .vault
                    .delete_all(documents.iter().map(|d: &NewDocument| d.blob.url.as_str()));
                return Err(e.into());
            }
        }
    }
    let uploaded: Vec<String> = documents.iter().map(|d| d.blob.url.clone()).collect();

    let created = SessionRepository::new(&state.db)
        .create_signing_session(NewSession {
            recipient_name,
            recipient_email,
            workflow_id: workflow.id.to_string(),
            expires_at: Utc::now() + state.settings.envelope_ttl,
            documents,
            placeholders,
        })
        .inspect_err(|_| {
            state.vault.delete_all(uploaded.iter().map(String::as_str));
        })?;

    let session_id = created.envelope.id.clone();
    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::SessionCreated)
            .with_user(principal.key_id.clone())
            .with_resource("envelope", session_id.clone())
            .with_ip(ip)
            .with_details(json!({
                "workflowId": workflow.id,
                "documents": created.documents.len(),
                "placeholders": created.placeholders.len(),
            }))
    );
    state.events.publish(DomainEvent::new(
        names::SESSION_CREATED,
        json!({
            "sessionId": session_id,
            "recipientId": created.recipient.id,
            "workflowId": workflow.id,
        }),
    ));
    info!(
        session_id = %session_id,
        documents = created.documents.len(),
        workflow = workflow.id,
        "Signing session created"
    );

    let documents: Vec<DocumentInfo> = created.documents.into_iter().map(Into::into).collect();
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id,
            recipient_id: created.recipient.id,
            document_urls: documents.iter().map(|d| d.download_url.clone()).collect(),
            documents,
            expires_at: created.envelope.expires_at,
            workflow: workflow.clone(),
            placeholders: created.placeholders,
        }),
    ))
}

/// Fetch a session with its recipient, documents, signatures and
/// placeholders.
#[utoipa::path(
    get,
    path = "/signing-session/{id}",
    tag = "Sessions",
    security(("api_key" = []), ("signing_token" = [])),
    params(("id" = String, Path, description = "Session (envelope) id")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionSnapshot),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Token bound to another envelope"),
        (status = 404, description = "Session not found")
    )
)]
pub async fn get_signing_session(
    State(state): State<AppState>,
    access: SigningAccess,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    access.authorize(&id)?;
    let snapshot = SessionRepository::new(&state.db).get_session(&id)?;

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::SessionAccessed)
            .with_user(access.actor_id())
            .with_resource("envelope", id)
            .with_ip(ip)
    );
    Ok(Json(snapshot))
}
