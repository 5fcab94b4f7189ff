// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::{
    audit_log,
    auth::{ApiKeyAuth, ClientIp},
    error::ApiError,
    state::AppState,
    storage::{AuditEvent, AuditEventType, SessionRepository},
};

/// `attachment; filename="..."` with quotes and control characters dropped.
fn attachment(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// Download an uploaded document, decrypted.
#[utoipa::path(
    get,
    path = "/document/{id}/download",
    tag = "Documents",
    security(("api_key" = [])),
    params(("id" = String, Path, description = "Document id")),
    responses(
        (status = 200, description = "Document bytes"),
        (status = 404, description = "Document not found"),
        (status = 500, description = "Stored document failed its integrity check")
    )
)]
pub async fn download_document(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let document = SessionRepository::new(&state.db).get_document(&id)?;
    let bytes = state
        .vault
        .retrieve(&document.storage_url, document.encryption.as_ref())?;

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::DocumentDownloaded)
            .with_user(principal.key_id)
            .with_resource("document", id)
            .with_ip(ip)
    );

    let content_type = HeaderValue::from_str(&document.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, attachment(&document.filename)),
        ],
        bytes,
    )
        .into_response())
}
