// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only API endpoints.
//!
//! These endpoints require `Authorization: Bearer <ADMIN_TOKEN>` and
//! provide:
//! - API key issuance and revocation
//! - Session listing and cascade deletion
//! - Webhook listing and deletion
//! - Audit log queries

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit_log,
    auth::{new_api_key, AdminOnly},
    error::ApiError,
    events::{names, DomainEvent},
    state::AppState,
    storage::{
        repository::{ApiKeyInfo, SessionSummary, WebhookInfo},
        ApiKeyRepository, AuditEvent, AuditEventType, AuditRepository, SessionRepository,
        WebhookRepository,
    },
};

const DEFAULT_AUDIT_LIMIT: usize = 100;
const MAX_AUDIT_LIMIT: usize = 1000;
const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    /// Human-readable label.
    pub name: String,
    /// Omit for a key that never expires.
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyResponse {
    #[serde(flatten)]
    pub info: ApiKeyInfo,
    /// Plaintext key. Shown only in this response.
    pub api_key: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyListResponse {
    pub keys: Vec<ApiKeyInfo>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSessionResponse {
    pub session_id: String,
    pub tokens: usize,
    pub face_attempts: usize,
    pub signatures: usize,
    pub placeholders: usize,
    pub documents: usize,
    pub blobs_removed: usize,
    /// Blobs that could not be removed and were left behind.
    pub blobs_failed: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookListResponse {
    pub webhooks: Vec<WebhookInfo>,
    pub total: usize,
}

/// Query parameters for audit log queries.
#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditQueryParams {
    /// Start date (YYYY-MM-DD). Defaults to today.
    pub start_date: Option<String>,
    /// End date (YYYY-MM-DD), inclusive. Defaults to today.
    pub end_date: Option<String>,
    /// Filter by acting user or API key id.
    pub user_id: Option<String>,
    /// Filter by event type, e.g. `session_created`.
    pub event_type: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    /// Maximum number of results (default 100, max 1000).
    pub limit: Option<usize>,
    /// Offset for pagination.
    pub offset: Option<usize>,
}

/// Response for audit log queries.
#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    /// Audit events matching the query, oldest first.
    pub events: Vec<AuditEvent>,
    /// Total count (before limit/offset).
    pub total: usize,
    /// Whether there are more results.
    pub has_more: bool,
}

fn parse_date(raw: Option<&str>, name: &str, default: NaiveDate) -> Result<NaiveDate, ApiError> {
    match raw {
        None => Ok(default),
        Some(raw) => NaiveDate::parse_from_str(raw, DATE_FORMAT)
            .map_err(|_| ApiError::bad_request(format!("Invalid {name} format. Use YYYY-MM-DD."))),
    }
}

fn admin_audit(state: &AppState, admin: &crate::envelope::Actor, action: &str) {
    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::AdminAccess)
            .with_user(admin.id.clone())
            .with_ip(admin.ip.clone())
            .with_details(json!({ "action": action }))
    );
}

// ============================================================================
// API keys
// ============================================================================

/// List API keys (metadata only).
#[utoipa::path(
    get,
    path = "/admin/api-keys",
    tag = "Admin",
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "API keys", body = ApiKeyListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_api_keys(
    State(state): State<AppState>,
    AdminOnly(_admin): AdminOnly,
) -> Result<Json<ApiKeyListResponse>, ApiError> {
    let keys: Vec<ApiKeyInfo> = ApiKeyRepository::new(&state.db)
        .list()?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(ApiKeyListResponse {
        total: keys.len(),
        keys,
    }))
}

/// Issue a new API key. The plaintext is returned once.
#[utoipa::path(
    post,
    path = "/admin/api-keys",
    tag = "Admin",
    security(("admin_token" = [])),
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "API key created", body = CreateApiKeyResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn create_api_key(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    Json(req): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ApiError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    let expires_at = match req.expires_in_days {
        Some(0) => return Err(ApiError::bad_request("expiresInDays must be positive")),
        Some(days) => Some(Utc::now() + chrono::Duration::days(i64::from(days))),
        None => None,
    };

    let (record, plaintext) = new_api_key(name, expires_at)?;
    ApiKeyRepository::new(&state.db).create(&record)?;

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::ApiKeyCreated)
            .with_user(admin.id)
            .with_resource("api_key", record.id.clone())
            .with_ip(admin.ip)
            .with_details(json!({ "name": record.name, "expiresAt": record.expires_at }))
    );
    info!(key_id = %record.id, name = %record.name, "API key created");

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            info: record.into(),
            api_key: plaintext,
        }),
    ))
}

/// Revoke an API key. Revocation is permanent.
#[utoipa::path(
    post,
    path = "/admin/api-keys/{id}/revoke",
    tag = "Admin",
    security(("admin_token" = [])),
    params(("id" = String, Path, description = "API key id")),
    responses(
        (status = 200, description = "API key revoked", body = ApiKeyInfo),
        (status = 404, description = "API key not found")
    )
)]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    Path(id): Path<String>,
) -> Result<Json<ApiKeyInfo>, ApiError> {
    let key = ApiKeyRepository::new(&state.db).revoke(&id)?;

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::ApiKeyRevoked)
            .with_user(admin.id)
            .with_resource("api_key", id)
            .with_ip(admin.ip)
    );
    info!(key_id = %key.id, "API key revoked");
    Ok(Json(key.into()))
}

// ============================================================================
// Sessions
// ============================================================================

/// List every session, newest first.
#[utoipa::path(
    get,
    path = "/admin/sessions",
    tag = "Admin",
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "Sessions", body = SessionListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_sessions(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
) -> Result<Json<SessionListResponse>, ApiError> {
    let sessions = SessionRepository::new(&state.db).list_sessions()?;
    admin_audit(&state, &admin, "list_sessions");
    Ok(Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    }))
}

/// Delete a session and everything it owns.
///
/// Rows go in one transaction; blobs are removed afterwards, best-effort.
#[utoipa::path(
    delete,
    path = "/admin/sessions/{id}",
    tag = "Admin",
    security(("admin_token" = [])),
    params(("id" = String, Path, description = "Session (envelope) id")),
    responses(
        (status = 200, description = "Session deleted", body = DeleteSessionResponse),
        (status = 404, description = "Session not found")
    )
)]
pub async fn delete_session(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    Path(id): Path<String>,
) -> Result<Json<DeleteSessionResponse>, ApiError> {
    let deleted = SessionRepository::new(&state.db).delete_session(&id)?;
    let blobs_failed = state
        .vault
        .delete_all(deleted.blob_urls.iter().map(String::as_str));
    if blobs_failed > 0 {
        warn!(session_id = %id, failed = blobs_failed, "Some session blobs were not removed");
    }

    let response = DeleteSessionResponse {
        session_id: deleted.envelope_id,
        tokens: deleted.tokens,
        face_attempts: deleted.face_attempts,
        signatures: deleted.signatures,
        placeholders: deleted.placeholders,
        documents: deleted.documents,
        blobs_removed: deleted.blob_urls.len() - blobs_failed,
        blobs_failed,
    };

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::SessionDeleted)
            .with_user(admin.id)
            .with_resource("envelope", id.clone())
            .with_ip(admin.ip)
            .with_details(json!({
                "documents": response.documents,
                "signatures": response.signatures,
                "blobsFailed": blobs_failed,
            }))
    );
    state.events.publish(DomainEvent::new(
        names::SESSION_DELETED,
        json!({ "sessionId": id }),
    ));
    info!(session_id = %id, "Session deleted");

    Ok(Json(response))
}

// ============================================================================
// Webhooks
// ============================================================================

#[utoipa::path(
    get,
    path = "/admin/webhooks",
    tag = "Admin",
    security(("admin_token" = [])),
    responses(
        (status = 200, description = "Webhooks (without secrets)", body = WebhookListResponse),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn list_webhooks(
    State(state): State<AppState>,
    AdminOnly(_admin): AdminOnly,
) -> Result<Json<WebhookListResponse>, ApiError> {
    let webhooks: Vec<WebhookInfo> = WebhookRepository::new(&state.db)
        .list()?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(WebhookListResponse {
        total: webhooks.len(),
        webhooks,
    }))
}

#[utoipa::path(
    delete,
    path = "/admin/webhooks/{id}",
    tag = "Admin",
    security(("admin_token" = [])),
    params(("id" = String, Path, description = "Webhook id")),
    responses(
        (status = 204, description = "Webhook deleted"),
        (status = 404, description = "Webhook not found")
    )
)]
pub async fn delete_webhook(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !WebhookRepository::new(&state.db).delete(&id)? {
        return Err(ApiError::not_found(format!("Webhook {id} not found")));
    }

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::WebhookDeleted)
            .with_user(admin.id)
            .with_resource("webhook", id.clone())
            .with_ip(admin.ip)
    );
    info!(webhook_id = %id, "Webhook deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Audit
// ============================================================================

/// Query audit logs.
///
/// Searches audit logs with optional filters for date range, user, event
/// type, and resource.
#[utoipa::path(
    get,
    path = "/admin/audit/events",
    tag = "Admin",
    security(("admin_token" = [])),
    params(AuditQueryParams),
    responses(
        (status = 200, description = "Audit log entries", body = AuditLogResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 401, description = "Not authenticated")
    )
)]
pub async fn query_audit_logs(
    State(state): State<AppState>,
    AdminOnly(admin): AdminOnly,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    let today = Utc::now().date_naive();
    let start_date = parse_date(params.start_date.as_deref(), "start_date", today)?;
    let end_date = parse_date(params.end_date.as_deref(), "end_date", today)?;
    if end_date < start_date {
        return Err(ApiError::bad_request("end_date is before start_date"));
    }

    let mut events = AuditRepository::new(&state.db).read_events_range(start_date, end_date)?;

    if let Some(user_id) = &params.user_id {
        events.retain(|e| e.user_id.as_deref() == Some(user_id.as_str()));
    }
    if let Some(event_type) = &params.event_type {
        events.retain(|e| {
            serde_json::to_value(&e.event_type)
                .ok()
                .and_then(|v| v.as_str().map(|s| s == event_type))
                .unwrap_or(false)
        });
    }
    if let Some(resource_type) = &params.resource_type {
        events.retain(|e| e.resource_type.as_deref() == Some(resource_type.as_str()));
    }
    if let Some(resource_id) = &params.resource_id {
        events.retain(|e| e.resource_id.as_deref() == Some(resource_id.as_str()));
    }

    let total = events.len();
    let limit = params
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .min(MAX_AUDIT_LIMIT);
    let offset = params.offset.unwrap_or(0);
    let has_more = offset.saturating_add(limit) < total;
    let events: Vec<AuditEvent> = events.into_iter().skip(offset).take(limit).collect();

    admin_audit(&state, &admin, "query_audit_logs");

    Ok(Json(AuditLogResponse {
        events,
        total,
        has_more,
    }))
}
