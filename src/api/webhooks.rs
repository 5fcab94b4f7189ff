// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::{ApiKeyAuth, ClientIp},
    error::ApiError,
    events::names,
    state::AppState,
    storage::{
        repository::{StoredWebhook, WILDCARD_EVENT},
        AuditEvent, AuditEventType, WebhookRepository,
    },
};

const SECRET_PREFIX: &str = "whsec_";
const SECRET_BYTES: usize = 32;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterWebhookRequest {
    /// http(s) endpoint receiving `POST {event, timestamp, data}`.
    pub url: String,
    /// Event names, or `*` for every event.
    pub events: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWebhookResponse {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    /// HMAC-SHA256 key for `X-Webhook-Signature`. Shown only here.
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

fn validate(req: &RegisterWebhookRequest) -> Result<(), ApiError> {
    let url = url::Url::parse(&req.url)
        .map_err(|e| ApiError::bad_request(format!("url is invalid: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::bad_request("url must use http or https"));
    }
    if req.events.is_empty() {
        return Err(ApiError::bad_request("events must not be empty"));
    }
    if let Some(unknown) = req
        .events
        .iter()
        .find(|e| e.as_str() != WILDCARD_EVENT && !names::ALL.contains(&e.as_str()))
    {
        return Err(ApiError::bad_request(format!("unknown event: {unknown}")));
    }
    Ok(())
}

fn generate_secret() -> Result<String, ApiError> {
    let mut bytes = [0u8; SECRET_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| ApiError::internal("random generator failure"))?;
    Ok(format!("{SECRET_PREFIX}{}", hex::encode(bytes)))
}

/// Register a webhook subscription.
#[utoipa::path(
    post,
    path = "/webhook/register",
    tag = "Webhooks",
    security(("api_key" = [])),
    request_body = RegisterWebhookRequest,
    responses(
        (status = 201, description = "Webhook registered", body = RegisterWebhookResponse),
        (status = 400, description = "Invalid url or events")
    )
)]
pub async fn register_webhook(
    State(state): State<AppState>,
    ApiKeyAuth(principal): ApiKeyAuth,
    ClientIp(ip): ClientIp,
    Json(req): Json<RegisterWebhookRequest>,
) -> Result<(StatusCode, Json<RegisterWebhookResponse>), ApiError> {
    validate(&req)?;

    let mut events = req.events;
    events.sort();
    events.dedup();
    let hook = StoredWebhook {
        id: uuid::Uuid::new_v4().to_string(),
        url: req.url,
        events,
        secret: generate_secret()?,
        created_at: Utc::now(),
    };
    WebhookRepository::new(&state.db).create(&hook)?;

    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::WebhookRegistered)
            .with_user(principal.key_id)
            .with_resource("webhook", hook.id.clone())
            .with_ip(ip)
            .with_details(json!({ "url": hook.url, "events": hook.events }))
    );
    info!(webhook_id = %hook.id, events = hook.events.len(), "Webhook registered");

    Ok((
        StatusCode::CREATED,
        Json(RegisterWebhookResponse {
            id: hook.id,
            url: hook.url,
            events: hook.events,
            secret: hook.secret,
            created_at: hook.created_at,
        }),
    ))
}
