// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::state::AppState;

pub mod admin;
pub mod documents;
pub mod envelopes;
pub mod health;
pub mod sessions;
pub mod signing;
pub mod upload;
pub mod verification;
pub mod webhooks;

pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.max_upload_bytes;

    let admin_routes = Router::new()
        .route(
            "/api-keys",
            get(admin::list_api_keys).post(admin::create_api_key),
        )
        .route("/api-keys/{id}/revoke", post(admin::revoke_api_key))
        .route("/sessions", get(admin::list_sessions))
        .route("/sessions/{id}", delete(admin::delete_session))
        .route("/webhooks", get(admin::list_webhooks))
        .route("/webhooks/{id}", delete(admin::delete_webhook))
        .route("/audit/events", get(admin::query_audit_logs));

    let api_routes = Router::new()
        // Health (no auth)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Sessions
        .route("/signing-session", post(sessions::create_signing_session))
        .route("/signing-session/{id}", get(sessions::get_signing_session))
        // Envelopes
        .route("/envelope/{id}/verify", post(envelopes::verify_envelope))
        .route(
            "/envelope/{id}/signing-link",
            get(envelopes::get_signing_link),
        )
        .route("/envelope/{id}/status", post(envelopes::update_status))
        .route("/envelope/{id}/prepare", post(envelopes::prepare_envelope))
        .route(
            "/envelope/{id}/placeholders/validation",
            get(envelopes::validate_placeholders),
        )
        .route(
            "/envelope/{id}/signed-pdf",
            get(envelopes::download_signed_pdf),
        )
        // Identity verification
        .route(
            "/verify/document-name",
            post(verification::verify_document_name),
        )
        .route("/verify/face", post(verification::verify_face))
        // Signing, documents, webhooks
        .route("/sign-pdf", post(signing::sign_pdf))
        .route(
            "/document/{id}/download",
            get(documents::download_document),
        )
        .route("/webhook/register", post(webhooks::register_webhook))
        .nest("/admin", admin_routes)
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-api-key"))),
        );
        components.add_security_scheme(
            "signing_token",
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new("x-signing-token"))),
        );
        components.add_security_scheme(
            "admin_token",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        sessions::create_signing_session,
        sessions::get_signing_session,
        envelopes::verify_envelope,
        envelopes::get_signing_link,
        envelopes::update_status,
        envelopes::prepare_envelope,
        envelopes::validate_placeholders,
        envelopes::download_signed_pdf,
        verification::verify_document_name,
        verification::verify_face,
        signing::sign_pdf,
        documents::download_document,
        webhooks::register_webhook,
        admin::list_api_keys,
        admin::create_api_key,
        admin::revoke_api_key,
        admin::list_sessions,
        admin::delete_session,
        admin::list_webhooks,
        admin::delete_webhook,
        admin::query_audit_logs
    ),
    components(
        schemas(
            sessions::CreateSessionForm,
            sessions::CreateSessionResponse,
            envelopes::VerifyRequest,
            envelopes::VerifyResponse,
            envelopes::StatusRequest,
            envelopes::StatusResponse,
            verification::DocumentNameForm,
            verification::FaceForm,
            signing::SignPdfForm,
            webhooks::RegisterWebhookRequest,
            webhooks::RegisterWebhookResponse,
            admin::CreateApiKeyRequest,
            admin::CreateApiKeyResponse,
            admin::AuditLogResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Sessions", description = "Signing session creation and lookup"),
        (name = "Envelopes", description = "Envelope verification, links and status"),
        (name = "Verification", description = "Document name and face checks"),
        (name = "Signing", description = "PDF signature stamping"),
        (name = "Documents", description = "Encrypted document download"),
        (name = "Webhooks", description = "Event subscriptions"),
        (name = "Admin", description = "API keys, sessions and audit (admin token)")
    )
)]
struct ApiDoc;
