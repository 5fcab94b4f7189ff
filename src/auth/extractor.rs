// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the three kinds of caller.
//!
//! ```rust,ignore
//! async fn create_session(ApiKeyAuth(principal): ApiKeyAuth) -> impl IntoResponse { .. }
//! async fn list_keys(AdminOnly(actor): AdminOnly) -> impl IntoResponse { .. }
//! async fn get_session(access: SigningAccess, Path(id): Path<String>) -> .. {
//!     access.authorize(&id)?;
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use chrono::Utc;

use super::api_keys::authenticate_api_key;
use super::AuthError;
use crate::audit_log;
use crate::envelope::Actor;
use crate::state::AppState;
use crate::storage::repository::{EnvelopeRepository, SigningToken};
use crate::storage::{AuditEvent, AuditEventType};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const SIGNING_TOKEN_HEADER: &str = "x-signing-token";
const SIGNING_TOKEN_QUERY: &str = "token";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

/// Actor id recorded for admin requests.
pub const ADMIN_ACTOR: &str = "admin";

/// Caller authenticated by API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPrincipal {
    pub key_id: String,
    pub name: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AuthError> {
    headers
        .get(name)
        .map(|v| v.to_str().map(str::trim).map_err(|_| AuthError::InvalidAuthHeader))
        .transpose()
}

fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    match header_str(headers, AUTHORIZATION.as_str())? {
        Some(value) => value
            .strip_prefix("Bearer ")
            .map(|t| Some(t.trim()))
            .ok_or(AuthError::InvalidAuthHeader),
        None => Ok(None),
    }
}

/// `x-api-key`, falling back to `Authorization: Bearer`.
fn presented_api_key(headers: &HeaderMap) -> Result<Option<&str>, AuthError> {
    match header_str(headers, API_KEY_HEADER)? {
        Some(key) => Ok(Some(key)),
        None => bearer_token(headers),
    }
}

fn presented_signing_token(parts: &Parts) -> Result<Option<String>, AuthError> {
    if let Some(token) = header_str(&parts.headers, SIGNING_TOKEN_HEADER)? {
        return Ok(Some(token.to_string()));
    }
    Ok(parts.uri.query().and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| *k == SIGNING_TOKEN_QUERY)
            .map(|(_, v)| v.into_owned())
    }))
}

/// Best-effort client address: proxy headers first, then the socket.
pub fn client_ip(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        parts
            .headers
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(str::to_string)
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

fn audit_failure(state: &AppState, parts: &Parts, error: &AuthError) {
    if matches!(error, AuthError::InternalError(_)) {
        return;
    }
    audit_log!(
        &state.db,
        AuditEvent::new(AuditEventType::AuthFailure)
            .with_ip(client_ip(parts))
            .with_details(serde_json::json!({
                "path": parts.uri.path(),
                "code": error.error_code(),
            }))
            .failed(error.to_string())
    );
}

fn authenticate(state: &AppState, parts: &Parts, key: &str) -> Result<ApiPrincipal, AuthError> {
    authenticate_api_key(&state.db, key)
        .map(|k| ApiPrincipal {
            key_id: k.id,
            name: k.name,
        })
        .inspect_err(|e| audit_failure(state, parts, e))
}

/// Extractor requiring a valid API key.
pub struct ApiKeyAuth(pub ApiPrincipal);

impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let key = presented_api_key(&parts.headers)?.ok_or(AuthError::MissingCredentials)?;
        authenticate(state, parts, key).map(ApiKeyAuth)
    }
}

/// Extractor requiring `Authorization: Bearer <ADMIN_TOKEN>`.
pub struct AdminOnly(pub Actor);

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?.ok_or(AuthError::MissingCredentials)?;
        if !state.admin.verify(token) {
            let err = AuthError::InvalidAdminToken;
            audit_failure(state, parts, &err);
            return Err(err);
        }
        Ok(AdminOnly(Actor::new(ADMIN_ACTOR, client_ip(parts))))
    }
}

/// Extractor accepting an API key or a signing token.
///
/// A token only grants access to its own envelope; handlers call
/// [`SigningAccess::authorize`] with the envelope they are about to touch.
#[derive(Debug, Clone)]
pub enum SigningAccess {
    ApiKey(ApiPrincipal),
    Token(SigningToken),
}

impl SigningAccess {
    pub fn actor_id(&self) -> String {
        match self {
            SigningAccess::ApiKey(p) => p.key_id.clone(),
            SigningAccess::Token(t) => format!("signing-token:{}", t.envelope_id),
        }
    }

    /// Envelope a token is bound to. `None` for API keys.
    pub fn scoped_envelope(&self) -> Option<&str> {
        match self {
            SigningAccess::ApiKey(_) => None,
            SigningAccess::Token(t) => Some(&t.envelope_id),
        }
    }

    pub fn authorize(&self, envelope_id: &str) -> Result<(), AuthError> {
        match self.scoped_envelope() {
            Some(scope) if scope != envelope_id => Err(AuthError::TokenScopeMismatch),
            _ => Ok(()),
        }
    }
}

impl FromRequestParts<AppState> for SigningAccess {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(key) = presented_api_key(&parts.headers)? {
            return authenticate(state, parts, key).map(SigningAccess::ApiKey);
        }

        let presented = presented_signing_token(parts)?.ok_or(AuthError::MissingCredentials)?;
        let token = EnvelopeRepository::new(&state.db)
            .find_token(&presented)
            .map_err(|e| AuthError::InternalError(e.to_string()))?;
        let result = match token {
            None => Err(AuthError::InvalidSigningToken),
            Some(t) if !t.is_valid_at(Utc::now()) => Err(AuthError::SigningTokenExpired),
            Some(t) => Ok(SigningAccess::Token(t)),
        };
        result.inspect_err(|e| audit_failure(state, parts, e))
    }
}

/// Client address for audit records. Never rejects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(parts)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::api_keys::new_api_key;
    use crate::envelope::EnvelopeStatus;
    use crate::state::test_support::{test_state, TEST_ADMIN_TOKEN};
    use crate::storage::repository::test_support::seed_envelope;
    use crate::storage::repository::ApiKeyRepository;
    use axum::http::Request;

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).unwrap().into_parts().0
    }

    fn issue_key(state: &AppState) -> String {
        let (record, plaintext) = new_api_key("tests", None).unwrap();
        ApiKeyRepository::new(&state.db).create(&record).unwrap();
        plaintext
    }

    fn issue_token(state: &AppState, envelope_id: &str, ttl: chrono::Duration) -> String {
        let now = Utc::now();
        let token = SigningToken {
            token: format!("tok-{envelope_id}"),
            envelope_id: envelope_id.to_string(),
            created_at: now,
            expires_at: now + ttl,
        };
        EnvelopeRepository::new(&state.db).insert_token(&token).unwrap();
        token.token
    }

    #[tokio::test]
    async fn api_key_accepted_from_either_header() {
        let (_temp, state, _rx) = test_state();
        let key = issue_key(&state);

        let mut p = parts(Request::builder().uri("/x").header(API_KEY_HEADER, &key));
        assert!(ApiKeyAuth::from_request_parts(&mut p, &state).await.is_ok());

        let mut p = parts(
            Request::builder()
                .uri("/x")
                .header("Authorization", format!("Bearer {key}")),
        );
        let ApiKeyAuth(principal) = ApiKeyAuth::from_request_parts(&mut p, &state).await.unwrap();
        assert_eq!(principal.name, "tests");
    }

    #[tokio::test]
    async fn missing_api_key_is_rejected() {
        let (_temp, state, _rx) = test_state();
        let mut p = parts(Request::builder().uri("/x"));
        let result = ApiKeyAuth::from_request_parts(&mut p, &state).await;
        assert!(matches!(result, Err(AuthError::MissingCredentials)));

        let mut p = parts(Request::builder().uri("/x").header("Authorization", "Basic abc"));
        let result = ApiKeyAuth::from_request_parts(&mut p, &state).await;
        assert!(matches!(result, Err(AuthError::InvalidAuthHeader)));
    }

    #[tokio::test]
    async fn admin_requires_exact_token() {
        let (_temp, state, _rx) = test_state();
        let mut p = parts(
            Request::builder()
                .uri("/admin")
                .header("Authorization", format!("Bearer {TEST_ADMIN_TOKEN}")),
        );
        let AdminOnly(actor) = AdminOnly::from_request_parts(&mut p, &state).await.unwrap();
        assert_eq!(actor.id, ADMIN_ACTOR);

        let mut p = parts(
            Request::builder()
                .uri("/admin")
                .header("Authorization", "Bearer wrong-token-000000"),
        );
        let result = AdminOnly::from_request_parts(&mut p, &state).await;
        assert!(matches!(result, Err(AuthError::InvalidAdminToken)));

        // An API key is not an admin credential
        let key = issue_key(&state);
        let mut p = parts(
            Request::builder()
                .uri("/admin")
                .header("Authorization", format!("Bearer {key}")),
        );
        assert!(AdminOnly::from_request_parts(&mut p, &state).await.is_err());
    }

    #[tokio::test]
    async fn signing_token_is_scoped_to_its_envelope() {
        let (_temp, state, _rx) = test_state();
        let env = seed_envelope(&state.db, EnvelopeStatus::Prepared);
        let token = issue_token(&state, &env.id, chrono::Duration::hours(1));

        let mut p = parts(Request::builder().uri(format!("/sign-pdf?token={token}")));
        let access = SigningAccess::from_request_parts(&mut p, &state).await.unwrap();
        assert_eq!(access.scoped_envelope(), Some(env.id.as_str()));
        assert!(access.authorize(&env.id).is_ok());
        assert!(matches!(
            access.authorize("some-other-envelope"),
            Err(AuthError::TokenScopeMismatch)
        ));

        let mut p = parts(Request::builder().uri("/x").header(SIGNING_TOKEN_HEADER, &token));
        assert!(SigningAccess::from_request_parts(&mut p, &state).await.is_ok());
    }

    #[tokio::test]
    async fn expired_or_unknown_tokens_are_rejected() {
        let (_temp, state, _rx) = test_state();
        let env = seed_envelope(&state.db, EnvelopeStatus::Prepared);
        let token = issue_token(&state, &env.id, chrono::Duration::seconds(-5));

        let mut p = parts(Request::builder().uri("/x").header(SIGNING_TOKEN_HEADER, &token));
        let result = SigningAccess::from_request_parts(&mut p, &state).await;
        assert!(matches!(result, Err(AuthError::SigningTokenExpired)));

        let mut p = parts(Request::builder().uri("/x?token=nope"));
        let result = SigningAccess::from_request_parts(&mut p, &state).await;
        assert!(matches!(result, Err(AuthError::InvalidSigningToken)));
    }

    #[tokio::test]
    async fn api_key_grants_unscoped_signing_access() {
        let (_temp, state, _rx) = test_state();
        let key = issue_key(&state);
        let mut p = parts(Request::builder().uri("/x").header(API_KEY_HEADER, &key));
        let access = SigningAccess::from_request_parts(&mut p, &state).await.unwrap();
        assert!(access.authorize("anything").is_ok());
    }

    #[tokio::test]
    async fn client_ip_prefers_forwarded_header() {
        let mut p = parts(
            Request::builder()
                .uri("/x")
                .header(FORWARDED_FOR_HEADER, "198.51.100.4, 10.0.0.1")
                .header(REAL_IP_HEADER, "10.0.0.2"),
        );
        let ClientIp(ip) = ClientIp::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ip.as_deref(), Some("198.51.100.4"));

        let mut p = parts(Request::builder().uri("/x"));
        p.extensions
            .insert(ConnectInfo(SocketAddr::from(([192, 0, 2, 9], 4000))));
        let ClientIp(ip) = ClientIp::from_request_parts(&mut p, &()).await.unwrap();
        assert_eq!(ip.as_deref(), Some("192.0.2.9"));

        let mut p = parts(Request::builder().uri("/x"));
        let ClientIp(ip) = ClientIp::from_request_parts(&mut p, &()).await.unwrap();
        assert!(ip.is_none());
    }

    #[tokio::test]
    async fn failures_are_audited() {
        let (_temp, state, _rx) = test_state();
        let mut p = parts(Request::builder().uri("/x").header(API_KEY_HEADER, "idk_0000000000000000"));
        let _ = ApiKeyAuth::from_request_parts(&mut p, &state).await;

        let events = crate::storage::AuditRepository::new(&state.db)
            .read_events(Utc::now().date_naive())
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::AuthFailure);
        assert!(!events[0].success);
    }
}
