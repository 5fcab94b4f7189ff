// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Authentication error type.
///
/// Every variant except `InternalError` renders as 401 (or 403 for scope
/// failures); the specific reason travels in `error_code`.
#[derive(Debug)]
pub enum AuthError {
    /// No API key, bearer token or signing token present
    MissingCredentials,
    /// Authorization header present but not `Bearer <token>`
    InvalidAuthHeader,
    /// API key does not match any stored key
    InvalidApiKey,
    /// API key matched but has expired
    ApiKeyExpired,
    /// API key matched but was revoked
    ApiKeyRevoked,
    /// Admin bearer token mismatch
    InvalidAdminToken,
    /// Signing token unknown
    InvalidSigningToken,
    /// Signing token past its expiry
    SigningTokenExpired,
    /// Signing token used against a different envelope
    TokenScopeMismatch,
    /// Internal error
    InternalError(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::InvalidApiKey => "invalid_api_key",
            AuthError::ApiKeyExpired => "api_key_expired",
            AuthError::ApiKeyRevoked => "api_key_revoked",
            AuthError::InvalidAdminToken => "invalid_admin_token",
            AuthError::InvalidSigningToken => "invalid_signing_token",
            AuthError::SigningTokenExpired => "signing_token_expired",
            AuthError::TokenScopeMismatch => "token_scope_mismatch",
            AuthError::InternalError(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::TokenScopeMismatch => StatusCode::FORBIDDEN,
            AuthError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingCredentials => write!(f, "Authentication is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::InvalidApiKey => write!(f, "Invalid API key"),
            AuthError::ApiKeyExpired => write!(f, "API key has expired"),
            AuthError::ApiKeyRevoked => write!(f, "API key has been revoked"),
            AuthError::InvalidAdminToken => write!(f, "Invalid admin token"),
            AuthError::InvalidSigningToken => write!(f, "Invalid signing token"),
            AuthError::SigningTokenExpired => write!(f, "Signing token has expired"),
            AuthError::TokenScopeMismatch => {
                write!(f, "Signing token is not valid for this envelope")
            }
            AuthError::InternalError(msg) => write!(f, "Internal authentication error: {msg}"),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
