// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP error type.
//!
//! Domain errors convert into [`ApiError`] through the `From` impls below,
//! so handlers can use `?` and the status mapping lives in one place.
//! Bodies are `{"error": message, "error_code": code}`.

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;
use crate::envelope::{LifecycleError, SigningError};
use crate::pdf::PdfError;
use crate::storage::{DbError, ObjectStoreError, VaultError};
use crate::verification::VerificationError;

pub mod codes {
    pub const VALIDATION: &str = "validation_error";
    pub const AUTH: &str = "auth_error";
    pub const NOT_FOUND: &str = "not_found";
    pub const STATE_CONFLICT: &str = "state_conflict";
    pub const UPSTREAM: &str = "upstream_error";
    pub const INTEGRITY: &str = "integrity_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::VALIDATION, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    /// The envelope's state does not allow the operation.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, codes::STATE_CONFLICT, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::UPSTREAM, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::INTEGRITY, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, codes::UPSTREAM, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(code = self.code, status = %self.status, error = %self.message, "Request failed");
        }
        let body = Json(ErrorBody {
            error: self.message,
            error_code: self.code,
        });
        (self.status, body).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        let code = match e {
            AuthError::InternalError(_) => codes::INTERNAL,
            _ => e.error_code(),
        };
        Self::new(e.status_code(), code, e.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => Self::not_found(format!("{what} not found")),
            other => Self::internal(format!("database error: {other}")),
        }
    }
}

impl From<ObjectStoreError> for ApiError {
    fn from(e: ObjectStoreError) -> Self {
        match e {
            ObjectStoreError::NotFound(what) => Self::not_found(format!("object {what} not found")),
            ObjectStoreError::IntegrityViolation(msg) => Self::integrity(msg),
            other => Self::internal(format!("object store error: {other}")),
        }
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        match e {
            VaultError::Store(inner) => inner.into(),
            VaultError::Tampered => Self::integrity(e.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<VerificationError> for ApiError {
    fn from(e: VerificationError) -> Self {
        match e {
            VerificationError::ResponseMalformed(_) => {
                Self::new(StatusCode::BAD_GATEWAY, codes::UPSTREAM, e.to_string())
            }
            other => Self::upstream(other.to_string()),
        }
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound(what) => Self::not_found(format!("{what} not found")),
            LifecycleError::Conflict(msg) => Self::conflict(msg),
            LifecycleError::Expired(_) => Self::conflict(e.to_string()),
            LifecycleError::Validation(msg) => Self::bad_request(msg),
            LifecycleError::Db(inner) => inner.into(),
            LifecycleError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<PdfError> for ApiError {
    fn from(e: PdfError) -> Self {
        match e {
            PdfError::DocumentUnreadable(_) => Self::bad_request(e.to_string()),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<SigningError> for ApiError {
    fn from(e: SigningError) -> Self {
        match e {
            SigningError::Lifecycle(inner) => inner.into(),
            SigningError::Pdf(inner) => inner.into(),
            SigningError::Vault(inner) => inner.into(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        Self::new(e.status(), codes::VALIDATION, e.body_text())
    }
}
