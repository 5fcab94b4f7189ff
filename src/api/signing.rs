// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::{Multipart, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};
use utoipa::ToSchema;

use super::upload::UploadForm;
use crate::{
    auth::{ClientIp, SigningAccess},
    envelope::{sign_document, Actor},
    error::ApiError,
    pdf::{SignatureBatch, SignatureEntry},
    state::AppState,
};

pub const SIGNATURES_APPLIED_HEADER: &str = "x-signatures-applied";
pub const SIGNATURES_SKIPPED_HEADER: &str = "x-signatures-skipped";
pub const EVIDENCE_PAGE_HEADER: &str = "x-evidence-page";

/// Multipart body of `POST /sign-pdf`.
#[derive(ToSchema)]
#[schema(rename_all = "camelCase")]
pub struct SignPdfForm {
    #[schema(value_type = String, format = Binary)]
    pub pdf: Vec<u8>,
    /// JSON array of signature entries.
    pub signatures: Vec<SignatureEntry>,
    /// Defaults to the envelope a signing token is bound to.
    pub envelope_id: Option<String>,
}

/// Malformed elements are kept as skipped entries; only a non-array or an
/// empty array fails the request.
fn parse_signatures(raw: &str) -> Result<SignatureBatch, ApiError> {
    let batch = SignatureBatch::from_json(raw).map_err(|e| {
        ApiError::bad_request(format!("signatures must be a JSON array: {e}"))
    })?;
    if batch.is_empty() {
        return Err(ApiError::bad_request("signatures must not be empty"));
    }
    Ok(batch)
}

fn count_header(value: usize) -> HeaderValue {
    HeaderValue::from(value as u64)
}

/// Stamp signatures onto a PDF.
///
/// With an envelope, the signed copy is stored (encrypted) on it, matching
/// placeholders are marked signed and the latest ID capture is appended as
/// an evidence page. Entries that cannot be placed are skipped and counted
/// in `X-Signatures-Skipped`.
#[utoipa::path(
    post,
    path = "/sign-pdf",
    tag = "Signing",
    security(("api_key" = []), ("signing_token" = [])),
    request_body(content = SignPdfForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Signed PDF", content_type = "application/pdf"),
        (status = 400, description = "Invalid form or unreadable PDF"),
        (status = 403, description = "Envelope does not accept signatures"),
        (status = 404, description = "Envelope not found")
    )
)]
pub async fn sign_pdf(
    State(state): State<AppState>,
    access: SigningAccess,
    ClientIp(ip): ClientIp,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut form = UploadForm::read(multipart).await?;
    let pdf = form.require_file("pdf")?;
    let batch = parse_signatures(&form.require_text("signatures")?)?;

    let envelope_id = form
        .text("envelopeId")?
        .or_else(|| access.scoped_envelope().map(str::to_string));
    if let Some(id) = &envelope_id {
        access.authorize(id)?;
    }
    let actor = Actor::new(access.actor_id(), ip);

    let signed = tokio::task::spawn_blocking(move || {
        sign_document(
            &state.signing_services(),
            &pdf.bytes,
            &batch,
            envelope_id.as_deref(),
            &actor,
        )
    })
    .await
    .map_err(|e| ApiError::internal(format!("signing task failed: {e}")))??;

    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
        (
            HeaderName::from_static(SIGNATURES_APPLIED_HEADER),
            count_header(signed.pdf.applied),
        ),
        (
            HeaderName::from_static(SIGNATURES_SKIPPED_HEADER),
            count_header(signed.pdf.skipped.len()),
        ),
        (
            HeaderName::from_static(EVIDENCE_PAGE_HEADER),
            HeaderValue::from_static(if signed.pdf.evidence_page_appended {
                "true"
            } else {
                "false"
            }),
        ),
    ];
    Ok((headers, signed.pdf.bytes).into_response())
}
