// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Multipart form reading.
//!
//! Forms are small (a handful of files plus a few text fields), so the
//! whole form is buffered before validation. The body size is bounded by
//! the router's `DefaultBodyLimit`.

use axum::body::Bytes;
use axum::extract::Multipart;

use crate::error::ApiError;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// One uploaded part.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug)]
struct Part {
    name: String,
    file: UploadedFile,
}

/// A fully buffered multipart form.
#[derive(Debug, Default)]
pub struct UploadForm {
    parts: Vec<Part>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut parts = Vec::new();
        while let Some(field) = multipart.next_field().await? {
            // `documents[]` and `documents` name the same list
            let name = field
                .name()
                .unwrap_or_default()
                .trim_end_matches("[]")
                .to_string();
            let filename = field.file_name().unwrap_or(&name).to_string();
            let content_type = field
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string();
            let bytes = field.bytes().await?;
            parts.push(Part {
                name,
                file: UploadedFile {
                    filename,
                    content_type,
                    bytes,
                },
            });
        }
        Ok(Self { parts })
    }

    /// First non-blank text value of a field.
    pub fn text(&self, name: &str) -> Result<Option<String>, ApiError> {
        let Some(part) = self.parts.iter().find(|p| p.name == name) else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&part.file.bytes)
            .map_err(|_| ApiError::bad_request(format!("{name} must be UTF-8 text")))?
            .trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }

    pub fn require_text(&self, name: &str) -> Result<String, ApiError> {
        self.text(name)?
            .ok_or_else(|| ApiError::bad_request(format!("{name} is required")))
    }

    /// Every non-empty file sent under `name`.
    pub fn files(&mut self, name: &str) -> Vec<UploadedFile> {
        let (taken, rest): (Vec<Part>, Vec<Part>) =
            std::mem::take(&mut self.parts).into_iter().partition(|p| p.name == name);
        self.parts = rest;
        taken
            .into_iter()
            .map(|p| p.file)
            .filter(|f| !f.bytes.is_empty())
            .collect()
    }

    pub fn require_file(&mut self, name: &str) -> Result<UploadedFile, ApiError> {
        self.files(name)
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::bad_request(format!("{name} file is required")))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Boundary used by [`multipart_body`].
    pub const BOUNDARY: &str = "idsign-test-boundary";

    pub enum FormPart<'a> {
        Text(&'a str, &'a str),
        File {
            name: &'a str,
            filename: &'a str,
            content_type: &'a str,
            bytes: &'a [u8],
        },
    }

    /// Encode a `multipart/form-data` body.
    pub fn multipart_body(parts: &[FormPart<'_>]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                FormPart::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n")
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
                FormPart::File {
                    name,
                    filename,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                             Content-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    pub fn content_type() -> String {
        format!("multipart/form-data; boundary={BOUNDARY}")
    }
}
