// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vision backend client for identity checks.
//!
//! Talks to any OpenAI-compatible chat-completions endpoint. Each check is
//! one request carrying the images as base64 data URLs and asking for a JSON
//! object back. The model is a black box: the client only shapes the prompt
//! and interprets the verdict.

use std::time::Duration;

use base64ct::{Base64, Encoding};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::names::names_match;
use super::parse::{
    normalize_confidence, parse_verdict, ParsedVerdict, RawDocumentNameVerdict, RawFaceVerdict,
};
use crate::config::VisionConfig;

const DOCUMENT_NAME_PROMPT: &str = "You are an identity document inspector. Read the full legal \
name printed on the government-issued ID in the image and compare it with the claimed name. \
Respond with a JSON object only: {\"name_verified\": boolean, \"confidence\": number between 0 \
and 1, \"reason\": string, \"extracted_name\": string, \"document_type\": string}.";

const FACE_PROMPT: &str = "You are a face verification system. The first image is a live selfie, \
the second is a government-issued ID. Decide whether they show the same person. Respond with a \
JSON object only: {\"face_verified\": boolean, \"confidence\": number between 0 and 1, \
\"reason\": string}.";

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("vision request failed: {0}")]
    Request(String),

    #[error("vision request timed out")]
    Timeout,

    #[error("vision backend returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The model answered but no verdict could be read from it.
    #[error("vision response malformed: {0}")]
    ResponseMalformed(String),
}

impl From<reqwest::Error> for VerificationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e.to_string())
        }
    }
}

/// Image handed to the vision model.
#[derive(Debug, Clone, Copy)]
pub struct ImageInput<'a> {
    pub bytes: &'a [u8],
    pub content_type: &'a str,
}

impl ImageInput<'_> {
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            Base64::encode_string(self.bytes)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNameVerdict {
    pub name_verified: bool,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
    pub extracted_name: Option<String>,
    pub document_type: Option<String>,
    /// Local Unicode-normalized comparison. Advisory; never overrides
    /// `name_verified`.
    pub local_name_match: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FaceVerdict {
    pub face_verified: bool,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageResponse,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerificationClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl VerificationClient {
    pub fn new(config: &VisionConfig) -> Result<Self, VerificationError> {
        Self::with_timeout(config, config.timeout)
    }

    fn with_timeout(config: &VisionConfig, timeout: Duration) -> Result<Self, VerificationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerificationError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Compare the name printed on an ID image with the claimed name.
    pub async fn verify_document_name(
        &self,
        document: ImageInput<'_>,
        claimed_name: &str,
    ) -> Result<DocumentNameVerdict, VerificationError> {
        let content = json!([
            { "type": "text", "text": format!("Claimed name: {claimed_name}") },
            { "type": "image_url", "image_url": { "url": document.data_url() } },
        ]);
        let reply = self.complete(DOCUMENT_NAME_PROMPT, content).await?;

        let raw: RawDocumentNameVerdict = match parse_verdict(&reply) {
            ParsedVerdict::Parsed(v) => v,
            ParsedVerdict::Malformed { reason } => {
                warn!(%reason, "Unreadable document name verdict");
                return Err(VerificationError::ResponseMalformed(reason));
            }
        };

        let local_name_match = raw
            .extracted_name
            .as_deref()
            .map(|extracted| names_match(claimed_name, extracted));
        if local_name_match == Some(false) && raw.name_verified {
            warn!("Vision verdict and local name comparison disagree");
        }

        Ok(DocumentNameVerdict {
            name_verified: raw.name_verified,
            confidence: normalize_confidence(raw.confidence),
            reason: raw.reason,
            extracted_name: raw.extracted_name,
            document_type: raw.document_type,
            local_name_match,
        })
    }

    /// Decide whether a selfie and an ID image show the same person.
    pub async fn verify_face(
        &self,
        selfie: ImageInput<'_>,
        document: ImageInput<'_>,
    ) -> Result<FaceVerdict, VerificationError> {
        let content = json!([
            { "type": "text", "text": "Image 1: selfie. Image 2: ID document." },
            { "type": "image_url", "image_url": { "url": selfie.data_url() } },
            { "type": "image_url", "image_url": { "url": document.data_url() } },
        ]);
        let reply = self.complete(FACE_PROMPT, content).await?;

        match parse_verdict::<RawFaceVerdict>(&reply) {
            ParsedVerdict::Parsed(raw) => Ok(FaceVerdict {
                face_verified: raw.face_verified,
                confidence: normalize_confidence(raw.confidence),
                reason: raw.reason,
            }),
            ParsedVerdict::Malformed { reason } => {
                warn!(%reason, "Unreadable face verdict");
                Err(VerificationError::ResponseMalformed(reason))
            }
        }
    }

    /// One chat completion; returns the first choice's message text.
    async fn complete(&self, system: &str, user_content: Value) -> Result<String, VerificationError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user_content },
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0,
        });

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VerificationError::Upstream {
                status: status.as_u16(),
                body: truncate(&body, 512),
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| VerificationError::ResponseMalformed(e.to_string()))?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| VerificationError::ResponseMalformed("no message content".to_string()))?;

        debug!(model = %self.model, bytes = content.len(), "Vision reply received");
        Ok(content)
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
