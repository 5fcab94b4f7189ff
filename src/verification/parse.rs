// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verdict extraction from free-form model output.
//!
//! Models are asked for a JSON object but do not always comply. Parsing is
//! two-stage: the whole message as strict JSON, then the first balanced
//! `{...}` substring. Anything else is [`ParsedVerdict::Malformed`] and the
//! caller must treat it as a failure, never as a pass.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Largest embedded object the fallback scanner will consider.
pub const MAX_EMBEDDED_OBJECT_BYTES: usize = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedVerdict<T> {
    Parsed(T),
    Malformed { reason: String },
}

pub fn parse_verdict<T: DeserializeOwned>(content: &str) -> ParsedVerdict<T> {
    let strict_err = match serde_json::from_str::<T>(content.trim()) {
        Ok(value) => return ParsedVerdict::Parsed(value),
        Err(e) => e,
    };

    match extract_first_object(content) {
        Some(object) => match serde_json::from_str::<T>(object) {
            Ok(value) => ParsedVerdict::Parsed(value),
            Err(e) => ParsedVerdict::Malformed {
                reason: format!("embedded object did not match verdict shape: {e}"),
            },
        },
        None => ParsedVerdict::Malformed {
            reason: format!("no JSON object in response: {strict_err}"),
        },
    }
}

/// First balanced `{...}` substring, aware of strings and escapes.
///
/// Returns `None` when no object closes within [`MAX_EMBEDDED_OBJECT_BYTES`].
pub fn extract_first_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if offset >= MAX_EMBEDDED_OBJECT_BYTES {
            return None;
        }
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    // Braces are ASCII so both ends are char boundaries
                    return Some(&content[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Read confidence as a fraction. Values in (1, 100] are percentages.
pub fn normalize_confidence(raw: Option<f64>) -> Option<f64> {
    let value = raw?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value <= 1.0 {
        Some(value)
    } else if value <= 100.0 {
        Some(value / 100.0)
    } else {
        None
    }
}

// =============================================================================
// Raw model verdicts
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawFaceVerdict {
    #[serde(alias = "faceVerified", alias = "match", alias = "is_match")]
    pub face_verified: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawDocumentNameVerdict {
    #[serde(alias = "nameVerified", alias = "name_match", alias = "nameMatch")]
    pub name_verified: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, alias = "extractedName")]
    pub extracted_name: Option<String>,
    #[serde(default, alias = "documentType")]
    pub document_type: Option<String>,
}
