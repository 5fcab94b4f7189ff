// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Verification workflows.
//!
//! A workflow decides which identity checks gate an envelope. The gate is
//! evaluated against the latest recorded check results every time a result
//! arrives.

use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::repository::VerificationChecks;

/// Identifier used when a session does not name a workflow.
pub const DEFAULT_WORKFLOW_ID: &str = "standard";

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[schema(value_type = String)]
    pub id: &'static str,
    #[schema(value_type = String)]
    pub name: &'static str,
    pub document_verification_required: bool,
    pub face_match_required: bool,
    /// Minimum confidence (0..=1) a positive result must carry to count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

static BUILT_IN: [Workflow; 4] = [
    Workflow {
        id: "standard",
        name: "Document and face verification",
        document_verification_required: true,
        face_match_required: true,
        min_confidence: None,
    },
    Workflow {
        id: "document_only",
        name: "Document name verification",
        document_verification_required: true,
        face_match_required: false,
        min_confidence: None,
    },
    Workflow {
        id: "face_only",
        name: "Face match verification",
        document_verification_required: false,
        face_match_required: true,
        min_confidence: None,
    },
    Workflow {
        id: "high_assurance",
        name: "Document and face verification, confidence at least 0.8",
        document_verification_required: true,
        face_match_required: true,
        min_confidence: Some(0.8),
    },
];

/// Outcome of evaluating the verification gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Every required check is known and passed.
    Passed,
    /// At least one required check is known and failed.
    Failed,
    /// Some required check has no result yet.
    Undecided,
}

impl Workflow {
    /// Resolve a workflow id, `None` selecting the default.
    pub fn resolve(id: Option<&str>) -> Option<&'static Workflow> {
        let id = id.map(str::trim).filter(|s| !s.is_empty());
        let id = id.unwrap_or(DEFAULT_WORKFLOW_ID);
        BUILT_IN.iter().find(|w| w.id == id)
    }

    pub fn all() -> &'static [Workflow] {
        &BUILT_IN
    }

    pub fn evaluate(&self, checks: &VerificationChecks) -> GateOutcome {
        let required = [
            (
                self.document_verification_required,
                checks.name_verified,
                checks.name_confidence,
            ),
            (
                self.face_match_required,
                checks.face_verified,
                checks.face_confidence,
            ),
        ];

        let mut undecided = false;
        for (is_required, verified, confidence) in required {
            if !is_required {
                continue;
            }
            match verified {
                None => undecided = true,
                Some(false) => return GateOutcome::Failed,
                Some(true) => {
                    if let (Some(min), Some(c)) = (self.min_confidence, confidence) {
                        if c < min {
                            return GateOutcome::Failed;
                        }
                    }
                }
            }
        }

        if undecided {
            GateOutcome::Undecided
        } else {
            GateOutcome::Passed
        }
    }
}
