// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Envelope status and its transition graph.
//!
//! ```text
//! pending             -> verified | verification_failed | voided
//! verification_failed -> verified | verification_failed | voided
//! verified            -> prepared | completed | signing_declined | signing_deferred | voided
//! prepared            -> completed | signing_declined | signing_deferred | voided
//! signing_deferred    -> completed | signing_declined | voided
//! any non-terminal    -> expired   (once now > expires_at)
//! ```
//!
//! Terminal statuses: `completed`, `signing_declined`, `voided`, `expired`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Authoritative status of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Pending,
    Verified,
    VerificationFailed,
    Prepared,
    SigningDeferred,
    SigningDeclined,
    Completed,
    Voided,
    Expired,
}

impl EnvelopeStatus {
    pub const ALL: [EnvelopeStatus; 9] = [
        Self::Pending,
        Self::Verified,
        Self::VerificationFailed,
        Self::Prepared,
        Self::SigningDeferred,
        Self::SigningDeclined,
        Self::Completed,
        Self::Voided,
        Self::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::VerificationFailed => "verification_failed",
            Self::Prepared => "prepared",
            Self::SigningDeferred => "signing_deferred",
            Self::SigningDeclined => "signing_declined",
            Self::Completed => "completed",
            Self::Voided => "voided",
            Self::Expired => "expired",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::SigningDeclined | Self::Voided | Self::Expired
        )
    }

    /// Statuses that may be explicitly requested from this one.
    ///
    /// `expired` is never listed: it is applied by the clock, not requested.
    pub fn allowed_next(&self) -> &'static [EnvelopeStatus] {
        use EnvelopeStatus::*;
        match self {
            Pending => &[Verified, VerificationFailed, Voided],
            VerificationFailed => &[Verified, VerificationFailed, Voided],
            Verified => &[Prepared, Completed, SigningDeclined, SigningDeferred, Voided],
            Prepared => &[Completed, SigningDeclined, SigningDeferred, Voided],
            SigningDeferred => &[Completed, SigningDeclined, Voided],
            Completed | SigningDeclined | Voided | Expired => &[],
        }
    }

    pub fn can_transition_to(&self, next: EnvelopeStatus) -> bool {
        if next == Self::Expired {
            return !self.is_terminal();
        }
        self.allowed_next().contains(&next)
    }

    /// A signing link may only be issued from these statuses.
    pub fn can_issue_signing_link(&self) -> bool {
        matches!(self, Self::Verified | Self::Prepared)
    }

    /// A document may be signed against the envelope from these statuses.
    pub fn accepts_signatures(&self) -> bool {
        matches!(
            self,
            Self::Verified | Self::Prepared | Self::SigningDeferred
        )
    }
}

impl fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown envelope status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for EnvelopeStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}
