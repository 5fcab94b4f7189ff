// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to the envelope database.
//!
//! Each repository borrows the [`EnvelopeDb`](super::EnvelopeDb) and owns
//! the transactions for one entity family.

pub mod api_keys;
pub mod envelopes;
pub mod sessions;
pub mod webhooks;

pub use api_keys::{ApiKeyInfo, ApiKeyRepository, StoredApiKey};
pub use envelopes::{
    EnvelopeRepository, FaceVerificationAttempt, NewPlaceholder, NewSignature, SignatureConsent,
    SignatureHash, SignaturePlaceholder, SignatureType, SigningToken, StoredEnvelope,
    StoredSignature, VerificationChecks,
};
pub use sessions::{
    DeletedSession, NewDocument, NewSession, Recipient, SessionCreated, SessionRepository,
    SessionSnapshot, SessionSummary, StoredDocument,
};
pub use webhooks::{StoredWebhook, WebhookInfo, WebhookRepository, WILDCARD_EVENT};
