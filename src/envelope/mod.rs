// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Envelope Module
//!
//! The envelope state machine: status graph, verification workflows, the
//! lifecycle operations that move an envelope through the graph, and the
//! document signing flow that ties the PDF engine to an envelope.

pub mod lifecycle;
pub mod signing;
pub mod status;
pub mod workflow;

pub use lifecycle::{
    Actor, CheckResult, EnvelopeLifecycle, LifecycleError, PlaceholderCompletion, SigningLink,
    StatusChange, StatusSubmission, VerificationOutcome, VerificationUpdate,
};
pub use signing::{sign_document, SignedDocument, SigningError, SigningServices};
pub use status::EnvelopeStatus;
pub use workflow::{GateOutcome, Workflow};
