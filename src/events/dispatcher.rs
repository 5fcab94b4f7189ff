// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain event dispatcher.
//!
//! Request handlers publish onto a bounded channel and return immediately;
//! the [`WebhookNotifier`](super::WebhookNotifier) drains it in the
//! background. Publishing never fails the caller: a full or closed channel
//! is logged and the event dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Event names delivered to webhook subscribers.
pub mod names {
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_DELETED: &str = "session.deleted";
    pub const VERIFICATION_COMPLETED: &str = "verification.completed";
    pub const ENVELOPE_VERIFIED: &str = "envelope.verified";
    pub const ENVELOPE_VERIFICATION_FAILED: &str = "envelope.verification_failed";
    pub const ENVELOPE_PREPARED: &str = "envelope.prepared";
    pub const ENVELOPE_STATUS_CHANGED: &str = "envelope.status_changed";
    pub const ENVELOPE_COMPLETED: &str = "envelope.completed";
    pub const ENVELOPE_EXPIRED: &str = "envelope.expired";
    pub const SIGNING_LINK_ISSUED: &str = "signing_link.issued";
    pub const DOCUMENT_SIGNED: &str = "document.signed";

    /// Every event a webhook may subscribe to.
    pub const ALL: [&str; 11] = [
        SESSION_CREATED,
        SESSION_DELETED,
        VERIFICATION_COMPLETED,
        ENVELOPE_VERIFIED,
        ENVELOPE_VERIFICATION_FAILED,
        ENVELOPE_PREPARED,
        ENVELOPE_STATUS_CHANGED,
        ENVELOPE_COMPLETED,
        ENVELOPE_EXPIRED,
        SIGNING_LINK_ISSUED,
        DOCUMENT_SIGNED,
    ];
}

/// Something that happened, as seen by webhook subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl DomainEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Cloneable publishing handle.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<DomainEvent>,
}

impl EventDispatcher {
    /// Create the dispatcher and the receiving end for the notifier.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue an event. Returns whether it was accepted.
    pub fn publish(&self, event: DomainEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(event = %event.event, "Event queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                debug!(event = %event.event, "Event queue closed, dropping event");
                false
            }
        }
    }
}
