// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Webhook subscription repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::storage::database::{get_json, put_json, scan_json, DbResult, EnvelopeDb, WEBHOOKS};

/// Subscribes to every event.
pub const WILDCARD_EVENT: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredWebhook {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    /// HMAC key for `X-Webhook-Signature`. Returned only at registration.
    pub secret: String,
    pub created_at: DateTime<Utc>,
}

impl StoredWebhook {
    pub fn subscribes_to(&self, event: &str) -> bool {
        self.events
            .iter()
            .any(|e| e == event || e == WILDCARD_EVENT)
    }
}

/// Webhook without its secret.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookInfo {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<StoredWebhook> for WebhookInfo {
    fn from(hook: StoredWebhook) -> Self {
        Self {
            id: hook.id,
            url: hook.url,
            events: hook.events,
            created_at: hook.created_at,
        }
    }
}

pub struct WebhookRepository<'a> {
    db: &'a EnvelopeDb,
}

impl<'a> WebhookRepository<'a> {
    pub fn new(db: &'a EnvelopeDb) -> Self {
        Self { db }
    }

    pub fn create(&self, hook: &StoredWebhook) -> DbResult<()> {
        let write_txn = self.db.begin_write()?;
        put_json(&mut write_txn.open_table(WEBHOOKS)?, &hook.id, hook)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> DbResult<Option<StoredWebhook>> {
        let read_txn = self.db.begin_read()?;
        get_json(&read_txn.open_table(WEBHOOKS)?, id)
    }

    /// All webhooks, oldest first.
    pub fn list(&self) -> DbResult<Vec<StoredWebhook>> {
        let read_txn = self.db.begin_read()?;
        let mut hooks: Vec<StoredWebhook> = scan_json(&read_txn.open_table(WEBHOOKS)?)?;
        hooks.sort_by_key(|h| h.created_at);
        Ok(hooks)
    }

    /// Webhooks subscribed to `event` directly or through the wildcard.
    pub fn subscribers(&self, event: &str) -> DbResult<Vec<StoredWebhook>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|h| h.subscribes_to(event))
            .collect())
    }

    /// Returns whether a webhook was removed.
    pub fn delete(&self, id: &str) -> DbResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = write_txn.open_table(WEBHOOKS)?.remove(id)?.is_some();
        write_txn.commit()?;
        Ok(removed)
    }
}
