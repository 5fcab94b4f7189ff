// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Session lifecycle, verification outcomes, signing, authentication
//! failures and administrative actions are appended to the `audit_events`
//! table, keyed by timestamp so date ranges are a single range scan.

use chrono::{DateTime, NaiveDate, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::database::{DbResult, EnvelopeDb, AUDIT_EVENTS};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Session events
    SessionCreated,
    SessionDeleted,
    SessionAccessed,

    // Document events
    DocumentDownloaded,
    DocumentSigned,

    // Verification events
    DocumentNameVerified,
    FaceVerificationAttempted,

    // Envelope events
    EnvelopeStatusChanged,
    SigningLinkIssued,
    SignatureSubmitted,

    // Webhook events
    WebhookRegistered,
    WebhookDeleted,

    // Auth events
    AuthFailure,
    ApiKeyCreated,
    ApiKeyRevoked,

    // Admin events
    AdminAccess,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Actor that triggered the event (API key id, "admin", signing token).
    pub user_id: Option<String>,
    /// Resource affected (envelope id, webhook id, etc.).
    pub resource_id: Option<String>,
    /// Resource type (envelope, webhook, etc.).
    pub resource_type: Option<String>,
    /// IP address of the request (if available).
    pub ip_address: Option<String>,
    /// Additional details as JSON.
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            ip_address: None,
            details: None,
            success: true,
            error: None,
        }
    }

    /// Set the acting user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the resource.
    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    /// Set the IP address, if known.
    pub fn with_ip(mut self, ip: Option<impl Into<String>>) -> Self {
        self.ip_address = ip.map(Into::into);
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Composite key: big-endian millis then event id, so keys sort by time.
fn event_key(event: &AuditEvent) -> Vec<u8> {
    let millis = event.timestamp.timestamp_millis().max(0) as u64;
    let mut key = Vec::with_capacity(8 + 1 + event.event_id.len());
    key.extend_from_slice(&millis.to_be_bytes());
    key.push(b'|');
    key.extend_from_slice(event.event_id.as_bytes());
    key
}

/// Start-of-day bound in millis for a date.
fn day_start_millis(date: NaiveDate) -> u64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis().max(0) as u64)
        .unwrap_or(0)
}

/// Repository for audit events.
pub struct AuditRepository<'a> {
    db: &'a EnvelopeDb,
}

impl<'a> AuditRepository<'a> {
    /// Create a new audit repository.
    pub fn new(db: &'a EnvelopeDb) -> Self {
        Self { db }
    }

    /// Append an audit event.
    pub fn log(&self, event: &AuditEvent) -> DbResult<()> {
        let key = event_key(event);
        let json = serde_json::to_vec(event)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(AUDIT_EVENTS)?;
            table.insert(key.as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read audit events for a specific date.
    pub fn read_events(&self, date: NaiveDate) -> DbResult<Vec<AuditEvent>> {
        self.read_events_range(date, date)
    }

    /// Read events for an inclusive date range, oldest first.
    pub fn read_events_range(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> DbResult<Vec<AuditEvent>> {
        let start = day_start_millis(start_date).to_be_bytes();
        let end = match end_date.succ_opt() {
            Some(next) => day_start_millis(next),
            None => u64::MAX,
        }
        .to_be_bytes();

        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(AUDIT_EVENTS)?;

        let mut events = Vec::new();
        for entry in table.range(start.as_slice()..end.as_slice())? {
            let entry = entry?;
            events.push(serde_json::from_slice(entry.1.value())?);
        }
        Ok(events)
    }

    /// Search events by acting user.
    pub fn search_by_user(&self, user_id: &str, date: NaiveDate) -> DbResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }

    /// Search events by resource.
    pub fn search_by_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
        date: NaiveDate,
    ) -> DbResult<Vec<AuditEvent>> {
        let events = self.read_events(date)?;
        Ok(events
            .into_iter()
            .filter(|e| {
                e.resource_type.as_deref() == Some(resource_type)
                    && e.resource_id.as_deref() == Some(resource_id)
            })
            .collect())
    }
}

/// Append an audit event, logging (never propagating) a write failure.
#[macro_export]
macro_rules! audit_log {
    ($db:expr, $event:expr) => {{
        let event = $event;
        if let Err(e) = $crate::storage::AuditRepository::new($db).log(&event) {
            tracing::warn!(
                error = %e,
                event_type = ?event.event_type,
                "Failed to write audit event"
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn setup() -> (TempDir, EnvelopeDb) {
        let temp = TempDir::new().unwrap();
        let db = EnvelopeDb::open(&temp.path().join("audit.redb")).unwrap();
        (temp, db)
    }

    fn at(event: AuditEvent, y: i32, m: u32, d: u32, h: u32) -> AuditEvent {
        AuditEvent {
            timestamp: Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap(),
            ..event
        }
    }

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::SessionCreated)
            .with_user("key_123")
            .with_resource("envelope", "env_abc")
            .with_ip(Some("192.168.1.1"));

        assert_eq!(event.event_type, AuditEventType::SessionCreated);
        assert_eq!(event.user_id, Some("key_123".to_string()));
        assert_eq!(event.resource_type, Some("envelope".to_string()));
        assert_eq!(event.resource_id, Some("env_abc".to_string()));
        assert_eq!(event.ip_address, Some("192.168.1.1".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::AuthFailure)
            .with_ip(None::<String>)
            .failed("Invalid API key");

        assert!(!event.success);
        assert!(event.ip_address.is_none());
        assert_eq!(event.error, Some("Invalid API key".to_string()));
    }

    #[test]
    fn log_and_read_events() {
        let (_temp, db) = setup();
        let repo = AuditRepository::new(&db);

        repo.log(&at(AuditEvent::new(AuditEventType::SessionCreated), 2026, 3, 1, 9))
            .unwrap();
        repo.log(&at(AuditEvent::new(AuditEventType::DocumentSigned), 2026, 3, 1, 10))
            .unwrap();
        repo.log(&at(AuditEvent::new(AuditEventType::SessionDeleted), 2026, 3, 2, 0))
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let events = repo.read_events(day).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::SessionCreated);
        assert_eq!(events[1].event_type, AuditEventType::DocumentSigned);
    }

    #[test]
    fn range_is_inclusive_of_both_days() {
        let (_temp, db) = setup();
        let repo = AuditRepository::new(&db);

        for day in 1..=4 {
            repo.log(&at(AuditEvent::new(AuditEventType::AdminAccess), 2026, 3, day, 23))
                .unwrap();
        }

        let events = repo
            .read_events_range(
                NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
                NaiveDate::from_ymd_opt(2026, 3, 3).unwrap(),
            )
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn search_by_user_and_resource() {
        let (_temp, db) = setup();
        let repo = AuditRepository::new(&db);

        repo.log(
            &AuditEvent::new(AuditEventType::EnvelopeStatusChanged)
                .with_user("key_target")
                .with_resource("envelope", "e1"),
        )
        .unwrap();
        repo.log(
            &AuditEvent::new(AuditEventType::SigningLinkIssued)
                .with_user("key_other")
                .with_resource("envelope", "e1"),
        )
        .unwrap();
        repo.log(
            &AuditEvent::new(AuditEventType::WebhookRegistered)
                .with_user("key_other")
                .with_resource("webhook", "w1"),
        )
        .unwrap();

        let today = Utc::now().date_naive();
        let by_user = repo.search_by_user("key_target", today).unwrap();
        assert_eq!(by_user.len(), 1);

        let by_resource = repo.search_by_resource("envelope", "e1", today).unwrap();
        assert_eq!(by_resource.len(), 2);
    }

    #[test]
    fn audit_macro_writes_event() {
        let (_temp, db) = setup();
        crate::audit_log!(
            &db,
            AuditEvent::new(AuditEventType::AdminAccess).with_user("admin")
        );

        let events = AuditRepository::new(&db)
            .read_events(Utc::now().date_naive())
            .unwrap();
        assert_eq!(events.len(), 1);
    }
}
