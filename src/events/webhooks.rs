// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Webhook Notifier
//!
//! Background task that drains the event queue and POSTs each event to the
//! webhooks subscribed to it.
//!
//! Per event every subscriber is called concurrently with a bounded timeout.
//! The body is `{event, timestamp, data}` and carries
//! `X-Webhook-Signature: sha256=<hex(hmac(secret, body))>`. Failures are
//! logged and never retried; one slow or broken receiver cannot hold up the
//! others.
//!
//! ## Shutdown
//!
//! Uses `tokio_util::sync::CancellationToken`, the same way the other
//! background loops do.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::DomainEvent;
use crate::storage::repository::{StoredWebhook, WebhookRepository};
use crate::storage::EnvelopeDb;

pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Outcome of delivering one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub subscribers: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// `sha256=<hex>` signature for a webhook body.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

pub struct WebhookNotifier {
    db: Arc<EnvelopeDb>,
    http: Client,
    rx: mpsc::Receiver<DomainEvent>,
}

impl WebhookNotifier {
    pub fn new(
        db: Arc<EnvelopeDb>,
        rx: mpsc::Receiver<DomainEvent>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { db, http, rx })
    }

    /// Consume events until the token fires or every publisher is gone.
    ///
    /// ```rust,ignore
    /// tokio::spawn(notifier.run(shutdown.clone()));
    /// ```
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Webhook notifier starting");

        loop {
            let event = tokio::select! {
                event = self.rx.recv() => event,
                _ = shutdown.cancelled() => {
                    info!("Webhook notifier shutting down");
                    return;
                }
            };

            let Some(event) = event else {
                info!("Event queue closed, webhook notifier stopping");
                return;
            };

            let report = self.deliver(&event).await;
            if report.subscribers > 0 {
                info!(
                    event = %event.event,
                    subscribers = report.subscribers,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Webhook delivery finished"
                );
            }
        }
    }

    /// Deliver one event to every subscriber.
    pub async fn deliver(&self, event: &DomainEvent) -> DeliveryReport {
        let subscribers = match WebhookRepository::new(&self.db).subscribers(&event.event) {
            Ok(hooks) => hooks,
            Err(e) => {
                warn!(event = %event.event, error = %e, "Failed to load webhook subscribers");
                return DeliveryReport::default();
            }
        };

        debug!(
            event = %event.event,
            subscribers = subscribers.len(),
            data = %event.data,
            "Dispatching domain event"
        );

        if subscribers.is_empty() {
            return DeliveryReport::default();
        }

        let body = match serde_json::to_vec(event) {
            Ok(body) => Arc::new(body),
            Err(e) => {
                warn!(event = %event.event, error = %e, "Failed to serialize event");
                return DeliveryReport {
                    subscribers: subscribers.len(),
                    delivered: 0,
                    failed: subscribers.len(),
                };
            }
        };

        let mut report = DeliveryReport {
            subscribers: subscribers.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for hook in subscribers {
            let http = self.http.clone();
            let body = Arc::clone(&body);
            let name = event.event.clone();
            tasks.spawn(async move { post_one(&http, &hook, &name, &body).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.delivered += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    warn!(error = %e, "Webhook delivery task panicked");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

async fn post_one(http: &Client, hook: &StoredWebhook, event: &str, body: &[u8]) -> bool {
    let result = http
        .post(&hook.url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .header(EVENT_HEADER, event)
        .header(SIGNATURE_HEADER, sign_payload(&hook.secret, body))
        .body(body.to_vec())
        .send()
        .await;

    match result {
        Ok(resp) if resp.status().is_success() => {
            debug!(webhook_id = %hook.id, status = resp.status().as_u16(), "Webhook delivered");
            true
        }
        Ok(resp) => {
            warn!(
                webhook_id = %hook.id,
                url = %hook.url,
                status = resp.status().as_u16(),
                "Webhook receiver rejected event"
            );
            false
        }
        Err(e) => {
            warn!(webhook_id = %hook.id, url = %hook.url, error = %e, "Webhook delivery failed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::dispatcher::EventDispatcher;
    use crate::storage::repository::test_support::setup;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hook(url: String, events: &[&str]) -> StoredWebhook {
        StoredWebhook {
            id: uuid::Uuid::new_v4().to_string(),
            url,
            events: events.iter().map(|e| e.to_string()).collect(),
            secret: "whsec_test".into(),
            created_at: Utc::now(),
        }
    }

    async fn receiver(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn signature_is_hex_hmac_sha256() {
        // RFC 4231 test case 2
        let sig = sign_payload("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_block_the_others() {
        let (_temp, db) = setup();
        let ok_a = receiver(200).await;
        let ok_b = receiver(204).await;
        let broken = receiver(500).await;

        let repo = WebhookRepository::new(&db);
        repo.create(&hook(ok_a.uri(), &["envelope.completed"])).unwrap();
        repo.create(&hook(ok_b.uri(), &["*"])).unwrap();
        repo.create(&hook(broken.uri(), &["envelope.completed"])).unwrap();
        repo.create(&hook("http://127.0.0.1:9/unused".into(), &["session.created"]))
            .unwrap();

        let (_dispatcher, rx) = EventDispatcher::channel(4);
        let notifier =
            WebhookNotifier::new(Arc::new(db), rx, Duration::from_secs(5)).unwrap();

        let report = notifier
            .deliver(&DomainEvent::new("envelope.completed", json!({ "envelopeId": "e1" })))
            .await;

        assert_eq!(
            report,
            DeliveryReport {
                subscribers: 3,
                delivered: 2,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn delivery_carries_event_and_signature_headers() {
        let (_temp, db) = setup();
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-webhook-event", "document.signed"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        WebhookRepository::new(&db)
            .create(&hook(server.uri(), &["document.signed"]))
            .unwrap();

        let (_dispatcher, rx) = EventDispatcher::channel(4);
        let notifier =
            WebhookNotifier::new(Arc::new(db), rx, Duration::from_secs(5)).unwrap();
        let event = DomainEvent::new("document.signed", json!({ "applied": 1 }));
        notifier.deliver(&event).await;

        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let signature = request
            .headers
            .get("x-webhook-signature")
            .unwrap()
            .to_str()
            .unwrap();
        assert_eq!(signature, sign_payload("whsec_test", &request.body));

        let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(payload["event"], "document.signed");
        assert_eq!(payload["data"]["applied"], 1);
        assert!(payload["timestamp"].is_string());
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let (_temp, db) = setup();
        let (dispatcher, rx) = EventDispatcher::channel(4);
        let notifier =
            WebhookNotifier::new(Arc::new(db), rx, Duration::from_secs(5)).unwrap();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(notifier.run(shutdown.clone()));

        dispatcher.publish(DomainEvent::new("session.created", json!({})));
        shutdown.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("notifier did not stop")
            .unwrap();
    }
}
