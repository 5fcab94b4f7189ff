// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Domain events and outbound webhook delivery.

pub mod dispatcher;
pub mod webhooks;

pub use dispatcher::{names, DomainEvent, EventDispatcher, DEFAULT_CAPACITY};
pub use webhooks::{sign_payload, DeliveryReport, WebhookNotifier};
