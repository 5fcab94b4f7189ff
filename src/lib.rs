// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! idsign - Identity-Verified E-Signature Envelope Service
//!
//! Takes documents into encrypted custody, gates signing behind document
//! name and face checks, stamps signatures onto PDFs and notifies
//! subscribers through signed webhooks.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - API keys, admin token and signing tokens
//! - `envelope` - Envelope state machine, workflows and signing
//! - `events` - Domain events and webhook delivery
//! - `pdf` - Signature stamping and evidence pages
//! - `storage` - redb database, audit log and encrypted blob vault
//! - `verification` - Vision backend client and name matching

pub mod api;
pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod events;
pub mod pdf;
pub mod state;
pub mod storage;
pub mod verification;
