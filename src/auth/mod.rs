// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Three credentials reach the API:
//!
//! 1. **API keys** (`idk_...`) for integrating services, sent as
//!    `x-api-key` or `Authorization: Bearer`.
//! 2. **Admin token** for `/admin`, sent as `Authorization: Bearer`.
//! 3. **Signing tokens** minted with a signing link, sent as
//!    `x-signing-token` or `?token=`. A token is bound to one envelope.
//!
//! ## Security
//!
//! - API keys are stored as salted HMAC-SHA256 digests, never in clear
//! - The admin token is held only as an HMAC digest under a process key
//! - All digest comparisons are constant-time
//! - Failed attempts are written to the audit log

pub mod api_keys;
pub mod error;
pub mod extractor;

pub use api_keys::{authenticate_api_key, new_api_key, AdminCredential};
pub use error::AuthError;
pub use extractor::{AdminOnly, ApiKeyAuth, ApiPrincipal, ClientIp, SigningAccess};
