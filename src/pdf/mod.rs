// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PDF signing engine.
//!
//! Pure and synchronous: bytes in, bytes out. Repository bookkeeping and
//! evidence retrieval live in [`crate::envelope::signing`].

pub mod geometry;
pub mod raster;
pub mod signer;

pub use signer::{
    PdfError, PdfSigner, SignatureBatch, SignatureEntry, SignedPdf, SkippedEntry, EVIDENCE_TITLE,
};
