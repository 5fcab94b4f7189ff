// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity verification against a remote vision model.

pub mod client;
pub mod names;
pub mod parse;

pub use client::{
    DocumentNameVerdict, FaceVerdict, ImageInput, VerificationClient, VerificationError,
};
