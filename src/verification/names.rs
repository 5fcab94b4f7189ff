// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Local name comparison.
//!
//! Advisory only: the vision verdict decides. This flags obvious
//! disagreements between the claimed name and the one the model read off
//! the document.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Fold a name to lowercase ASCII-ish tokens: decompose, drop combining
/// marks, keep letters and digits.
pub fn name_tokens(name: &str) -> Vec<String> {
    let folded: String = name
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    folded.split_whitespace().map(str::to_string).collect()
}

/// Every claimed token appears on the document, in any order.
///
/// Extra document tokens (middle names) are allowed.
pub fn names_match(claimed: &str, extracted: &str) -> bool {
    let claimed = name_tokens(claimed);
    if claimed.is_empty() {
        return false;
    }
    let extracted = name_tokens(extracted);
    claimed.iter().all(|token| extracted.contains(token))
}
