// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Deterministic text and JSON canonicalization.
//!
//! Two distinct canonical forms live here:
//!
//! - [`canon`] normalizes strings that feed identity computation
//!   (NFC, case fold, control strip, whitespace collapse, trim).
//! - [`canonical_json_bytes`] produces the exact byte sequence that is
//!   signed for normative artifacts: keys sorted at every nesting level,
//!   compact separators, non-ASCII preserved as UTF-8.

use serde::Serialize;
use serde_json::{Map, Value};
use unicode_normalization::UnicodeNormalization;

use crate::error::{CoreError, CoreResult};

/// Canonicalize an identity-input string.
///
/// Steps, in order: NFC normalize, Unicode default case fold, remove code
/// points below 0x20 and 0x7F, collapse every White_Space run to a single
/// space, trim. Inputs containing a NUL byte are rejected.
pub fn canon(input: &str) -> CoreResult<String> {
    if input.contains('\0') {
        return Err(CoreError::IdentityInput);
    }

    let nfc: String = input.nfc().collect();
    let folded = caseless::default_case_fold_str(&nfc);

    let mut out = String::with_capacity(folded.len());
    let mut pending_space = false;
    for ch in folded.chars() {
        let cp = ch as u32;
        if cp < 0x20 || cp == 0x7F {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(ch);
    }
    Ok(out)
}

fn sort_json(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, val) in entries {
                sorted.insert(k, sort_json(val));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// Canonical JSON encoding of any serializable value.
///
/// The output is the byte sequence covered by the manifest signature:
/// identical logical values must always encode to identical bytes.
pub fn canonical_json_bytes(v: &impl Serialize) -> CoreResult<Vec<u8>> {
    let value = serde_json::to_value(v)?;
    Ok(serde_json::to_vec(&sort_json(value))?)
}

/// Canonical JSON re-encoding of raw JSON text.
pub fn canonicalize_json_text(text: &str) -> CoreResult<Vec<u8>> {
    let value: Value = serde_json::from_str(text)?;
    canonical_json_bytes(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn collapses_case_and_whitespace() {
        assert_eq!(canon("Tranexamic   Acid").unwrap(), "tranexamic acid");
        assert_eq!(canon("  TXA\t ").unwrap(), "txa");
    }

    #[test]
    fn strips_ascii_controls_before_collapsing() {
        // 0x07 is a control, not whitespace: it disappears entirely.
        assert_eq!(canon("a\u{0007}b").unwrap(), "ab");
        // Tabs and newlines are controls too, so they are removed rather
        // than collapsed; surrounding spaces still collapse to one.
        assert_eq!(canon("a \t b").unwrap(), "a b");
    }

    #[test]
    fn folds_beyond_simple_lowercase() {
        assert_eq!(canon("Straße").unwrap(), "strasse");
    }

    #[test]
    fn nfc_normalizes_decomposed_input() {
        // "é" composed vs "e" + combining acute
        assert_eq!(canon("caf\u{00e9}").unwrap(), canon("cafe\u{0301}").unwrap());
    }

    #[test]
    fn rejects_nul() {
        assert!(matches!(canon("a\0b"), Err(CoreError::IdentityInput)));
    }

    #[test]
    fn canonical_json_sorts_keys_and_stays_compact() {
        let v = json!({"b": 1, "a": {"z": true, "m": [2, 1]}});
        let bytes = canonical_json_bytes(&v).unwrap();
        assert_eq!(bytes, br#"{"a":{"m":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn canonical_json_preserves_non_ascii() {
        let v = json!({"title": "§ 271 — naïve"});
        let bytes = canonical_json_bytes(&v).unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("§ 271 — naïve"));
    }

    #[test]
    fn canonical_json_fixpoint() {
        let v = json!({"b": [1, {"y": 2, "x": 3}], "a": "ü"});
        let once = canonical_json_bytes(&v).unwrap();
        let twice = canonicalize_json_text(std::str::from_utf8(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    proptest! {
        #[test]
        fn canon_is_idempotent(s in "\\PC{0,64}") {
            if let Ok(once) = canon(&s) {
                let twice = canon(&once).unwrap();
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn canon_output_has_no_controls_or_double_spaces(s in "\\PC{0,64}") {
            if let Ok(out) = canon(&s) {
                prop_assert!(!out.chars().any(|c| (c as u32) < 0x20 || c as u32 == 0x7F));
                prop_assert!(!out.contains("  "));
                prop_assert!(!out.starts_with(' ') && !out.ends_with(' '));
            }
        }
    }
}
