// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Content-derived identifiers.
//!
//! Every id is a prefix plus the lowercase unpadded base32 of the first 15
//! bytes of a SHA-256 digest (24 characters, no padding). Identical inputs
//! produce byte-identical ids on every platform; that stability is what
//! makes rebuilt shards joinable.
//!
//! Stability classes:
//! - `entity_id`, `claim_id`, `evidence_addr`: stable, valid join keys.
//! - `span_id`: stable, commits to the evidence text; secondary key only.
//! - `provenance_id`: unstable by contract, never a sole join key.

use sha2::{Digest, Sha256};

use crate::canonical::canon;
use crate::error::{CoreError, CoreResult};

const ID_DIGEST_BYTES: usize = 15;

fn b32l15(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    data_encoding::BASE32_NOPAD
        .encode(&digest[..ID_DIGEST_BYTES])
        .to_ascii_lowercase()
}

fn reject_nul(s: &str) -> CoreResult<()> {
    if s.contains('\0') {
        return Err(CoreError::IdentityInput);
    }
    Ok(())
}

/// `e_` id scoped by namespace; both inputs are canonicalized first.
pub fn entity_id(namespace: &str, label: &str) -> CoreResult<String> {
    let ns = canon(namespace)?;
    let lb = canon(label)?;
    let mut buf = Vec::with_capacity(ns.len() + lb.len() + 1);
    buf.extend_from_slice(ns.as_bytes());
    buf.push(0);
    buf.extend_from_slice(lb.as_bytes());
    Ok(format!("e_{}", b32l15(&buf)))
}

/// `c_` id over the resolved subject, canonical predicate, object type tag,
/// and object value (target entity id, or the canonicalized literal).
pub fn claim_id(
    subject_id: &str,
    predicate: &str,
    object_type: &str,
    object_value: &str,
) -> CoreResult<String> {
    reject_nul(subject_id)?;
    reject_nul(object_type)?;
    reject_nul(object_value)?;
    let pred = canon(predicate)?;
    let mut buf = Vec::new();
    buf.extend_from_slice(subject_id.as_bytes());
    buf.push(0);
    buf.extend_from_slice(pred.as_bytes());
    buf.push(0);
    buf.extend_from_slice(object_type.as_bytes());
    buf.push(0);
    buf.extend_from_slice(object_value.as_bytes());
    Ok(format!("c_{}", b32l15(&buf)))
}

fn range_payload(source_hash: &str, byte_start: u64, byte_end: u64) -> CoreResult<Vec<u8>> {
    reject_nul(source_hash)?;
    Ok(format!("{source_hash}\u{0}{byte_start}\u{0}{byte_end}").into_bytes())
}

/// `ea_` address of an evidence byte range, independent of its text.
///
/// This is the stable join key for external extension tables.
pub fn evidence_addr(source_hash: &str, byte_start: u64, byte_end: u64) -> CoreResult<String> {
    Ok(format!(
        "ea_{}",
        b32l15(&range_payload(source_hash, byte_start, byte_end)?)
    ))
}

/// `s_` id of a span; unlike [`evidence_addr`] it commits to the text.
pub fn span_id(
    source_hash: &str,
    byte_start: u64,
    byte_end: u64,
    text: &str,
) -> CoreResult<String> {
    reject_nul(text)?;
    let mut buf = range_payload(source_hash, byte_start, byte_end)?;
    buf.push(0);
    buf.extend_from_slice(text.as_bytes());
    Ok(format!("s_{}", b32l15(&buf)))
}

/// `p_` id of a provenance row. Unstable by contract.
pub fn provenance_id(source_hash: &str, byte_start: u64, byte_end: u64) -> CoreResult<String> {
    Ok(format!(
        "p_{}",
        b32l15(&range_payload(source_hash, byte_start, byte_end)?)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_have_fixed_shape() {
        let id = entity_id("survival/medical", "tourniquet").unwrap();
        assert!(id.starts_with("e_"));
        assert_eq!(id.len(), 2 + 24);
        assert!(id[2..].chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn entity_ids_are_stable_across_calls() {
        let a = entity_id("medical", "Tranexamic Acid").unwrap();
        let b = entity_id("medical", "tranexamic   acid").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_labels_stay_distinct() {
        let a = entity_id("medical", "TXA").unwrap();
        let b = entity_id("medical", "tranexamic acid").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn namespace_scopes_entities() {
        let a = entity_id("medical", "pressure").unwrap();
        let b = entity_id("hydraulics", "pressure").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn claim_id_commits_to_object_type() {
        let subj = entity_id("n", "a").unwrap();
        let x = claim_id(&subj, "treats", "entity", "e_xxxxxxxxxxxxxxxxxxxxxxxx").unwrap();
        let y = claim_id(&subj, "treats", "literal:string", "e_xxxxxxxxxxxxxxxxxxxxxxxx").unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn span_id_differs_from_evidence_addr() {
        let h = "ab".repeat(32);
        let ea = evidence_addr(&h, 0, 49).unwrap();
        let sid = span_id(&h, 0, 49, "Apply tourniquet").unwrap();
        assert!(ea.starts_with("ea_"));
        assert!(sid.starts_with("s_"));
        assert_ne!(&ea[3..], &sid[2..]);
    }

    #[test]
    fn evidence_addr_ignores_text_changes() {
        let h = "cd".repeat(32);
        assert_eq!(
            evidence_addr(&h, 10, 20).unwrap(),
            evidence_addr(&h, 10, 20).unwrap()
        );
        assert_ne!(
            evidence_addr(&h, 10, 20).unwrap(),
            evidence_addr(&h, 10, 21).unwrap()
        );
    }

    #[test]
    fn nul_bytes_are_rejected_everywhere() {
        assert!(entity_id("ns", "a\0b").is_err());
        assert!(claim_id("e_x", "p", "entity", "v\0").is_err());
        assert!(span_id("h\0", 0, 1, "t").is_err());
        assert!(provenance_id("h", 0, 1).is_ok());
    }
}
