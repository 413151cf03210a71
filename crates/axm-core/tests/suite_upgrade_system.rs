// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Suite independence: the same candidate stream compiled under the legacy
//! and post-quantum suites must agree on every identifier and every table
//! byte, and differ only in root, signature, and suite tagging.

mod common;

use std::fs;

use axm_core::compiler::compile_shard;
use axm_core::suite::{Suite, MLDSA44_PUBLIC_KEY_LEN, MLDSA44_SIGNATURE_LEN};
use axm_core::tables::read_claims;
use axm_core::verifier::verify_shard;
use axm_core::PolicyLimits;

use common::*;

const TABLES: [&str; 4] = [
    "graph/entities.parquet",
    "graph/claims.parquet",
    "graph/provenance.parquet",
    "evidence/spans.parquet",
];

#[test]
fn legacy_and_pq_shards_share_tables_but_not_roots() {
    let workspace = tempfile::tempdir().unwrap();
    let legacy_key = ed25519_key();
    let pq_key = signing_key_for(Suite::MlDsa44);

    let (legacy, legacy_pub) = compile_gold(workspace.path(), Suite::Ed25519, &legacy_key);
    let (pq, pq_pub) = compile_gold(workspace.path(), Suite::MlDsa44, &pq_key);

    assert!(verify_shard(&legacy, &legacy_pub, &PolicyLimits::default())
        .unwrap()
        .passed());
    assert!(verify_shard(&pq, &pq_pub, &PolicyLimits::default())
        .unwrap()
        .passed());

    // Identity and table bytes are suite-independent.
    for table in TABLES {
        assert_eq!(
            fs::read(legacy.join(table)).unwrap(),
            fs::read(pq.join(table)).unwrap(),
            "table {table} must be byte-identical across suites"
        );
    }
    let legacy_claims = read_claims(&legacy.join(TABLES[1]), TABLES[1]).unwrap();
    let pq_claims = read_claims(&pq.join(TABLES[1]), TABLES[1]).unwrap();
    assert_eq!(legacy_claims, pq_claims);

    // Roots, ids, signatures, and suite tagging all differ.
    let legacy_manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(legacy.join("manifest.json")).unwrap()).unwrap();
    let pq_manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(pq.join("manifest.json")).unwrap()).unwrap();

    assert_ne!(legacy_manifest["shard_id"], pq_manifest["shard_id"]);
    assert!(legacy_manifest.get("suite").is_none());
    assert_eq!(pq_manifest["suite"], "axm-blake3-mldsa44");
    assert_eq!(legacy_manifest["spec_version"], "1.0.0");
    assert_eq!(pq_manifest["spec_version"], "1.1.0");

    assert_eq!(fs::read(legacy.join("sig/manifest.sig")).unwrap().len(), 64);
    assert_eq!(
        fs::read(pq.join("sig/manifest.sig")).unwrap().len(),
        MLDSA44_SIGNATURE_LEN
    );
    assert_eq!(
        fs::read(pq.join("sig/publisher.pub")).unwrap().len(),
        MLDSA44_PUBLIC_KEY_LEN
    );
}

#[test]
fn compile_is_byte_for_byte_deterministic() {
    let workspace = tempfile::tempdir().unwrap();
    let key = signing_key_for(Suite::MlDsa44);
    let (content_dir, source_hash) = write_gold_content(workspace.path());
    let candidates = gold_candidates(&source_hash);

    let out_a = workspace.path().join("a");
    let out_b = workspace.path().join("b");
    for out in [&out_a, &out_b] {
        compile_shard(
            &candidates,
            &content_dir,
            out,
            &gold_metadata(),
            &key,
            &PolicyLimits::default(),
        )
        .unwrap();
    }

    for rel in TABLES
        .iter()
        .copied()
        .chain(["manifest.json", "sig/manifest.sig", "sig/publisher.pub", "content/source.txt"])
    {
        assert_eq!(
            fs::read(out_a.join(rel)).unwrap(),
            fs::read(out_b.join(rel)).unwrap(),
            "{rel} must be byte-identical across rebuilds"
        );
    }
}

#[test]
fn legacy_shard_without_suite_field_verifies_by_key_size() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(shard.join("manifest.json")).unwrap()).unwrap();
    assert!(manifest.get("suite").is_none());

    // Detection must fall back to the 32-byte key.
    let report = verify_shard(&shard, &trusted, &PolicyLimits::default()).unwrap();
    assert!(report.passed());
}
