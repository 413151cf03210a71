// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The ext/ envelope: Merkle-covered, otherwise opaque, and invisible to
//! the shard id while empty.

mod common;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axm_core::extensions::{ExtensionRegistry, ExtensionValidator};
use axm_core::suite::Suite;
use axm_core::verifier::{verify_shard, verify_shard_with_registry};
use axm_core::{ErrorCode, PolicyLimits, VerifyIssue};

use common::*;

fn shard_id_of(shard: &Path) -> String {
    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(shard.join("manifest.json")).unwrap()).unwrap();
    manifest["shard_id"].as_str().unwrap().to_string()
}

#[test]
fn compiler_emits_empty_ext_dir_and_no_extensions_key() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, _) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    assert!(shard.join("ext").is_dir());
    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(shard.join("manifest.json")).unwrap()).unwrap();
    assert!(manifest.get("extensions").is_none());
}

#[test]
fn empty_ext_dir_is_invisible_to_the_shard_id() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    let with_empty_ext = shard_id_of(&shard);
    assert!(verify_shard(&shard, &trusted, &PolicyLimits::default())
        .unwrap()
        .passed());

    // Removing the empty directory changes neither the id nor the verdict.
    fs::remove_dir(shard.join("ext")).unwrap();
    assert_eq!(shard_id_of(&shard), with_empty_ext);
    assert!(verify_shard(&shard, &trusted, &PolicyLimits::default())
        .unwrap()
        .passed());
}

#[test]
fn ext_table_added_without_resealing_breaks_the_root() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    fs::write(shard.join("ext/locators@1.parquet"), b"placeholder").unwrap();
    let report = verify_shard(&shard, &trusted, &PolicyLimits::default()).unwrap();
    assert!(!report.passed());
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].code, ErrorCode::MerkleMismatch);
}

#[test]
fn ext_table_with_reseal_verifies_and_is_declared() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    fs::write(shard.join("ext/locators@1.parquet"), b"placeholder").unwrap();
    reseal(&shard, &key);

    let report = verify_shard(&shard, &trusted, &PolicyLimits::default()).unwrap();
    assert!(report.passed(), "{:?}", report.errors);

    let manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(shard.join("manifest.json")).unwrap()).unwrap();
    assert_eq!(manifest["extensions"], serde_json::json!(["locators@1"]));
}

#[test]
fn stale_extensions_declaration_is_a_schema_error() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    // Declare a ghost extension without shipping it. The root is unchanged
    // (manifest edits are outside Merkle coverage), so only the coherence
    // check can catch this.
    let mut manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(shard.join("manifest.json")).unwrap()).unwrap();
    manifest["extensions"] = serde_json::json!(["ghost@1"]);
    let bytes = axm_core::canonical::canonical_json_bytes(&manifest).unwrap();
    fs::write(shard.join("manifest.json"), &bytes).unwrap();
    fs::write(shard.join("sig/manifest.sig"), key.sign(&bytes)).unwrap();

    let report = verify_shard(&shard, &trusted, &PolicyLimits::default()).unwrap();
    assert!(!report.passed());
    assert!(report
        .errors
        .iter()
        .any(|e| e.code == ErrorCode::ManifestSchema && e.message.contains("extensions")));
}

#[test]
fn misnamed_ext_table_is_dirty_layout() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    fs::write(shard.join("ext/locators.parquet"), b"no version tag").unwrap();
    let report = verify_shard(&shard, &trusted, &PolicyLimits::default()).unwrap();
    assert!(!report.passed());
    assert!(report
        .errors
        .iter()
        .any(|e| e.code == ErrorCode::LayoutDirty && e.location == "ext/locators.parquet"));
}

struct RejectEverything;

impl ExtensionValidator for RejectEverything {
    fn validate(&self, _table_path: &Path, rel: &str) -> Vec<VerifyIssue> {
        vec![VerifyIssue::new(
            ErrorCode::SchemaType,
            rel,
            "extension table rejected by its validator",
        )]
    }
}

#[test]
fn registered_validator_runs_and_unknown_tags_stay_inert() {
    let workspace = tempfile::tempdir().unwrap();
    let key = ed25519_key();
    let (shard, trusted) = compile_gold(workspace.path(), Suite::Ed25519, &key);

    fs::write(shard.join("ext/locators@1.parquet"), b"placeholder").unwrap();
    reseal(&shard, &key);

    // Unregistered: the table is inert bytes.
    assert!(verify_shard(&shard, &trusted, &PolicyLimits::default())
        .unwrap()
        .passed());

    // Registered under a different tag: still inert.
    let mut other = ExtensionRegistry::new();
    other.register("locators@2", Arc::new(RejectEverything));
    assert!(
        verify_shard_with_registry(&shard, &trusted, &PolicyLimits::default(), &other)
            .unwrap()
            .passed()
    );

    // Registered under the shipped tag: the validator's findings count.
    let mut registry = ExtensionRegistry::new();
    registry.register("locators@1", Arc::new(RejectEverything));
    let report =
        verify_shard_with_registry(&shard, &trusted, &PolicyLimits::default(), &registry).unwrap();
    assert!(!report.passed());
    assert_eq!(report.errors[0].location, "ext/locators@1.parquet");
}
