// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a small medical shard plus a re-seal helper for tests
//! that tamper with sealed files and need a fresh root and signature.

#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use axm_core::canonical::canonical_json_bytes;
use axm_core::compiler::{compile_shard, Candidate, ShardMetadata};
use axm_core::extensions::parse_extension_file_name;
use axm_core::merkle::compute_root;
use axm_core::suite::{detect_suite, ShardSigningKey, Suite};
use axm_core::PolicyLimits;

pub const GOLD_SENTENCE: &str = "Apply tourniquet only when direct pressure fails.";

/// Fixed Ed25519 seed so legacy fixtures are fully reproducible.
pub const ED25519_SEED_HEX: &str =
    "a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3";

pub fn ed25519_key() -> ShardSigningKey {
    let seed = hex::decode(ED25519_SEED_HEX).unwrap();
    ShardSigningKey::from_bytes(Suite::Ed25519, &seed, None).unwrap()
}

pub fn signing_key_for(suite: Suite) -> ShardSigningKey {
    match suite {
        Suite::Ed25519 => ed25519_key(),
        Suite::MlDsa44 => {
            let (blob, _) = axm_core::suite::generate_keypair(Suite::MlDsa44);
            ShardSigningKey::from_bytes(Suite::MlDsa44, &blob, None).unwrap()
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn gold_metadata() -> ShardMetadata {
    ShardMetadata {
        title: "Hemorrhage Control".to_string(),
        namespace: "survival/medical".to_string(),
        publisher_id: "@axm_genesis_test".to_string(),
        publisher_name: "Canonical Test Publisher".to_string(),
        license_spdx: "CC0-1.0".to_string(),
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

pub fn gold_candidates(source_hash: &str) -> Vec<Candidate> {
    vec![Candidate {
        namespace: "survival/medical".to_string(),
        subject_label: "tourniquet".to_string(),
        predicate: "treats".to_string(),
        object: "severe bleeding".to_string(),
        object_type: "entity".to_string(),
        tier: 1,
        evidence_text: GOLD_SENTENCE.to_string(),
        source_hash: source_hash.to_string(),
        byte_start: 0,
        byte_end: GOLD_SENTENCE.len() as u64,
    }]
}

pub fn write_gold_content(workspace: &Path) -> (PathBuf, String) {
    let content_dir = workspace.join("content_input");
    fs::create_dir_all(&content_dir).unwrap();
    fs::write(content_dir.join("source.txt"), GOLD_SENTENCE).unwrap();
    (content_dir, sha256_hex(GOLD_SENTENCE.as_bytes()))
}

/// Compile the gold fixture; returns the shard directory and the embedded
/// publisher key (which doubles as the trusted key in tests).
pub fn compile_gold(
    workspace: &Path,
    suite: Suite,
    key: &ShardSigningKey,
) -> (PathBuf, Vec<u8>) {
    let (content_dir, source_hash) = write_gold_content(workspace);
    let out = workspace.join(match suite {
        Suite::Ed25519 => "shard_legacy",
        Suite::MlDsa44 => "shard_pq",
    });
    compile_shard(
        &gold_candidates(&source_hash),
        &content_dir,
        &out,
        &gold_metadata(),
        key,
        &PolicyLimits::default(),
    )
    .unwrap();
    (out, key.public_key_bytes())
}

fn sha256_file(path: &Path) -> String {
    let mut file = fs::File::open(path).unwrap();
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    hex::encode(hasher.finalize())
}

/// Re-seal a shard after test tampering: refresh sources[] hashes and the
/// extensions list, recompute the Merkle root, rewrite the manifest
/// canonically, and re-sign with `key`.
pub fn reseal(shard: &Path, key: &ShardSigningKey) {
    let mut manifest: serde_json::Value =
        serde_json::from_slice(&fs::read(shard.join("manifest.json")).unwrap()).unwrap();

    // Rebuild sources[] from what actually sits under content/, the same
    // way the compiler does.
    let mut sources = Vec::new();
    for entry in walkdir::WalkDir::new(shard.join("content")).follow_links(false) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(shard)
            .unwrap()
            .to_str()
            .unwrap()
            .replace('\\', "/");
        sources.push(serde_json::json!({
            "path": rel,
            "hash": sha256_file(entry.path()),
        }));
    }
    sources.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
    manifest["sources"] = serde_json::Value::Array(sources);

    let mut tags = Vec::new();
    let ext_dir = shard.join("ext");
    if ext_dir.is_dir() {
        for entry in fs::read_dir(&ext_dir).unwrap() {
            let name = entry.unwrap().file_name().into_string().unwrap();
            if let Some(ext) = parse_extension_file_name(&name) {
                tags.push(ext.tag());
            }
        }
    }
    tags.sort();
    if tags.is_empty() {
        manifest.as_object_mut().unwrap().remove("extensions");
    } else {
        manifest["extensions"] = serde_json::json!(tags);
    }

    let declared = manifest["suite"].as_str().map(str::to_string);
    let suite = detect_suite(declared.as_deref(), key.public_key_bytes().len()).unwrap();
    let root = compute_root(shard, suite, &PolicyLimits::default()).unwrap();
    manifest["integrity"]["merkle_root"] = serde_json::Value::String(root.clone());
    manifest["shard_id"] = serde_json::Value::String(format!("shard_blake3_{root}"));

    let bytes = canonical_json_bytes(&manifest).unwrap();
    fs::write(shard.join("manifest.json"), &bytes).unwrap();
    fs::write(shard.join("sig/manifest.sig"), key.sign(&bytes)).unwrap();
    fs::write(shard.join("sig/publisher.pub"), key.public_key_bytes()).unwrap();
}
