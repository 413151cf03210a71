// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The shard compiler: candidate stream in, sealed and signed shard out.
//!
//! The pipeline is append-only and deterministic: entities and claims are
//! resolved into sorted maps, tables are emitted with the deterministic
//! writer, the timestamp is fixed before the Merkle root is computed, and
//! the finished directory must pass the verifier with its own embedded key
//! before the build is considered shipped. Identical inputs (including the
//! timestamp) produce byte-identical shards.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::canonical::{canon, canonical_json_bytes};
use crate::error::{CoreError, CoreResult};
use crate::identity;
use crate::layout::{
    PolicyLimits, CLAIMS_TABLE, CONTENT_DIR, ENTITIES_TABLE, EVIDENCE_DIR, EXT_DIR, GRAPH_DIR,
    MANIFEST_FILE, PROVENANCE_TABLE, PUBKEY_FILE, SIG_DIR, SIG_FILE, SPANS_TABLE,
};
use crate::manifest::{
    Integrity, License, Manifest, Metadata, Publisher, SourceRef, Statistics, MERKLE_ALGORITHM,
    SHARD_ID_PREFIX, SPEC_VERSION_LEGACY, SPEC_VERSION_SUITED,
};
use crate::merkle;
use crate::suite::{ShardSigningKey, Suite};
use crate::tables::{
    self, ClaimRow, EntityRow, ProvenanceRow, SpanRow, OBJECT_TYPE_ENTITY, VALID_OBJECT_TYPES,
    VALID_TIERS,
};
use crate::verifier;

/// One extracted candidate, as produced by an external extractor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub namespace: String,
    pub subject_label: String,
    pub predicate: String,
    pub object: String,
    pub object_type: String,
    pub tier: i64,
    pub evidence_text: String,
    pub source_hash: String,
    pub byte_start: u64,
    pub byte_end: u64,
}

/// Shard-level metadata fixed by the publisher before compilation.
#[derive(Debug, Clone)]
pub struct ShardMetadata {
    pub title: String,
    pub namespace: String,
    pub publisher_id: String,
    pub publisher_name: String,
    pub license_spdx: String,
    /// RFC 3339. Fixed before the Merkle root is computed so the root
    /// covers it; rewriting it afterwards would invalidate the chain.
    pub created_at: String,
}

/// Result of a successful compile.
#[derive(Debug, Clone)]
pub struct CompileReport {
    pub shard_dir: PathBuf,
    pub manifest: Manifest,
    pub entities: usize,
    pub claims: usize,
    pub provenance: usize,
    pub spans: usize,
}

fn sha256_stream(path: &Path) -> CoreResult<String> {
    let mut file = fs::File::open(path).map_err(|e| CoreError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| CoreError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compile candidates plus content files into a sealed shard at `out_dir`.
///
/// Any existing directory at `out_dir` is replaced. On any failure,
/// including failed self-verification, the partial output is removed so it
/// can never be mistaken for a verified shard.
pub fn compile_shard(
    candidates: &[Candidate],
    content_dir: &Path,
    out_dir: &Path,
    metadata: &ShardMetadata,
    signing_key: &ShardSigningKey,
    limits: &PolicyLimits,
) -> CoreResult<CompileReport> {
    let result = build_shard(candidates, content_dir, out_dir, metadata, signing_key, limits);
    if result.is_err() && out_dir.exists() {
        let _ = fs::remove_dir_all(out_dir);
    }
    result
}

fn build_shard(
    candidates: &[Candidate],
    content_dir: &Path,
    out_dir: &Path,
    metadata: &ShardMetadata,
    signing_key: &ShardSigningKey,
    limits: &PolicyLimits,
) -> CoreResult<CompileReport> {
    if OffsetDateTime::parse(&metadata.created_at, &Rfc3339).is_err() {
        return Err(CoreError::Metadata(format!(
            "created_at is not an RFC 3339 timestamp: {}",
            metadata.created_at
        )));
    }
    if candidates.is_empty() {
        return Err(CoreError::Candidate("candidate stream is empty".into()));
    }

    if out_dir.exists() {
        fs::remove_dir_all(out_dir).map_err(|e| CoreError::io(out_dir, e))?;
    }
    for sub in [CONTENT_DIR, GRAPH_DIR, EVIDENCE_DIR, SIG_DIR, EXT_DIR] {
        fs::create_dir_all(out_dir.join(sub)).map_err(|e| CoreError::io(out_dir, e))?;
    }

    // Copy content and record each file's SHA-256. Content bytes stay in
    // memory for evidence checking; policy limits bound the total.
    let mut sources: Vec<SourceRef> = Vec::new();
    let mut content_by_hash: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    let mut total_bytes = 0u64;
    let mut entries: Vec<_> = fs::read_dir(content_dir)
        .map_err(|e| CoreError::io(content_dir, e))?
        .collect::<Result<_, _>>()
        .map_err(|e| CoreError::io(content_dir, e))?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry
            .file_name()
            .into_string()
            .map_err(|os| CoreError::Metadata(format!("non-UTF-8 content file name: {os:?}")))?;
        let size = fs::metadata(&path).map_err(|e| CoreError::io(&path, e))?.len();
        if size > limits.max_file_bytes {
            return Err(CoreError::LimitExceeded(format!(
                "content file {name} is {size} bytes (cap {})",
                limits.max_file_bytes
            )));
        }
        total_bytes = total_bytes.saturating_add(size);
        if total_bytes > limits.max_total_bytes {
            return Err(CoreError::LimitExceeded(format!(
                "content exceeds total byte cap {}",
                limits.max_total_bytes
            )));
        }
        let dest = out_dir.join(CONTENT_DIR).join(&name);
        fs::copy(&path, &dest).map_err(|e| CoreError::io(&dest, e))?;
        let hash = sha256_stream(&dest)?;
        sources.push(SourceRef {
            path: format!("{CONTENT_DIR}/{name}"),
            hash: hash.clone(),
        });
        let bytes = fs::read(&dest).map_err(|e| CoreError::io(&dest, e))?;
        content_by_hash.insert(hash, bytes);
    }
    if sources.is_empty() {
        return Err(CoreError::Metadata("content directory holds no files".into()));
    }
    sources.sort_by(|a, b| a.path.cmp(&b.path));

    // Pass 1: resolve entities from subject and entity-object positions.
    fn resolve_entity(
        rows: &mut BTreeMap<String, EntityRow>,
        ns: &str,
        label: &str,
    ) -> CoreResult<String> {
        let id = identity::entity_id(ns, label)?;
        rows.entry(id.clone()).or_insert_with(|| EntityRow {
            entity_id: id.clone(),
            namespace: ns.to_string(),
            label: label.to_string(),
            entity_type: "concept".to_string(),
        });
        Ok(id)
    }
    let mut entity_rows: BTreeMap<String, EntityRow> = BTreeMap::new();

    for (index, c) in candidates.iter().enumerate() {
        let reject = |what: &str| {
            CoreError::Candidate(format!("candidate {index}: {what}"))
        };
        if c.namespace.is_empty() || c.subject_label.is_empty() || c.predicate.is_empty() {
            return Err(reject("namespace, subject_label and predicate must be non-empty"));
        }
        if !VALID_OBJECT_TYPES.contains(&c.object_type.as_str()) {
            return Err(reject(&format!("object_type {:?} is not accepted", c.object_type)));
        }
        let tier_ok = i8::try_from(c.tier).map(|t| VALID_TIERS.contains(&t)).unwrap_or(false);
        if !tier_ok {
            return Err(reject(&format!("tier {} is outside the accepted range", c.tier)));
        }
        resolve_entity(&mut entity_rows, &c.namespace, &c.subject_label)?;
        if c.object_type == OBJECT_TYPE_ENTITY {
            if c.object.is_empty() {
                return Err(reject("entity object must be non-empty"));
            }
            resolve_entity(&mut entity_rows, &c.namespace, &c.object)?;
        }
    }

    // Pass 2: claims, spans, provenance. Duplicate claims collapse by id;
    // each duplicate's evidence still lands in provenance.
    let mut claim_rows: BTreeMap<String, ClaimRow> = BTreeMap::new();
    let mut span_rows: BTreeMap<String, SpanRow> = BTreeMap::new();
    let mut provenance_rows: Vec<ProvenanceRow> = Vec::new();

    for (index, c) in candidates.iter().enumerate() {
        let subject_id = identity::entity_id(&c.namespace, &c.subject_label)?;
        let object_value = if c.object_type == OBJECT_TYPE_ENTITY {
            identity::entity_id(&c.namespace, &c.object)?
        } else {
            canon(&c.object)?
        };
        let claim_id =
            identity::claim_id(&subject_id, &c.predicate, &c.object_type, &object_value)?;

        let content = content_by_hash.get(&c.source_hash).ok_or_else(|| {
            CoreError::EvidenceMismatch {
                location: format!("candidate {index}"),
                reason: format!("source_hash {} matches no content file", c.source_hash),
            }
        })?;
        if c.byte_start > c.byte_end || c.byte_end as usize > content.len() {
            return Err(CoreError::EvidenceMismatch {
                location: format!("candidate {index}"),
                reason: format!(
                    "byte range {}..{} is out of bounds for a {}-byte source",
                    c.byte_start,
                    c.byte_end,
                    content.len()
                ),
            });
        }
        // The slice must decode to exactly the evidence text. Literal byte
        // equality, no normalization of evidence.
        let slice = &content[c.byte_start as usize..c.byte_end as usize];
        match std::str::from_utf8(slice) {
            Ok(text) if text == c.evidence_text => {}
            _ => {
                return Err(CoreError::EvidenceMismatch {
                    location: format!("candidate {index}"),
                    reason: format!(
                        "content bytes {}..{} do not decode to the evidence text",
                        c.byte_start, c.byte_end
                    ),
                });
            }
        }

        let tier = i8::try_from(c.tier)
            .map_err(|_| CoreError::Candidate(format!("candidate {index}: tier out of range")))?;
        claim_rows.entry(claim_id.clone()).or_insert_with(|| ClaimRow {
            claim_id: claim_id.clone(),
            subject: subject_id.clone(),
            predicate: c.predicate.clone(),
            object: object_value.clone(),
            object_type: c.object_type.clone(),
            tier,
        });

        let span_id = identity::span_id(&c.source_hash, c.byte_start, c.byte_end, &c.evidence_text)?;
        span_rows.entry(span_id.clone()).or_insert_with(|| SpanRow {
            span_id: span_id.clone(),
            source_hash: c.source_hash.clone(),
            byte_start: c.byte_start as i64,
            byte_end: c.byte_end as i64,
            text: c.evidence_text.clone(),
        });

        provenance_rows.push(ProvenanceRow {
            provenance_id: identity::provenance_id(&c.source_hash, c.byte_start, c.byte_end)?,
            claim_id,
            source_hash: c.source_hash.clone(),
            byte_start: c.byte_start as i64,
            byte_end: c.byte_end as i64,
        });
    }

    let mut entities: Vec<EntityRow> = entity_rows.into_values().collect();
    let mut claims: Vec<ClaimRow> = claim_rows.into_values().collect();
    let mut spans: Vec<SpanRow> = span_rows.into_values().collect();

    tables::write_entities(&out_dir.join(ENTITIES_TABLE), &mut entities)?;
    tables::write_claims(&out_dir.join(CLAIMS_TABLE), &mut claims)?;
    tables::write_provenance(&out_dir.join(PROVENANCE_TABLE), &mut provenance_rows)?;
    tables::write_spans(&out_dir.join(SPANS_TABLE), &mut spans)?;

    // Active extensions, if a prior build step dropped tables into ext/.
    let mut ext_tags: Vec<String> = Vec::new();
    for entry in fs::read_dir(out_dir.join(EXT_DIR)).map_err(|e| CoreError::io(out_dir, e))? {
        let entry = entry.map_err(|e| CoreError::io(out_dir, e))?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some(ext) = crate::extensions::parse_extension_file_name(name) {
                ext_tags.push(ext.tag());
            }
        }
    }
    ext_tags.sort();

    // Seal: root over everything except the manifest and sig/, then the
    // manifest itself in canonical bytes.
    let suite = signing_key.suite();
    let merkle_root = merkle::compute_root(out_dir, suite, limits)?;
    let manifest = Manifest {
        spec_version: match suite {
            Suite::Ed25519 => SPEC_VERSION_LEGACY.to_string(),
            Suite::MlDsa44 => SPEC_VERSION_SUITED.to_string(),
        },
        suite: match suite {
            Suite::Ed25519 => None,
            Suite::MlDsa44 => Some(suite.id().to_string()),
        },
        shard_id: format!("{SHARD_ID_PREFIX}{merkle_root}"),
        metadata: Metadata {
            title: metadata.title.clone(),
            namespace: metadata.namespace.clone(),
            created_at: metadata.created_at.clone(),
        },
        publisher: Publisher {
            id: metadata.publisher_id.clone(),
            name: metadata.publisher_name.clone(),
        },
        license: License {
            spdx: metadata.license_spdx.clone(),
            notes: None,
        },
        sources,
        integrity: Integrity {
            algorithm: MERKLE_ALGORITHM.to_string(),
            merkle_root,
        },
        statistics: Statistics {
            entities: entities.len() as u64,
            claims: claims.len() as u64,
        },
        extensions: if ext_tags.is_empty() { None } else { Some(ext_tags) },
    };

    let manifest_bytes = canonical_json_bytes(&manifest)?;
    if manifest_bytes.len() as u64 > limits.max_manifest_bytes {
        return Err(CoreError::LimitExceeded(format!(
            "manifest is {} bytes (cap {})",
            manifest_bytes.len(),
            limits.max_manifest_bytes
        )));
    }
    fs::write(out_dir.join(MANIFEST_FILE), &manifest_bytes)
        .map_err(|e| CoreError::io(out_dir.join(MANIFEST_FILE), e))?;

    let signature = signing_key.sign(&manifest_bytes);
    let public_key = signing_key.public_key_bytes();
    fs::write(out_dir.join(SIG_FILE), &signature)
        .map_err(|e| CoreError::io(out_dir.join(SIG_FILE), e))?;
    fs::write(out_dir.join(PUBKEY_FILE), &public_key)
        .map_err(|e| CoreError::io(out_dir.join(PUBKEY_FILE), e))?;

    // A build ships only if its own output verifies.
    let report = verifier::verify_shard(out_dir, &public_key, limits)?;
    if !report.passed() {
        return Err(CoreError::SelfVerify(report.errors));
    }

    Ok(CompileReport {
        shard_dir: out_dir.to_path_buf(),
        entities: entities.len(),
        claims: claims.len(),
        provenance: provenance_rows.len(),
        spans: spans.len(),
        manifest,
    })
}

/// Parse a candidates stream in JSON-lines form.
pub fn parse_candidates_jsonl(text: &str) -> CoreResult<Vec<Candidate>> {
    let mut out = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let candidate: Candidate = serde_json::from_str(line).map_err(|e| {
            CoreError::Candidate(format!("line {}: {e}", lineno + 1))
        })?;
        out.push(candidate);
    }
    Ok(out)
}
