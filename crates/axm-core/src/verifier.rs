// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shard verification.
//!
//! `verify_shard` is a total, deterministic function from an on-disk
//! directory (plus a trusted publisher key) to a pass/fail report. Checks
//! run as a fixed staged pipeline:
//!
//! ```text
//! INIT -> LAYOUT_OK -> MANIFEST_OK -> SIG_OK -> MERKLE_OK
//!      -> TABLES_OK -> REFS_OK -> BYTES_OK -> PASS
//! ```
//!
//! Every finding inside a stage is collected before the stage fails; later
//! stages are skipped only because their inputs cannot be trusted after an
//! earlier failure. No table is opened before the layout is clean, and
//! nothing in the manifest other than the `suite` field is acted on before
//! the signature has been verified. The manifest bytes are read exactly
//! once; the buffer that the signature is checked against is the buffer
//! every later manifest-derived check uses.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{sort_issues, CoreError, CoreResult, ErrorCode, VerifyIssue};
use crate::extensions::{parse_extension_file_name, ExtensionRegistry};
use crate::hotstream;
use crate::layout::{
    PolicyLimits, CLAIMS_TABLE, CONTENT_DIR, ENTITIES_TABLE, EVIDENCE_DIR, EXT_DIR, GRAPH_DIR,
    HOT_STREAM_EXTENSION, MANIFEST_FILE, PERMITTED_ROOT_ENTRIES, PERMITTED_SIG_FILES,
    PROVENANCE_TABLE, PUBKEY_FILE, SIG_DIR, SIG_FILE, SPANS_TABLE,
};
use crate::manifest::parse_manifest;
use crate::merkle;
use crate::suite::{detect_suite, verify_signature};
use crate::tables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyStatus {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub status: VerifyStatus,
    pub errors: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.status == VerifyStatus::Pass
    }

    fn fail(mut errors: Vec<VerifyIssue>) -> Self {
        sort_issues(&mut errors);
        Self {
            status: VerifyStatus::Fail,
            errors,
        }
    }

    fn pass() -> Self {
        Self {
            status: VerifyStatus::Pass,
            errors: Vec::new(),
        }
    }
}

struct LayoutScan {
    /// Shard-relative path and absolute path of every file under content/.
    content_files: Vec<(String, PathBuf)>,
    /// File name and absolute path of every table under ext/.
    ext_files: Vec<(String, PathBuf)>,
}

fn missing(location: impl Into<String>, what: &str) -> VerifyIssue {
    VerifyIssue::new(ErrorCode::LayoutMissing, location, format!("{what} is missing"))
}

fn dirty(location: impl Into<String>, message: impl Into<String>) -> VerifyIssue {
    VerifyIssue::new(ErrorCode::LayoutDirty, location, message)
}

fn read_dir_sorted(path: &Path) -> CoreResult<Vec<fs::DirEntry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path).map_err(|e| CoreError::io(path, e))? {
        entries.push(entry.map_err(|e| CoreError::io(path, e))?);
    }
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn entry_name(entry: &fs::DirEntry, issues: &mut Vec<VerifyIssue>) -> Option<String> {
    match entry.file_name().into_string() {
        Ok(name) => Some(name),
        Err(os) => {
            issues.push(dirty(
                os.to_string_lossy().into_owned(),
                "non-UTF-8 file name",
            ));
            None
        }
    }
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Stage 1: required entries present, nothing unexpected, no symlinks.
fn scan_layout(dir: &Path, issues: &mut Vec<VerifyIssue>) -> CoreResult<LayoutScan> {
    let mut scan = LayoutScan {
        content_files: Vec::new(),
        ext_files: Vec::new(),
    };

    if !dir.is_dir() {
        issues.push(missing(".", "shard directory"));
        return Ok(scan);
    }

    let mut seen = BTreeSet::new();
    for entry in read_dir_sorted(dir)? {
        let Some(name) = entry_name(&entry, issues) else {
            continue;
        };
        if is_symlink(&entry.path()) {
            issues.push(dirty(name.clone(), "symlink at shard root"));
            continue;
        }
        if !PERMITTED_ROOT_ENTRIES.contains(&name.as_str()) {
            issues.push(dirty(name.clone(), "unexpected entry at shard root"));
            continue;
        }
        seen.insert(name);
    }

    if !seen.contains(MANIFEST_FILE) || !dir.join(MANIFEST_FILE).is_file() {
        issues.push(missing(MANIFEST_FILE, "manifest"));
    }
    for required_dir in [SIG_DIR, CONTENT_DIR, GRAPH_DIR, EVIDENCE_DIR] {
        if !seen.contains(required_dir) || !dir.join(required_dir).is_dir() {
            issues.push(missing(required_dir, "required directory"));
        }
    }
    if !issues.is_empty() {
        return Ok(scan);
    }

    // sig/ may contain only the signature and the publisher key. Absence of
    // either is reported at the signature stage, not here.
    for entry in read_dir_sorted(&dir.join(SIG_DIR))? {
        let Some(name) = entry_name(&entry, issues) else {
            continue;
        };
        let rel = format!("{SIG_DIR}/{name}");
        if is_symlink(&entry.path()) {
            issues.push(dirty(rel, "symlink under sig/"));
        } else if !PERMITTED_SIG_FILES.contains(&name.as_str()) {
            issues.push(dirty(rel, "unexpected file under sig/"));
        }
    }

    // graph/ and evidence/ hold exactly the fixed tables.
    for (dir_name, permitted) in [
        (GRAPH_DIR, vec!["entities.parquet", "claims.parquet", "provenance.parquet"]),
        (EVIDENCE_DIR, vec!["spans.parquet"]),
    ] {
        for entry in read_dir_sorted(&dir.join(dir_name))? {
            let Some(name) = entry_name(&entry, issues) else {
                continue;
            };
            let rel = format!("{dir_name}/{name}");
            if is_symlink(&entry.path()) {
                issues.push(dirty(rel, "symlink in table directory"));
            } else if !entry.path().is_file() || !permitted.contains(&name.as_str()) {
                issues.push(dirty(rel, "unexpected entry in table directory"));
            }
        }
    }
    for table in [ENTITIES_TABLE, CLAIMS_TABLE, PROVENANCE_TABLE, SPANS_TABLE] {
        if !dir.join(table).is_file() {
            issues.push(missing(table, "required table"));
        }
    }

    // content/ holds the source byte streams; nested directories are fine,
    // symlinks are not.
    let content_root = dir.join(CONTENT_DIR);
    for entry in walkdir::WalkDir::new(&content_root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| content_root.clone());
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk failure"));
            CoreError::io(path, io)
        })?;
        if entry.depth() == 0 {
            continue;
        }
        let Some(rel) = crate::layout::posix_relative(dir, entry.path()) else {
            issues.push(dirty(
                entry.path().to_string_lossy().into_owned(),
                "non-UTF-8 path under content/",
            ));
            continue;
        };
        if entry.file_type().is_symlink() {
            issues.push(dirty(rel, "symlink under content/"));
        } else if entry.file_type().is_file() {
            scan.content_files.push((rel, entry.path().to_path_buf()));
        }
    }
    if scan.content_files.is_empty() {
        issues.push(missing(CONTENT_DIR, "at least one content file"));
    }

    // ext/ is optional; when present it holds flat, well-named tables.
    let ext_root = dir.join(EXT_DIR);
    if ext_root.is_dir() {
        for entry in read_dir_sorted(&ext_root)? {
            let Some(name) = entry_name(&entry, issues) else {
                continue;
            };
            let rel = format!("{EXT_DIR}/{name}");
            if is_symlink(&entry.path()) {
                issues.push(dirty(rel, "symlink under ext/"));
            } else if !entry.path().is_file() {
                issues.push(dirty(rel, "unexpected entry under ext/"));
            } else if parse_extension_file_name(&name).is_none() {
                issues.push(dirty(rel, "extension table is not named <name>@<version>.parquet"));
            } else {
                scan.ext_files.push((name, entry.path().to_path_buf()));
            }
        }
    }

    Ok(scan)
}

fn sha256_file(path: &Path) -> CoreResult<String> {
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

/// Verify a shard against a trusted publisher key.
pub fn verify_shard(dir: &Path, trusted_key: &[u8], limits: &PolicyLimits) -> CoreResult<VerifyReport> {
    verify_shard_with_registry(dir, trusted_key, limits, &ExtensionRegistry::new())
}

/// Verify a shard, additionally dispatching registered extension validators.
pub fn verify_shard_with_registry(
    dir: &Path,
    trusted_key: &[u8],
    limits: &PolicyLimits,
    registry: &ExtensionRegistry,
) -> CoreResult<VerifyReport> {
    // LAYOUT
    let mut issues = Vec::new();
    let scan = scan_layout(dir, &mut issues)?;
    if !issues.is_empty() {
        return Ok(VerifyReport::fail(issues));
    }

    // MANIFEST: one read of the bytes the signature covers.
    let manifest_path = dir.join(MANIFEST_FILE);
    let manifest_len = fs::metadata(&manifest_path)
        .map_err(|e| CoreError::io(&manifest_path, e))?
        .len();
    if manifest_len > limits.max_manifest_bytes {
        return Err(CoreError::LimitExceeded(format!(
            "manifest is {manifest_len} bytes (cap {})",
            limits.max_manifest_bytes
        )));
    }
    let manifest_bytes = fs::read(&manifest_path).map_err(|e| CoreError::io(&manifest_path, e))?;
    let manifest = match parse_manifest(&manifest_bytes) {
        Ok(m) => m,
        Err(issue) => return Ok(VerifyReport::fail(vec![issue])),
    };
    let static_issues = manifest.validate();
    if !static_issues.is_empty() {
        return Ok(VerifyReport::fail(static_issues));
    }

    // SIG: suite detection reads only the manifest's suite field.
    let sig_path = dir.join(SIG_FILE);
    let pub_path = dir.join(PUBKEY_FILE);
    let mut sig_issues = Vec::new();
    if !sig_path.is_file() {
        sig_issues.push(VerifyIssue::new(ErrorCode::SigMissing, SIG_FILE, "signature file is missing"));
    }
    if !pub_path.is_file() {
        sig_issues.push(VerifyIssue::new(
            ErrorCode::SigMissing,
            PUBKEY_FILE,
            "publisher key file is missing",
        ));
    }
    if !sig_issues.is_empty() {
        return Ok(VerifyReport::fail(sig_issues));
    }
    let public_key = fs::read(&pub_path).map_err(|e| CoreError::io(&pub_path, e))?;
    let signature = fs::read(&sig_path).map_err(|e| CoreError::io(&sig_path, e))?;

    let suite = match detect_suite(manifest.declared_suite(), public_key.len()) {
        Ok(s) => s,
        Err(reason) => {
            return Ok(VerifyReport::fail(vec![VerifyIssue::new(
                ErrorCode::SigInvalid,
                PUBKEY_FILE,
                reason,
            )]));
        }
    };
    if !verify_signature(suite, &public_key, &manifest_bytes, &signature) {
        sig_issues.push(VerifyIssue::new(
            ErrorCode::SigInvalid,
            SIG_FILE,
            "signature does not verify over the manifest bytes",
        ));
    }
    if public_key != trusted_key {
        sig_issues.push(VerifyIssue::new(
            ErrorCode::SigInvalid,
            PUBKEY_FILE,
            "embedded publisher key does not match the trusted key",
        ));
    }
    if !sig_issues.is_empty() {
        return Ok(VerifyReport::fail(sig_issues));
    }

    // MERKLE. The manifest is trusted from here on.
    let content_by_rel: BTreeMap<&str, &PathBuf> = scan
        .content_files
        .iter()
        .map(|(rel, path)| (rel.as_str(), path))
        .collect();
    let computed_root = merkle::compute_root(dir, suite, limits)?;
    if computed_root != manifest.integrity.merkle_root {
        // Localize through sources[] so a tampered content file is named.
        let mut merkle_issues = Vec::new();
        for source in &manifest.sources {
            if let Some(path) = content_by_rel.get(source.path.as_str()) {
                if sha256_file(path)? != source.hash {
                    merkle_issues.push(VerifyIssue::new(
                        ErrorCode::MerkleMismatch,
                        source.path.clone(),
                        "content bytes do not match the sealed Merkle root",
                    ));
                }
            }
        }
        if merkle_issues.is_empty() {
            merkle_issues.push(VerifyIssue::new(
                ErrorCode::MerkleMismatch,
                ".",
                format!(
                    "computed root {computed_root} does not match stored root {}",
                    manifest.integrity.merkle_root
                ),
            ));
        }
        return Ok(VerifyReport::fail(merkle_issues));
    }

    // Manifest vs layout coherence: the extensions declaration must track
    // ext/, and every declared source must exist before its bytes are read.
    let mut coherence = Vec::new();
    let ext_stems: Vec<String> = scan
        .ext_files
        .iter()
        .filter_map(|(name, _)| parse_extension_file_name(name).map(|r| r.tag()))
        .collect();
    coherence.extend(manifest.validate_extensions_against(&ext_stems));
    for source in &manifest.sources {
        if !content_by_rel.contains_key(source.path.as_str()) {
            coherence.push(missing(source.path.clone(), "declared source file"));
        }
    }
    if !coherence.is_empty() {
        return Ok(VerifyReport::fail(coherence));
    }

    // TABLES
    let mut table_issues = Vec::new();
    let entities = tables::read_entities(&dir.join(ENTITIES_TABLE), ENTITIES_TABLE)
        .unwrap_or_else(|mut e| {
            table_issues.append(&mut e);
            Vec::new()
        });
    let claims = tables::read_claims(&dir.join(CLAIMS_TABLE), CLAIMS_TABLE).unwrap_or_else(|mut e| {
        table_issues.append(&mut e);
        Vec::new()
    });
    let provenance = tables::read_provenance(&dir.join(PROVENANCE_TABLE), PROVENANCE_TABLE)
        .unwrap_or_else(|mut e| {
            table_issues.append(&mut e);
            Vec::new()
        });
    let spans = tables::read_spans(&dir.join(SPANS_TABLE), SPANS_TABLE).unwrap_or_else(|mut e| {
        table_issues.append(&mut e);
        Vec::new()
    });
    if !table_issues.is_empty() {
        return Ok(VerifyReport::fail(table_issues));
    }

    // REFS
    let mut ref_issues = Vec::new();
    let entity_ids: BTreeSet<&str> = entities.iter().map(|r| r.entity_id.as_str()).collect();
    let claim_ids: BTreeSet<&str> = claims.iter().map(|r| r.claim_id.as_str()).collect();
    let source_hashes: BTreeSet<&str> = manifest.sources.iter().map(|s| s.hash.as_str()).collect();

    for (i, claim) in claims.iter().enumerate() {
        if !entity_ids.contains(claim.subject.as_str()) {
            ref_issues.push(VerifyIssue::new(
                ErrorCode::RefOrphan,
                format!("{CLAIMS_TABLE}:{i}"),
                format!("claim subject {} resolves to no entity", claim.subject),
            ));
        }
        if claim.object_type == tables::OBJECT_TYPE_ENTITY
            && !entity_ids.contains(claim.object.as_str())
        {
            ref_issues.push(VerifyIssue::new(
                ErrorCode::RefOrphan,
                format!("{CLAIMS_TABLE}:{i}"),
                format!("claim object {} resolves to no entity", claim.object),
            ));
        }
    }
    for (i, row) in provenance.iter().enumerate() {
        if !claim_ids.contains(row.claim_id.as_str()) {
            ref_issues.push(VerifyIssue::new(
                ErrorCode::RefOrphan,
                format!("{PROVENANCE_TABLE}:{i}"),
                format!("provenance claim_id {} resolves to no claim", row.claim_id),
            ));
        }
        if !source_hashes.contains(row.source_hash.as_str()) {
            ref_issues.push(VerifyIssue::new(
                ErrorCode::RefOrphan,
                format!("{PROVENANCE_TABLE}:{i}"),
                format!("provenance source_hash {} matches no source", row.source_hash),
            ));
        }
    }
    for (i, span) in spans.iter().enumerate() {
        if !source_hashes.contains(span.source_hash.as_str()) {
            ref_issues.push(VerifyIssue::new(
                ErrorCode::RefOrphan,
                format!("{SPANS_TABLE}:{i}"),
                format!("span source_hash {} matches no source", span.source_hash),
            ));
        }
    }
    if !ref_issues.is_empty() {
        return Ok(VerifyReport::fail(ref_issues));
    }

    // BYTES: ranges in bounds, span text equals the exact decoded slice.
    let mut content_by_hash: BTreeMap<&str, Vec<u8>> = BTreeMap::new();
    for source in &manifest.sources {
        if let Some(path) = content_by_rel.get(source.path.as_str()) {
            let bytes = fs::read(path).map_err(|e| CoreError::io(path.as_path(), e))?;
            content_by_hash.insert(source.hash.as_str(), bytes);
        }
    }
    let mut byte_issues = Vec::new();
    let range_ok = |start: i64, end: i64, len: usize| {
        start >= 0 && end >= start && (end as u64) <= len as u64
    };
    for (i, span) in spans.iter().enumerate() {
        let location = format!("{SPANS_TABLE}:{i}");
        let Some(bytes) = content_by_hash.get(span.source_hash.as_str()) else {
            continue;
        };
        if !range_ok(span.byte_start, span.byte_end, bytes.len()) {
            byte_issues.push(VerifyIssue::new(
                ErrorCode::RefSource,
                location,
                format!(
                    "span range {}..{} is out of bounds for a {}-byte source",
                    span.byte_start,
                    span.byte_end,
                    bytes.len()
                ),
            ));
            continue;
        }
        let slice = &bytes[span.byte_start as usize..span.byte_end as usize];
        match std::str::from_utf8(slice) {
            Ok(text) if text == span.text => {}
            Ok(_) => {
                byte_issues.push(VerifyIssue::new(
                    ErrorCode::RefSource,
                    location,
                    "span text does not equal the content slice",
                ));
            }
            Err(_) => {
                byte_issues.push(VerifyIssue::new(
                    ErrorCode::RefSource,
                    location,
                    "span range does not decode as UTF-8",
                ));
            }
        }
    }
    for (i, row) in provenance.iter().enumerate() {
        let Some(bytes) = content_by_hash.get(row.source_hash.as_str()) else {
            continue;
        };
        if !range_ok(row.byte_start, row.byte_end, bytes.len()) {
            byte_issues.push(VerifyIssue::new(
                ErrorCode::RefSource,
                format!("{PROVENANCE_TABLE}:{i}"),
                format!(
                    "provenance range {}..{} is out of bounds for a {}-byte source",
                    row.byte_start,
                    row.byte_end,
                    bytes.len()
                ),
            ));
        }
    }
    if !byte_issues.is_empty() {
        return Ok(VerifyReport::fail(byte_issues));
    }

    // Hot streams and registered extension validators.
    let mut tail_issues = Vec::new();
    for (rel, path) in &scan.content_files {
        if Path::new(rel)
            .extension()
            .is_some_and(|e| e == HOT_STREAM_EXTENSION)
        {
            if let Some(issue) = hotstream::validate_stream(path, rel) {
                tail_issues.push(issue);
            }
        }
    }
    for (name, path) in &scan.ext_files {
        if let Some(ext) = parse_extension_file_name(name) {
            if let Some(validator) = registry.get(&ext.tag()) {
                tail_issues.extend(validator.validate(path, &format!("{EXT_DIR}/{name}")));
            }
        }
    }
    if !tail_issues.is_empty() {
        return Ok(VerifyReport::fail(tail_issues));
    }

    Ok(VerifyReport::pass())
}
