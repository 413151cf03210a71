// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The shard manifest: the one document the publisher signs.
//!
//! Parsing separates byte-level failures (`E_MANIFEST_SYNTAX`) from
//! missing or mistyped fields (`E_MANIFEST_SCHEMA`). Field-level validation
//! is static: it never touches the filesystem, so it is safe to run before
//! the signature has been checked.

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{ErrorCode, VerifyIssue};
use crate::layout::MANIFEST_FILE;
use crate::suite::Suite;

pub const SPEC_VERSION_LEGACY: &str = "1.0.0";
pub const SPEC_VERSION_SUITED: &str = "1.1.0";
pub const SHARD_ID_PREFIX: &str = "shard_blake3_";
pub const MERKLE_ALGORITHM: &str = "blake3";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub spec_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite: Option<String>,
    pub shard_id: String,
    pub metadata: Metadata,
    pub publisher: Publisher,
    pub license: License,
    pub sources: Vec<SourceRef>,
    pub integrity: Integrity,
    pub statistics: Statistics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub namespace: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publisher {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub spdx: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    /// Path relative to the shard root, always under `content/`.
    pub path: String,
    /// Lowercase hex SHA-256 of the file bytes.
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integrity {
    pub algorithm: String,
    pub merkle_root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub entities: u64,
    pub claims: u64,
}

fn issue(code: ErrorCode, message: impl Into<String>) -> VerifyIssue {
    VerifyIssue::new(code, MANIFEST_FILE, message)
}

/// Parse manifest bytes. The same buffer must be the one the signature was
/// checked against; this function never re-reads the file.
pub fn parse_manifest(bytes: &[u8]) -> Result<Manifest, VerifyIssue> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| issue(ErrorCode::ManifestSyntax, format!("not valid UTF-8: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| issue(ErrorCode::ManifestSyntax, format!("not valid JSON: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| issue(ErrorCode::ManifestSchema, format!("schema violation: {e}")))
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

impl Manifest {
    /// Static field validation. Returns every violation found.
    pub fn validate(&self) -> Vec<VerifyIssue> {
        let mut issues = Vec::new();

        if self.spec_version != SPEC_VERSION_LEGACY && self.spec_version != SPEC_VERSION_SUITED {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                format!("unsupported spec_version: {}", self.spec_version),
            ));
        }
        if let Some(id) = &self.suite {
            if Suite::from_id(id).is_none() {
                issues.push(issue(
                    ErrorCode::ManifestSchema,
                    format!("unknown suite: {id}"),
                ));
            }
        }
        if self.metadata.title.is_empty() {
            issues.push(issue(ErrorCode::ManifestSchema, "metadata.title is empty"));
        }
        if self.metadata.namespace.is_empty() {
            issues.push(issue(ErrorCode::ManifestSchema, "metadata.namespace is empty"));
        }
        if OffsetDateTime::parse(&self.metadata.created_at, &Rfc3339).is_err() {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                format!(
                    "metadata.created_at is not an RFC 3339 timestamp: {}",
                    self.metadata.created_at
                ),
            ));
        }
        if self.publisher.id.is_empty() || self.publisher.name.is_empty() {
            issues.push(issue(ErrorCode::ManifestSchema, "publisher id/name must be non-empty"));
        }
        if self.license.spdx.is_empty() {
            issues.push(issue(ErrorCode::ManifestSchema, "license.spdx is empty"));
        }

        if self.sources.is_empty() {
            issues.push(issue(ErrorCode::ManifestSchema, "sources[] is empty"));
        }
        for s in &self.sources {
            if !s.path.starts_with("content/") || s.path.contains("..") {
                issues.push(issue(
                    ErrorCode::ManifestSchema,
                    format!("source path must sit under content/: {}", s.path),
                ));
            }
            if !is_lower_hex(&s.hash, 64) {
                issues.push(issue(
                    ErrorCode::ManifestSchema,
                    format!("source hash is not lowercase hex SHA-256: {}", s.hash),
                ));
            }
        }

        if self.integrity.algorithm != MERKLE_ALGORITHM {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                format!("integrity.algorithm must be \"{MERKLE_ALGORITHM}\""),
            ));
        }
        if !is_lower_hex(&self.integrity.merkle_root, 64) {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                "integrity.merkle_root is not a 64-char lowercase hex digest",
            ));
        }
        let expected_id = format!("{SHARD_ID_PREFIX}{}", self.integrity.merkle_root);
        if self.shard_id != expected_id {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                format!("shard_id {} does not match integrity.merkle_root", self.shard_id),
            ));
        }

        if let Some(exts) = &self.extensions {
            if exts.is_empty() {
                // Hash stability: no extensions means no key at all.
                issues.push(issue(
                    ErrorCode::ManifestSchema,
                    "extensions must be omitted when empty",
                ));
            }
            for e in exts {
                if !e.contains('@') {
                    issues.push(issue(
                        ErrorCode::ManifestSchema,
                        format!("extension entry is not <name>@<version>: {e}"),
                    ));
                }
            }
        }

        issues
    }

    /// Cross-check the `extensions` field against the actual `ext/` stems.
    ///
    /// Present iff the directory holds at least one table, and then the two
    /// sets must match exactly.
    pub fn validate_extensions_against(&self, ext_stems: &[String]) -> Vec<VerifyIssue> {
        let mut issues = Vec::new();
        let declared: Vec<String> = self.extensions.clone().unwrap_or_default();
        let mut declared_sorted = declared.clone();
        declared_sorted.sort();
        let mut present = ext_stems.to_vec();
        present.sort();

        if present.is_empty() && self.extensions.is_some() {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                "manifest declares extensions but ext/ holds no tables",
            ));
        } else if !present.is_empty() && self.extensions.is_none() {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                "ext/ holds tables but the manifest declares no extensions",
            ));
        } else if declared_sorted != present {
            issues.push(issue(
                ErrorCode::ManifestSchema,
                format!(
                    "extensions {declared_sorted:?} do not match ext/ contents {present:?}"
                ),
            ));
        }
        issues
    }

    pub fn declared_suite(&self) -> Option<&str> {
        self.suite.as_deref()
    }
}
