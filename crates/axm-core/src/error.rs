// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

/// Published verification error codes.
///
/// Codes are additive-only: once released a code is never renamed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "E_LAYOUT_MISSING")]
    LayoutMissing,
    #[serde(rename = "E_LAYOUT_DIRTY")]
    LayoutDirty,
    #[serde(rename = "E_MANIFEST_SYNTAX")]
    ManifestSyntax,
    #[serde(rename = "E_MANIFEST_SCHEMA")]
    ManifestSchema,
    #[serde(rename = "E_SIG_MISSING")]
    SigMissing,
    #[serde(rename = "E_SIG_INVALID")]
    SigInvalid,
    #[serde(rename = "E_MERKLE_MISMATCH")]
    MerkleMismatch,
    #[serde(rename = "E_SCHEMA_TYPE")]
    SchemaType,
    #[serde(rename = "E_SCHEMA_NULL")]
    SchemaNull,
    #[serde(rename = "E_REF_ORPHAN")]
    RefOrphan,
    #[serde(rename = "E_REF_SOURCE")]
    RefSource,
    #[serde(rename = "E_IDENTITY_INPUT")]
    IdentityInput,
    #[serde(rename = "E_BUFFER_DISCONTINUITY")]
    BufferDiscontinuity,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::LayoutMissing => "E_LAYOUT_MISSING",
            ErrorCode::LayoutDirty => "E_LAYOUT_DIRTY",
            ErrorCode::ManifestSyntax => "E_MANIFEST_SYNTAX",
            ErrorCode::ManifestSchema => "E_MANIFEST_SCHEMA",
            ErrorCode::SigMissing => "E_SIG_MISSING",
            ErrorCode::SigInvalid => "E_SIG_INVALID",
            ErrorCode::MerkleMismatch => "E_MERKLE_MISMATCH",
            ErrorCode::SchemaType => "E_SCHEMA_TYPE",
            ErrorCode::SchemaNull => "E_SCHEMA_NULL",
            ErrorCode::RefOrphan => "E_REF_ORPHAN",
            ErrorCode::RefSource => "E_REF_SOURCE",
            ErrorCode::IdentityInput => "E_IDENTITY_INPUT",
            ErrorCode::BufferDiscontinuity => "E_BUFFER_DISCONTINUITY",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One structured verification finding: a code, a location inside the shard
/// (relative path, optionally with a row index), and a human message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyIssue {
    pub code: ErrorCode,
    pub location: String,
    pub message: String,
}

impl VerifyIssue {
    pub fn new(code: ErrorCode, location: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            location: location.into(),
            message: message.into(),
        }
    }
}

/// Sort findings by (code, location) so two failing runs on the same shard
/// produce identical output.
pub fn sort_issues(issues: &mut [VerifyIssue]) {
    issues.sort_by(|a, b| {
        (a.code.as_str(), a.location.as_str()).cmp(&(b.code.as_str(), b.location.as_str()))
    });
}

/// Operational failures inside the compiler and verifier.
///
/// These are distinct from [`VerifyIssue`]: a `CoreError` means a call could
/// not run to completion (bad inputs, I/O failure, exceeded policy limit),
/// while verification findings are ordinary return values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("i/o failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("identity input contains a NUL byte")]
    IdentityInput,

    #[error("invalid key material for suite {suite}: {reason}")]
    KeyMaterial { suite: &'static str, reason: String },

    #[error("unknown signature suite: {0}")]
    UnknownSuite(String),

    #[error("policy limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("symlink refused: {0}")]
    SymlinkRefused(PathBuf),

    #[error("serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("columnar table failure: {0}")]
    Columnar(String),

    #[error("shard metadata rejected: {0}")]
    Metadata(String),

    #[error("candidate record rejected: {0}")]
    Candidate(String),

    #[error("evidence mismatch at {location}: {reason}")]
    EvidenceMismatch { location: String, reason: String },

    #[error("compiled shard failed self-verification with {} finding(s)", .0.len())]
    SelfVerify(Vec<VerifyIssue>),
}

impl CoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_serialize_to_published_names() {
        let s = serde_json::to_string(&ErrorCode::MerkleMismatch).unwrap();
        assert_eq!(s, "\"E_MERKLE_MISMATCH\"");
        let back: ErrorCode = serde_json::from_str(&s).unwrap();
        assert_eq!(back, ErrorCode::MerkleMismatch);
    }

    #[test]
    fn issues_sort_by_code_then_location() {
        let mut v = vec![
            VerifyIssue::new(ErrorCode::RefSource, "evidence/spans.parquet:2", "b"),
            VerifyIssue::new(ErrorCode::LayoutDirty, "tmp", "a"),
            VerifyIssue::new(ErrorCode::RefSource, "evidence/spans.parquet:1", "c"),
        ];
        sort_issues(&mut v);
        assert_eq!(v[0].code, ErrorCode::LayoutDirty);
        assert_eq!(v[1].location, "evidence/spans.parquet:1");
        assert_eq!(v[2].location, "evidence/spans.parquet:2");
    }
}
