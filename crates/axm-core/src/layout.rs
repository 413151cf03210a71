// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! On-disk shard layout: names, permitted entries, and policy limits.

use std::path::Path;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIG_DIR: &str = "sig";
pub const CONTENT_DIR: &str = "content";
pub const GRAPH_DIR: &str = "graph";
pub const EVIDENCE_DIR: &str = "evidence";
pub const EXT_DIR: &str = "ext";

pub const SIG_FILE: &str = "sig/manifest.sig";
pub const PUBKEY_FILE: &str = "sig/publisher.pub";

pub const ENTITIES_TABLE: &str = "graph/entities.parquet";
pub const CLAIMS_TABLE: &str = "graph/claims.parquet";
pub const PROVENANCE_TABLE: &str = "graph/provenance.parquet";
pub const SPANS_TABLE: &str = "evidence/spans.parquet";

/// Root entries a shard may contain. Anything else is dirty layout.
pub const PERMITTED_ROOT_ENTRIES: [&str; 6] = [
    MANIFEST_FILE,
    SIG_DIR,
    CONTENT_DIR,
    GRAPH_DIR,
    EVIDENCE_DIR,
    EXT_DIR,
];

/// Root entries that must be present.
pub const REQUIRED_ROOT_ENTRIES: [&str; 5] =
    [MANIFEST_FILE, SIG_DIR, CONTENT_DIR, GRAPH_DIR, EVIDENCE_DIR];

/// The only files permitted under `sig/`.
pub const PERMITTED_SIG_FILES: [&str; 2] = ["manifest.sig", "publisher.pub"];

/// Content files with this extension carry the framed hot-stream format.
pub const HOT_STREAM_EXTENSION: &str = "stream";

/// Resource ceilings for one compile or verify call.
///
/// These are caller-supplied parameters, not process-wide configuration;
/// exceeding any of them aborts the call with a structured error.
#[derive(Debug, Clone, Copy)]
pub struct PolicyLimits {
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub max_file_count: u64,
    pub max_manifest_bytes: u64,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 512 * 1024 * 1024,
            max_total_bytes: 2 * 1024 * 1024 * 1024,
            max_file_count: 100_000,
            max_manifest_bytes: 1024 * 1024,
        }
    }
}

/// True when `rel` (a POSIX relative path) is excluded from Merkle coverage:
/// the manifest itself and everything under `sig/`.
pub fn is_merkle_excluded(rel: &str) -> bool {
    rel == MANIFEST_FILE || rel.starts_with("sig/")
}

/// POSIX rendering of a path relative to the shard root.
pub fn posix_relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for comp in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(comp.as_os_str().to_str()?);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn merkle_exclusion_covers_manifest_and_sig() {
        assert!(is_merkle_excluded("manifest.json"));
        assert!(is_merkle_excluded("sig/manifest.sig"));
        assert!(is_merkle_excluded("sig/publisher.pub"));
        assert!(!is_merkle_excluded("content/source.txt"));
        assert!(!is_merkle_excluded("signature.txt"));
    }

    #[test]
    fn posix_relative_uses_forward_slashes() {
        let root = PathBuf::from("/tmp/shard");
        let p = root.join("graph").join("claims.parquet");
        assert_eq!(
            posix_relative(&root, &p).unwrap(),
            "graph/claims.parquet"
        );
    }
}
