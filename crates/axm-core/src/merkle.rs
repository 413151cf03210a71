// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Suite-aware BLAKE3 Merkle root over the sealed file set.
//!
//! Both suites share the same file-set selection rule (every regular file
//! except the manifest and `sig/`, sorted by relative POSIX path bytes) and
//! differ only in domain separation:
//!
//! - legacy (`ed25519`): leaf `BLAKE3(relpath || 0x00 || bytes)`, node
//!   `BLAKE3(left || right)`, odd node duplicated, empty root `BLAKE3("")`.
//! - post-quantum (`axm-blake3-mldsa44`): leaf prefixed with `0x00`, node
//!   prefixed with `0x01`, odd node promoted unchanged (RFC 6962), empty
//!   root frozen at `BLAKE3(0x01)`.
//!
//! The constructions are independent: a root computed under one suite is
//! never re-interpreted under the other.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::layout::{is_merkle_excluded, posix_relative, PolicyLimits};
use crate::suite::Suite;

/// Frozen empty-tree root for the post-quantum suite: `BLAKE3(0x01)`.
pub const EMPTY_ROOT_MLDSA44: &str =
    "48fc721fbbc172e0925fa27af1671de225ba927134802998b10a1568a188652b";

const HASH_CHUNK: usize = 64 * 1024;

/// One file selected for Merkle coverage.
#[derive(Debug, Clone)]
pub struct ShardFile {
    pub rel: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Collect the covered file set under `root`, enforcing policy limits.
///
/// Symlinks anywhere in the tree are refused. The result is sorted by the
/// UTF-8 bytes of the relative POSIX path, so walk order never matters.
pub fn collect_files(root: &Path, limits: &PolicyLimits) -> CoreResult<Vec<ShardFile>> {
    let mut files = Vec::new();
    let mut total_bytes: u64 = 0;

    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            let io = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walk failure"));
            CoreError::io(path, io)
        })?;
        let path = entry.path();
        if entry.depth() == 0 {
            continue;
        }
        if entry.file_type().is_symlink() {
            return Err(CoreError::SymlinkRefused(path.to_path_buf()));
        }
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = posix_relative(root, path).ok_or_else(|| {
            CoreError::Metadata(format!("non-UTF-8 path in shard: {}", path.display()))
        })?;
        if is_merkle_excluded(&rel) {
            continue;
        }

        let size = entry
            .metadata()
            .map_err(|e| {
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("metadata failure"));
                CoreError::io(path.to_path_buf(), io)
            })?
            .len();
        if size > limits.max_file_bytes {
            return Err(CoreError::LimitExceeded(format!(
                "file {rel} is {size} bytes (cap {})",
                limits.max_file_bytes
            )));
        }
        total_bytes = total_bytes.saturating_add(size);
        if total_bytes > limits.max_total_bytes {
            return Err(CoreError::LimitExceeded(format!(
                "scanned bytes exceed cap {}",
                limits.max_total_bytes
            )));
        }
        files.push(ShardFile {
            rel,
            path: path.to_path_buf(),
            size,
        });
        if files.len() as u64 > limits.max_file_count {
            return Err(CoreError::LimitExceeded(format!(
                "file count exceeds cap {}",
                limits.max_file_count
            )));
        }
    }

    files.sort_by(|a, b| a.rel.as_bytes().cmp(b.rel.as_bytes()));
    Ok(files)
}

fn stream_file(hasher: &mut blake3::Hasher, path: &Path) -> CoreResult<()> {
    let mut file = File::open(path).map_err(|e| CoreError::io(path, e))?;
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf).map_err(|e| CoreError::io(path, e))?;
        if n == 0 {
            return Ok(());
        }
        hasher.update(&buf[..n]);
    }
}

/// Leaf hash for one covered file under the given suite.
pub fn leaf_hash(suite: Suite, rel: &str, path: &Path) -> CoreResult<[u8; 32]> {
    let mut hasher = blake3::Hasher::new();
    if suite == Suite::MlDsa44 {
        hasher.update(&[0x00]);
    }
    hasher.update(rel.as_bytes());
    hasher.update(&[0x00]);
    stream_file(&mut hasher, path)?;
    Ok(*hasher.finalize().as_bytes())
}

fn node_legacy(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

fn node_pq(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[0x01]);
    hasher.update(left);
    hasher.update(right);
    *hasher.finalize().as_bytes()
}

/// Reduce sorted leaves to a root under the given suite.
pub fn root_from_leaves(suite: Suite, leaves: &[[u8; 32]]) -> [u8; 32] {
    match suite {
        Suite::Ed25519 => {
            if leaves.is_empty() {
                return *blake3::hash(b"").as_bytes();
            }
            let mut level = leaves.to_vec();
            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len().div_ceil(2));
                for pair in level.chunks(2) {
                    // Duplicate the final node when the level is odd.
                    let right = pair.get(1).unwrap_or(&pair[0]);
                    next.push(node_legacy(&pair[0], right));
                }
                level = next;
            }
            level[0]
        }
        Suite::MlDsa44 => {
            if leaves.is_empty() {
                let mut root = [0u8; 32];
                // The frozen constant is validated against BLAKE3(0x01) in tests.
                if hex::decode_to_slice(EMPTY_ROOT_MLDSA44, &mut root).is_err() {
                    return *blake3::hash(&[0x01]).as_bytes();
                }
                return root;
            }
            let mut level = leaves.to_vec();
            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len().div_ceil(2));
                let mut chunks = level.chunks_exact(2);
                for pair in chunks.by_ref() {
                    next.push(node_pq(&pair[0], &pair[1]));
                }
                if let Some(odd) = chunks.remainder().first() {
                    // Promote unchanged, never duplicate.
                    next.push(*odd);
                }
                level = next;
            }
            level[0]
        }
    }
}

/// Compute the shard Merkle root as lowercase hex.
pub fn compute_root(root: &Path, suite: Suite, limits: &PolicyLimits) -> CoreResult<String> {
    let files = collect_files(root, limits)?;
    let mut leaves = Vec::with_capacity(files.len());
    for f in &files {
        leaves.push(leaf_hash(suite, &f.rel, &f.path)?);
    }
    Ok(hex::encode(root_from_leaves(suite, &leaves)))
}
