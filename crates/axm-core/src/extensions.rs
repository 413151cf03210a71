// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Supplementary tables under `ext/`.
//!
//! Extension tables are covered by the Merkle tree but otherwise opaque to
//! the core verifier. A verifier that understands a given extension can
//! register a validator keyed by its `<name>@<version>` tag; unknown tags
//! are inert bytes. Extension tables must join through the stable id set
//! (`evidence_addr`, `claim_id`, `entity_id`, `shard_id`, `source_hash`),
//! never through `provenance_id` alone.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::VerifyIssue;

/// A parsed `<name>@<version>` extension tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtensionRef {
    pub name: String,
    pub version: String,
}

impl ExtensionRef {
    pub fn tag(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}

/// Parse an `ext/` file name of the form `<name>@<version>.parquet`.
pub fn parse_extension_file_name(file_name: &str) -> Option<ExtensionRef> {
    let stem = file_name.strip_suffix(".parquet")?;
    let (name, version) = stem.split_once('@')?;
    if name.is_empty() || version.is_empty() || version.contains('@') {
        return None;
    }
    Some(ExtensionRef {
        name: name.to_string(),
        version: version.to_string(),
    })
}

/// Validation hook for one extension table.
pub trait ExtensionValidator: Send + Sync {
    /// Inspect the table and report findings. `rel` is the shard-relative
    /// path used for issue locations.
    fn validate(&self, table_path: &Path, rel: &str) -> Vec<VerifyIssue>;
}

/// Registry of known extension validators, keyed by `<name>@<version>`.
///
/// This is the single dispatch point for extension awareness: the core
/// verifier consults it once per `ext/` table and ignores unregistered tags.
#[derive(Default, Clone)]
pub struct ExtensionRegistry {
    validators: HashMap<String, Arc<dyn ExtensionValidator>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tag: impl Into<String>, validator: Arc<dyn ExtensionValidator>) {
        self.validators.insert(tag.into(), validator);
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn ExtensionValidator>> {
        self.validators.get(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}
