// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing and static validation must never panic on attacker bytes.
    if let Ok(manifest) = axm_core::manifest::parse_manifest(data) {
        let _ = manifest.validate();
        let _ = axm_core::canonical::canonical_json_bytes(&manifest);
    }
});
