// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    if let Ok(once) = axm_core::canonical::canon(data) {
        let twice = axm_core::canonical::canon(&once).unwrap();
        assert_eq!(once, twice, "canonicalization must be idempotent");
        assert!(!once.chars().any(|c| (c as u32) < 0x20 || c as u32 == 0x7F));
    }
});
