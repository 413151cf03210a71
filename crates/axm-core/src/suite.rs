// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Signature suites: legacy Ed25519 and ML-DSA-44 (round-3 Dilithium2
//! parameter set). Both sign the raw manifest bytes exactly as written to
//! disk, and both are deterministic: same key and message, same signature.

use ed25519_dalek::{Signer, Verifier};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};

use crate::error::{CoreError, CoreResult};

pub const ED25519_PUBLIC_KEY_LEN: usize = 32;
pub const ED25519_SIGNATURE_LEN: usize = 64;
pub const ED25519_SEED_LEN: usize = 32;
pub const ED25519_KEYPAIR_LEN: usize = 64;

pub const MLDSA44_PUBLIC_KEY_LEN: usize = 1312;
pub const MLDSA44_SECRET_KEY_LEN: usize = 2528;
pub const MLDSA44_SIGNATURE_LEN: usize = 2420;
pub const MLDSA44_KEYPAIR_LEN: usize = MLDSA44_SECRET_KEY_LEN + MLDSA44_PUBLIC_KEY_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suite {
    /// Legacy suite. Shards signed before suite tagging existed carry no
    /// `suite` field in their manifest and are treated as this.
    Ed25519,
    /// Post-quantum suite `axm-blake3-mldsa44`.
    MlDsa44,
}

impl Suite {
    pub const fn id(self) -> &'static str {
        match self {
            Suite::Ed25519 => "ed25519",
            Suite::MlDsa44 => "axm-blake3-mldsa44",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "ed25519" => Some(Suite::Ed25519),
            "axm-blake3-mldsa44" => Some(Suite::MlDsa44),
            _ => None,
        }
    }

    pub const fn public_key_len(self) -> usize {
        match self {
            Suite::Ed25519 => ED25519_PUBLIC_KEY_LEN,
            Suite::MlDsa44 => MLDSA44_PUBLIC_KEY_LEN,
        }
    }

    pub const fn signature_len(self) -> usize {
        match self {
            Suite::Ed25519 => ED25519_SIGNATURE_LEN,
            Suite::MlDsa44 => MLDSA44_SIGNATURE_LEN,
        }
    }
}

/// Resolve the suite for a shard being read.
///
/// A manifest-declared suite wins but must agree with the embedded key size;
/// without a declaration the key size alone decides. Unknown suites and
/// conflicts are errors, never silent fallbacks.
pub fn detect_suite(declared: Option<&str>, public_key_len: usize) -> Result<Suite, String> {
    match declared {
        Some(id) => {
            let suite = Suite::from_id(id).ok_or_else(|| format!("unknown suite: {id}"))?;
            if public_key_len != suite.public_key_len() {
                return Err(format!(
                    "suite {id} expects a {}-byte public key, found {public_key_len} bytes",
                    suite.public_key_len()
                ));
            }
            Ok(suite)
        }
        None => match public_key_len {
            ED25519_PUBLIC_KEY_LEN => Ok(Suite::Ed25519),
            MLDSA44_PUBLIC_KEY_LEN => Ok(Suite::MlDsa44),
            other => Err(format!(
                "no suite declared and public key size {other} matches no known suite"
            )),
        },
    }
}

/// A loaded signing key, ready to seal a manifest.
pub enum ShardSigningKey {
    Ed25519(ed25519_dalek::SigningKey),
    MlDsa44 {
        secret: dilithium2::SecretKey,
        public: dilithium2::PublicKey,
    },
}

impl ShardSigningKey {
    pub fn suite(&self) -> Suite {
        match self {
            ShardSigningKey::Ed25519(_) => Suite::Ed25519,
            ShardSigningKey::MlDsa44 { .. } => Suite::MlDsa44,
        }
    }

    /// Parse key material for the given suite.
    ///
    /// Ed25519 accepts a 32-byte seed or a 64-byte seed‖pk blob (the first
    /// 32 bytes are the seed). ML-DSA-44 accepts a 3840-byte sk‖pk blob, or
    /// a bare 2528-byte secret key together with `public_key` since the
    /// public half is not derivable from the secret half alone.
    pub fn from_bytes(suite: Suite, bytes: &[u8], public_key: Option<&[u8]>) -> CoreResult<Self> {
        match suite {
            Suite::Ed25519 => {
                if bytes.len() != ED25519_SEED_LEN && bytes.len() != ED25519_KEYPAIR_LEN {
                    return Err(CoreError::KeyMaterial {
                        suite: suite.id(),
                        reason: format!(
                            "expected {ED25519_SEED_LEN} or {ED25519_KEYPAIR_LEN} bytes, found {}",
                            bytes.len()
                        ),
                    });
                }
                let mut seed = [0u8; ED25519_SEED_LEN];
                seed.copy_from_slice(&bytes[..ED25519_SEED_LEN]);
                Ok(ShardSigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed)))
            }
            Suite::MlDsa44 => {
                let (sk_bytes, pk_bytes): (&[u8], &[u8]) = if bytes.len() == MLDSA44_KEYPAIR_LEN {
                    bytes.split_at(MLDSA44_SECRET_KEY_LEN)
                } else if bytes.len() == MLDSA44_SECRET_KEY_LEN {
                    let pk = public_key.ok_or_else(|| CoreError::KeyMaterial {
                        suite: suite.id(),
                        reason: "bare secret key needs the matching public key".to_string(),
                    })?;
                    (bytes, pk)
                } else {
                    return Err(CoreError::KeyMaterial {
                        suite: suite.id(),
                        reason: format!(
                            "expected {MLDSA44_SECRET_KEY_LEN} or {MLDSA44_KEYPAIR_LEN} bytes, found {}",
                            bytes.len()
                        ),
                    });
                };
                let secret = dilithium2::SecretKey::from_bytes(sk_bytes).map_err(|_| {
                    CoreError::KeyMaterial {
                        suite: suite.id(),
                        reason: "malformed secret key".to_string(),
                    }
                })?;
                let public = dilithium2::PublicKey::from_bytes(pk_bytes).map_err(|_| {
                    CoreError::KeyMaterial {
                        suite: suite.id(),
                        reason: "malformed public key".to_string(),
                    }
                })?;
                Ok(ShardSigningKey::MlDsa44 { secret, public })
            }
        }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            ShardSigningKey::Ed25519(sk) => sk.verifying_key().to_bytes().to_vec(),
            ShardSigningKey::MlDsa44 { public, .. } => public.as_bytes().to_vec(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match self {
            ShardSigningKey::Ed25519(sk) => sk.sign(message).to_bytes().to_vec(),
            ShardSigningKey::MlDsa44 { secret, .. } => {
                dilithium2::detached_sign(message, secret).as_bytes().to_vec()
            }
        }
    }
}

/// Verify a detached signature over `message` under the given suite.
pub fn verify_signature(suite: Suite, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    if public_key.len() != suite.public_key_len() || signature.len() != suite.signature_len() {
        return false;
    }
    match suite {
        Suite::Ed25519 => {
            let Ok(pk_arr) = <[u8; ED25519_PUBLIC_KEY_LEN]>::try_from(public_key) else {
                return false;
            };
            let Ok(pk) = ed25519_dalek::VerifyingKey::from_bytes(&pk_arr) else {
                return false;
            };
            let Ok(sig) = ed25519_dalek::Signature::from_slice(signature) else {
                return false;
            };
            pk.verify(message, &sig).is_ok()
        }
        Suite::MlDsa44 => {
            let Ok(pk) = dilithium2::PublicKey::from_bytes(public_key) else {
                return false;
            };
            let Ok(sig) = dilithium2::DetachedSignature::from_bytes(signature) else {
                return false;
            };
            dilithium2::verify_detached_signature(&sig, message, &pk).is_ok()
        }
    }
}

/// Generate a fresh key pair; returns `(secret_blob, public_key)`.
///
/// The secret blob is a 32-byte seed for Ed25519 and an sk‖pk blob for
/// ML-DSA-44, so either output can be fed straight back into
/// [`ShardSigningKey::from_bytes`].
pub fn generate_keypair(suite: Suite) -> (Vec<u8>, Vec<u8>) {
    match suite {
        Suite::Ed25519 => {
            let sk = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
            (sk.to_bytes().to_vec(), sk.verifying_key().to_bytes().to_vec())
        }
        Suite::MlDsa44 => {
            let (pk, sk) = dilithium2::keypair();
            let mut blob = Vec::with_capacity(MLDSA44_KEYPAIR_LEN);
            blob.extend_from_slice(sk.as_bytes());
            blob.extend_from_slice(pk.as_bytes());
            (blob, pk.as_bytes().to_vec())
        }
    }
}
