// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

use axm_core::compiler::{compile_shard, parse_candidates_jsonl, ShardMetadata};
use axm_core::suite::{ShardSigningKey, Suite};
use axm_core::verifier::verify_shard;
use axm_core::PolicyLimits;

#[derive(Parser)]
#[command(name = "axmctl", about = "Compile and verify sealed knowledge shards")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SuiteArg {
    /// Ed25519 signatures, legacy Merkle construction.
    Legacy,
    /// ML-DSA-44 signatures, domain-separated Merkle construction.
    Pq,
}

impl From<SuiteArg> for Suite {
    fn from(arg: SuiteArg) -> Self {
        match arg {
            SuiteArg::Legacy => Suite::Ed25519,
            SuiteArg::Pq => Suite::MlDsa44,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Compile a candidate stream and content files into a signed shard.
    Compile {
        /// Candidate records, one JSON object per line.
        #[arg(long)]
        candidates: PathBuf,
        /// Directory of source content files.
        #[arg(long)]
        content: PathBuf,
        /// Output shard directory (replaced if it exists).
        #[arg(long)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = SuiteArg::Pq)]
        suite: SuiteArg,
        /// Signing key: a 32-byte Ed25519 seed, or an ML-DSA-44 sk||pk blob
        /// (3840 bytes) or bare secret key (2528 bytes, needs --public-key).
        #[arg(long)]
        signing_key: PathBuf,
        /// Public key, only required with a bare ML-DSA-44 secret key.
        #[arg(long)]
        public_key: Option<PathBuf>,
        #[arg(long)]
        namespace: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "@axm_builder")]
        publisher_id: String,
        #[arg(long, default_value = "AXM Genesis Builder")]
        publisher_name: String,
        #[arg(long, default_value = "UNLICENSED")]
        license: String,
        /// RFC 3339 timestamp sealed into the manifest. Defaults to now;
        /// pass a fixed value for reproducible builds.
        #[arg(long)]
        created_at: Option<String>,
    },
    /// Verify a shard directory against a trusted publisher key.
    Verify {
        shard_dir: PathBuf,
        #[arg(long)]
        trusted_key: PathBuf,
    },
    /// Generate a signing key pair for a suite.
    Keygen {
        #[arg(long, value_enum, default_value_t = SuiteArg::Pq)]
        suite: SuiteArg,
        /// Output prefix: writes <prefix>.sk and <prefix>.pub.
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("AXM_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let out = match cli.cmd {
        Command::Compile {
            candidates,
            content,
            out,
            suite,
            signing_key,
            public_key,
            namespace,
            title,
            publisher_id,
            publisher_name,
            license,
            created_at,
        } => run_compile(
            candidates,
            content,
            out,
            suite.into(),
            signing_key,
            public_key,
            namespace,
            title,
            publisher_id,
            publisher_name,
            license,
            created_at,
        ),
        Command::Verify {
            shard_dir,
            trusted_key,
        } => {
            // The report prints either way; the exit code carries the verdict.
            match run_verify(shard_dir, trusted_key) {
                Ok((value, passed)) => {
                    println!("{value}");
                    if !passed {
                        std::process::exit(1);
                    }
                    return;
                }
                Err(msg) => Err(msg),
            }
        }
        Command::Keygen { suite, out } => run_keygen(suite.into(), out),
    };
    match out {
        Ok(v) => println!("{v}"),
        Err(msg) => {
            println!("{}", json!({ "error": msg }));
            std::process::exit(1);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_compile(
    candidates_path: PathBuf,
    content: PathBuf,
    out: PathBuf,
    suite: Suite,
    signing_key_path: PathBuf,
    public_key_path: Option<PathBuf>,
    namespace: String,
    title: String,
    publisher_id: String,
    publisher_name: String,
    license: String,
    created_at: Option<String>,
) -> Result<serde_json::Value, String> {
    let text = fs::read_to_string(&candidates_path)
        .map_err(|e| format!("cannot read {}: {e}", candidates_path.display()))?;
    let candidates = parse_candidates_jsonl(&text).map_err(|e| e.to_string())?;

    let key_bytes = fs::read(&signing_key_path)
        .map_err(|e| format!("cannot read {}: {e}", signing_key_path.display()))?;
    let public_bytes = match &public_key_path {
        Some(p) => Some(fs::read(p).map_err(|e| format!("cannot read {}: {e}", p.display()))?),
        None => None,
    };
    let signing_key = ShardSigningKey::from_bytes(suite, &key_bytes, public_bytes.as_deref())
        .map_err(|e| e.to_string())?;

    let created_at = match created_at {
        Some(ts) => ts,
        None => OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .map_err(|e| format!("cannot format timestamp: {e}"))?,
    };
    let metadata = ShardMetadata {
        title,
        namespace,
        publisher_id,
        publisher_name,
        license_spdx: license,
        created_at,
    };

    let report = compile_shard(
        &candidates,
        &content,
        &out,
        &metadata,
        &signing_key,
        &PolicyLimits::default(),
    )
    .map_err(|e| match e {
        axm_core::CoreError::SelfVerify(issues) => {
            json!({ "self_verify": issues }).to_string()
        }
        other => other.to_string(),
    })?;

    tracing::info!(
        shard = %report.shard_dir.display(),
        entities = report.entities,
        claims = report.claims,
        "shard sealed"
    );
    serde_json::to_value(&report.manifest)
        .map(|m| json!({ "shard_dir": report.shard_dir, "manifest": m }))
        .map_err(|e| e.to_string())
}

fn run_verify(
    shard_dir: PathBuf,
    trusted_key: PathBuf,
) -> Result<(serde_json::Value, bool), String> {
    let trusted = fs::read(&trusted_key)
        .map_err(|e| format!("cannot read {}: {e}", trusted_key.display()))?;
    let report = verify_shard(&shard_dir, &trusted, &PolicyLimits::default())
        .map_err(|e| e.to_string())?;
    let value = serde_json::to_value(&report).map_err(|e| e.to_string())?;
    Ok((value, report.passed()))
}

fn run_keygen(suite: Suite, out: PathBuf) -> Result<serde_json::Value, String> {
    let (secret, public) = axm_core::suite::generate_keypair(suite);
    let sk_path = out.with_extension("sk");
    let pk_path = out.with_extension("pub");
    fs::write(&sk_path, &secret).map_err(|e| format!("cannot write {}: {e}", sk_path.display()))?;
    fs::write(&pk_path, &public).map_err(|e| format!("cannot write {}: {e}", pk_path.display()))?;
    Ok(json!({
        "suite": suite.id(),
        "secret_key": sk_path,
        "public_key": pk_path,
    }))
}
