//! Model signing utility for PTLD risk model artifacts.
//!
//! Writes `manifest.json` (SHA-256 of `model.json` and, when present,
//! `model_metadata.json`) and `model.sig` (Ed25519 over the manifest bytes).
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin sign_model -- <model_dir> [--serial <n>]
//! ```
//!
//! The 32-byte signing seed (base64) is read from, in order:
//! `PTLD_MODEL_SIGNING_KEY_B64_FD`, `PTLD_MODEL_SIGNING_KEY_B64_FILE`,
//! `/run/secrets/ptld_model_signing_key_b64`, and in debug builds only
//! `PTLD_MODEL_SIGNING_KEY_B64`. The seed is zeroized after use.

use std::collections::BTreeMap;
use std::env;
use std::fs;
#[cfg(unix)]
use std::os::unix::io::FromRawFd;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use ptld_guard::adapters::artifact::{
    sha256_hex, ModelManifest, MANIFEST_FILE, MANIFEST_VERSION, METADATA_FILE, MODEL_FILE,
    SIGNATURE_FILE,
};

const KEY_FD_ENV: &str = "PTLD_MODEL_SIGNING_KEY_B64_FD";
const KEY_FILE_ENV: &str = "PTLD_MODEL_SIGNING_KEY_B64_FILE";
const KEY_ENV: &str = "PTLD_MODEL_SIGNING_KEY_B64";
const DOCKER_SECRET_PATH: &str = "/run/secrets/ptld_model_signing_key_b64";

#[derive(Zeroize, ZeroizeOnDrop)]
struct Seed([u8; 32]);

fn non_empty(secret: &str) -> Result<Zeroizing<String>> {
    let secret = secret.trim_end_matches(['\n', '\r']);
    if secret.is_empty() {
        bail!("Empty signing key");
    }
    Ok(Zeroizing::new(secret.to_string()))
}

fn read_signing_seed_b64() -> Result<Zeroizing<String>> {
    #[cfg(unix)]
    if let Ok(fd_str) = env::var(KEY_FD_ENV) {
        use std::io::Read;

        let fd: i32 = fd_str.trim().parse().context("Invalid key FD")?;
        if fd <= 2 {
            bail!("Refusing to read signing key from stdio FD");
        }
        // SAFETY: the caller hands this FD over for a single secret read.
        let mut file = unsafe { fs::File::from_raw_fd(fd) };
        let mut buf = Zeroizing::new(String::new());
        file.read_to_string(&mut buf)
            .context("Failed reading signing key from FD")?;
        return non_empty(&buf);
    }

    if let Ok(path) = env::var(KEY_FILE_ENV) {
        let content = Zeroizing::new(
            fs::read_to_string(path.trim()).context("Failed reading signing key file")?,
        );
        return non_empty(&content);
    }

    if Path::new(DOCKER_SECRET_PATH).exists() {
        let content = Zeroizing::new(
            fs::read_to_string(DOCKER_SECRET_PATH).context("Failed reading docker secret")?,
        );
        return non_empty(&content);
    }

    if cfg!(debug_assertions) {
        if let Ok(v) = env::var(KEY_ENV) {
            return non_empty(&Zeroizing::new(v));
        }
    }

    Err(anyhow!(
        "Missing signing key. Provide one of: {KEY_FD_ENV}, {KEY_FILE_ENV}, or {DOCKER_SECRET_PATH} ({KEY_ENV} only in debug builds)."
    ))
}

fn read_signing_seed() -> Result<Seed> {
    let b64 = read_signing_seed_b64()?;
    let raw = Zeroizing::new(
        general_purpose::STANDARD
            .decode(b64.trim())
            .context("Invalid base64 in signing key")?,
    );
    if raw.len() != 32 {
        bail!(
            "Signing key seed must be 32 bytes after base64 decode (got {})",
            raw.len()
        );
    }
    let mut seed = Seed([0u8; 32]);
    seed.0.copy_from_slice(&raw);
    Ok(seed)
}

fn usage() -> anyhow::Error {
    anyhow!("Usage: sign_model <model_dir> [--serial <u64>]")
}

fn parse_args() -> Result<(PathBuf, Option<u64>)> {
    let mut args = env::args().skip(1);
    let mut model_dir = None;
    let mut serial = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--serial" => {
                let v = args.next().ok_or_else(usage)?;
                serial = Some(v.trim().parse::<u64>().context("--serial must be a u64")?);
            }
            "-h" | "--help" => return Err(usage()),
            _ if model_dir.is_none() => model_dir = Some(PathBuf::from(arg)),
            _ => return Err(usage()),
        }
    }

    Ok((model_dir.ok_or_else(usage)?, serial))
}

fn main() -> Result<()> {
    let (model_dir, serial_arg) = parse_args()?;

    let model_path = model_dir.join(MODEL_FILE);
    if !model_path.is_file() {
        bail!("No {MODEL_FILE} found in {}", model_dir.display());
    }

    let mut files = BTreeMap::new();
    for rel in [MODEL_FILE, METADATA_FILE] {
        let path = model_dir.join(rel);
        if path.exists() {
            let bytes = fs::read(&path).with_context(|| format!("Failed to read {path:?}"))?;
            files.insert(rel.to_string(), sha256_hex(&bytes));
        }
    }

    let created_at = chrono::Utc::now().timestamp();
    let manifest = ModelManifest {
        version: MANIFEST_VERSION,
        serial: serial_arg.unwrap_or_else(|| u64::try_from(created_at).unwrap_or(1)),
        created_at,
        files,
    };
    let manifest_bytes =
        serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;

    let seed = read_signing_seed()?;
    let signing_key = SigningKey::from_bytes(&seed.0);
    drop(seed);

    let manifest_path = model_dir.join(MANIFEST_FILE);
    fs::write(&manifest_path, &manifest_bytes)
        .with_context(|| format!("Failed to write {manifest_path:?}"))?;

    let sig: Signature = signing_key.sign(&manifest_bytes);
    let sig_path = model_dir.join(SIGNATURE_FILE);
    fs::write(&sig_path, sig.to_bytes()).with_context(|| format!("Failed to write {sig_path:?}"))?;

    println!("Signed manifest: {}", manifest_path.display());
    println!("Wrote signature: {}", sig_path.display());
    println!(
        "Verifying key (base64, for PTLD_MODEL_PUBKEY_B64_FILE): {}",
        general_purpose::STANDARD.encode(signing_key.verifying_key().as_bytes())
    );

    Ok(())
}
