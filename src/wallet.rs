//! Secret key loading and wallet identity derivation

use std::fmt;
use std::path::Path;

use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::signer::keypair::keypair_from_seed;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Length of an ed25519 keypair in bytes (secret half + public half)
pub const KEYPAIR_LENGTH: usize = 64;

/// A base58 secret key that has already been decoded once and found valid.
///
/// Only the encoded text is kept; the keypair is re-derived when a transfer
/// attempt needs it and dropped with that attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn parse(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        decode_keypair(encoded)?;
        Ok(Self(encoded.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the signing identity for one transfer attempt
    pub fn keypair(&self) -> Result<Keypair> {
        decode_keypair(&self.0)
    }
}

// Never print secret material
impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

fn decode_keypair(encoded: &str) -> Result<Keypair> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| Error::InvalidKey(format!("not base58: {}", e)))?;

    if bytes.len() != KEYPAIR_LENGTH {
        return Err(Error::InvalidKey(format!(
            "expected {} bytes, got {}",
            KEYPAIR_LENGTH,
            bytes.len()
        )));
    }

    // the secret half must reproduce the public half
    let keypair = keypair_from_seed(&bytes[..32]).map_err(|e| Error::InvalidKey(e.to_string()))?;
    if keypair.pubkey().to_bytes()[..] != bytes[32..] {
        return Err(Error::InvalidKey(
            "public key does not match secret key".to_string(),
        ));
    }

    Ok(keypair)
}

/// A line that failed validation
#[derive(Debug, Clone)]
pub struct RejectedKey {
    /// 1-based line number in the key file
    pub line: usize,
    pub reason: String,
}

/// Result of reading a key file
#[derive(Debug, Default)]
pub struct KeyLoadReport {
    pub keys: Vec<SecretKey>,
    pub rejected: Vec<RejectedKey>,
}

/// Read a newline-delimited key file, keeping only keys that decode to a
/// valid keypair. Invalid lines are logged and skipped; blank lines are ignored.
pub fn load_keys(path: &Path) -> Result<KeyLoadReport> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(format!("Failed to read {}: {}", path.display(), e)))?;

    let report = parse_keys(&content);
    info!(
        "Loaded {} valid keys from {} ({} rejected)",
        report.keys.len(),
        path.display(),
        report.rejected.len()
    );
    Ok(report)
}

pub fn parse_keys(content: &str) -> KeyLoadReport {
    let mut report = KeyLoadReport::default();

    for (index, line) in content.lines().enumerate() {
        let candidate = line.trim();
        if candidate.is_empty() {
            continue;
        }

        match SecretKey::parse(candidate) {
            Ok(key) => {
                debug!("Key on line {} is valid", index + 1);
                report.keys.push(key);
            }
            Err(e) => {
                warn!("Invalid key detected on line {}: {}", index + 1, e);
                report.rejected.push(RejectedKey {
                    line: index + 1,
                    reason: e.to_string(),
                });
            }
        }
    }

    report
}

/// Public address of a key, for display
pub fn owner_of(key: &SecretKey) -> Result<String> {
    Ok(key.keypair()?.pubkey().to_string())
}
