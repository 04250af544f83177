//! Secret verification and trust-level derivation.
//!
//! Secrets travel as an AES-256-GCM sealed blob: base64 of
//! `nonce (12) || ciphertext || tag` under a 32-byte hex-encoded key. The
//! decrypted plaintext is a small YAML document carrying a checksum of the
//! pipeline text plus the secret environment.
//!
//! The checksum decides how much the build is trusted: a matching checksum
//! on a push build injects everywhere, a matching checksum on a pull
//! request injects only into safe positions, and a mismatch narrows scope
//! (deploy and notify are disabled) instead of failing the build.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::errors::Error;
use super::types::EnvMap;
use crate::payload::EVENT_PULL_REQUEST;

/// How far the decrypted secrets may be trusted for this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustLevel {
    /// No secrets blob was supplied.
    NoSecrets,
    /// Checksum verified on a non-pull-request build: inject anywhere.
    VerifiedFull,
    /// Checksum verified on a pull request: inject in safe positions only.
    VerifiedSafe,
    /// Checksum missing or mismatched: inject nothing, disable deploy and
    /// notify phases.
    Unverified,
}

/// Decrypted secrets. Exists only during compilation; never persisted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bundle {
    /// Hex SHA-256 of the pipeline text at signing time; may be empty for
    /// legacy blobs.
    pub checksum: String,
    /// The secret environment.
    pub environment: EnvMap,
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("checksum", &self.checksum)
            .field("environment", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct Plaintext {
    checksum: String,
    environment: EnvMap,
}

impl Default for Plaintext {
    fn default() -> Self {
        Self {
            checksum: String::new(),
            environment: EnvMap::default(),
        }
    }
}

/// Decrypts a secrets blob with the given hex-encoded 32-byte key.
///
/// # Errors
///
/// Returns [`Error::Config`] when the key or blob encoding is invalid,
/// decryption fails, or the plaintext is not a valid secrets document.
pub fn decrypt(blob: &str, key_hex: &str) -> Result<Bundle, Error> {
    let key = decode_key(key_hex)?;
    let data = BASE64
        .decode(blob.trim())
        .map_err(|e| Error::Config(format!("invalid secrets blob encoding: {e}")))?;
    if data.len() < 12 {
        return Err(Error::Config("secrets blob too short".to_string()));
    }

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Config(format!("invalid secrets key: {e}")))?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&data[..12]), &data[12..])
        .map_err(|_| Error::Config("decrypting encrypted secrets failed".to_string()))?;

    let parsed: Plaintext = serde_yaml::from_slice(&plaintext)
        .map_err(|e| Error::Config(format!("malformed secrets document: {e}")))?;
    Ok(Bundle {
        checksum: parsed.checksum,
        environment: parsed.environment,
    })
}

/// Hex SHA-256 checksum of the pipeline text.
#[must_use]
pub fn checksum(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether the bundle's checksum validates the pipeline text.
///
/// An empty stored checksum counts as verified (legacy blobs), except that
/// verification is forced false for a pull request against a public
/// repository when no checksum was supplied at all. A fork build must not
/// silently inherit trusted secrets.
#[must_use]
pub fn verified(bundle: &Bundle, text: &str, event: &str, repo_private: bool) -> bool {
    if event == EVENT_PULL_REQUEST && !repo_private && bundle.checksum.is_empty() {
        return false;
    }
    bundle.checksum.is_empty() || bundle.checksum == checksum(text)
}

/// Derives the trust level governing injection mode and phase availability.
#[must_use]
pub fn trust_level(
    bundle: Option<&Bundle>,
    text: &str,
    event: &str,
    repo_private: bool,
) -> TrustLevel {
    let Some(bundle) = bundle else {
        return TrustLevel::NoSecrets;
    };
    match (
        verified(bundle, text, event, repo_private),
        event == EVENT_PULL_REQUEST,
    ) {
        (true, true) => TrustLevel::VerifiedSafe,
        (true, false) => TrustLevel::VerifiedFull,
        (false, _) => TrustLevel::Unverified,
    }
}

/// Seals a secrets document into a blob [`decrypt`] accepts.
///
/// Fixture tooling: the nonce is derived from the plaintext, which is fine
/// for generating test payloads but not for production signing services.
#[must_use]
pub fn seal(plaintext: &str, key_hex: &str) -> Option<String> {
    let key = decode_key(key_hex).ok()?;
    let cipher = Aes256Gcm::new_from_slice(&key).ok()?;

    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    let digest = hasher.finalize();
    let nonce_bytes = &digest[..12];

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce_bytes), plaintext.as_bytes())
        .ok()?;

    let mut out = Vec::with_capacity(12 + ciphertext.len());
    out.extend_from_slice(nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Some(BASE64.encode(out))
}

fn decode_key(key_hex: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(key_hex.trim())
        .map_err(|e| Error::Config(format!("invalid secrets key hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|v: Vec<u8>| Error::Config(format!("secrets key must be 32 bytes, got {}", v.len())))
}
