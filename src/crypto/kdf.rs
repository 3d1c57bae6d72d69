//! Key derivation
//!
//! Two derivation modes are supported:
//! - Digest: a single unsalted SHA-256 of the passphrase. Weak, but every
//!   passphrase-keyed container format depends on it byte for byte.
//! - Salted iterated: PBKDF2-HMAC-SHA256 with a per-call salt, used only by
//!   explicit private-key wrapping.

use crate::crypto::Algorithm;
use crate::error::{FileCryptError, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;

/// Derived key length in bytes
pub const KEY_LEN: usize = 32;

/// Minimum PBKDF2 iteration count accepted for salted derivation
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// How key material was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationMethod {
    /// SHA-256 of the passphrase bytes
    Digest,
    /// PBKDF2-HMAC-SHA256
    SaltedIterated {
        /// Number of iterations
        iterations: u32,
    },
}

/// Derived key bytes bound to the algorithm that will consume them
#[derive(Clone)]
pub struct CipherKeyMaterial {
    bytes: [u8; KEY_LEN],
    method: DerivationMethod,
    algorithm: Algorithm,
}

impl CipherKeyMaterial {
    /// Raw derived bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// URL-safe base64 form of the derived bytes (44 ASCII characters)
    ///
    /// The raw Blowfish container keys its cipher with these characters,
    /// not with the raw digest.
    pub fn encoded(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    /// Derivation method used
    pub fn method(&self) -> DerivationMethod {
        self.method
    }

    /// Algorithm this key is bound to
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }
}

impl fmt::Debug for CipherKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherKeyMaterial")
            .field("bytes", &"<redacted>")
            .field("method", &self.method)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl Drop for CipherKeyMaterial {
    fn drop(&mut self) {
        // Zero out key on drop
        for byte in &mut self.bytes {
            *byte = 0;
        }
    }
}

/// Derive key material with a single SHA-256 over the passphrase
pub fn derive_digest_key(passphrase: &str, algorithm: Algorithm) -> CipherKeyMaterial {
    let digest = Sha256::digest(passphrase.as_bytes());
    let mut bytes = [0u8; KEY_LEN];
    bytes.copy_from_slice(&digest);

    CipherKeyMaterial {
        bytes,
        method: DerivationMethod::Digest,
        algorithm,
    }
}

/// Derive key material with PBKDF2-HMAC-SHA256
pub fn derive_salted_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
    algorithm: Algorithm,
) -> Result<CipherKeyMaterial> {
    if iterations < MIN_PBKDF2_ITERATIONS {
        return Err(FileCryptError::key(format!(
            "PBKDF2 needs at least {} iterations, got {}",
            MIN_PBKDF2_ITERATIONS, iterations
        )));
    }
    if salt.is_empty() {
        return Err(FileCryptError::key("PBKDF2 salt must not be empty"));
    }

    let mut bytes = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut bytes);

    Ok(CipherKeyMaterial {
        bytes,
        method: DerivationMethod::SaltedIterated { iterations },
        algorithm,
    })
}
