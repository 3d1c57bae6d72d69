//! Encryption engines
//!
//! Container formats, key derivation and key management for every
//! supported algorithm. All engines operate on whole in-memory buffers.

mod algorithm;
mod envelope;
mod kdf;
mod keystore;
mod keywrap;
mod raw;
mod token;

pub use algorithm::*;
pub use envelope::*;
pub use kdf::*;
pub use keystore::*;
pub use keywrap::*;
pub use raw::*;
pub use token::*;

#[cfg(test)]
pub(crate) use envelope::tests::shared_pair as test_key_pair;

use crate::error::{FileCryptError, Result};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;

/// Default length of a generated key in bytes
pub const DEFAULT_GENERATED_KEY_LEN: usize = 32;

/// Largest key `generate_key` will produce
pub const MAX_GENERATED_KEY_LEN: usize = 1024;

/// A cipher keyed by a caller-supplied passphrase
pub trait PassphraseCipher: Send + Sync {
    /// Algorithm label this cipher serves
    fn algorithm(&self) -> Algorithm;

    /// Encrypt a whole buffer into a container
    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>>;

    /// Decrypt a whole container back into plaintext
    fn decrypt(&self, container: &[u8], passphrase: &str) -> Result<Vec<u8>>;
}

/// Fill a buffer of `len` bytes from the OS random source
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| FileCryptError::key(format!("OS random source failed: {}", e)))?;
    Ok(buf)
}

/// Fixed-size variant of [`random_bytes`]
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    rand::rngs::OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| FileCryptError::key(format!("OS random source failed: {}", e)))?;
    Ok(buf)
}

/// Random key of `len` bytes, URL-safe base64 encoded
///
/// Not derived from anything; callers may use it as a passphrase.
pub fn generate_key(len: usize) -> Result<String> {
    if len == 0 || len > MAX_GENERATED_KEY_LEN {
        return Err(FileCryptError::invalid(format!(
            "key length must be between 1 and {} bytes",
            MAX_GENERATED_KEY_LEN
        )));
    }
    Ok(URL_SAFE.encode(random_bytes(len)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_differ() {
        let a = random_bytes(32).unwrap();
        let b = random_bytes(32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_array() {
        let iv: [u8; 16] = random_array().unwrap();
        let other: [u8; 16] = random_array().unwrap();
        assert_ne!(iv, other);
    }

    #[test]
    fn test_generate_key() {
        let a = generate_key(DEFAULT_GENERATED_KEY_LEN).unwrap();
        let b = generate_key(DEFAULT_GENERATED_KEY_LEN).unwrap();
        assert_ne!(a, b);
        assert_eq!(URL_SAFE.decode(&a).unwrap().len(), 32);
        assert_eq!(a.len(), 44);

        assert!(generate_key(0).is_err());
        assert!(generate_key(MAX_GENERATED_KEY_LEN + 1).is_err());
        assert!(generate_key(MAX_GENERATED_KEY_LEN).is_ok());
    }
}
