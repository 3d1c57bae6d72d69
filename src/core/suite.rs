//! Engine selection
//!
//! Maps each [`Algorithm`] onto the engine that implements it. The token
//! and raw engines take the caller's passphrase; the envelope engine reads
//! the key pair from the key store on every call so a `keygen --force`
//! takes effect without a restart.

use crate::crypto::{
    Algorithm, ContainerFormat, EnvelopeEngine, EnvelopePadding, KeyStore, PassphraseCipher,
    RawBlowfishCipher, TokenCipher,
};
use crate::error::{FileCryptError, Result};

/// Whether a buffer is being encrypted or decrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Plaintext to container
    Encrypt,
    /// Container to plaintext
    Decrypt,
}

impl Direction {
    /// Verb for messages
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Encrypt => "encrypted",
            Self::Decrypt => "decrypted",
        }
    }
}

/// All engines behind one interface
#[derive(Debug)]
pub struct CipherSuite {
    aes_small: TokenCipher,
    aes_large: TokenCipher,
    blowfish: RawBlowfishCipher,
    envelope: EnvelopeEngine,
    keys: KeyStore,
}

impl CipherSuite {
    /// Create the suite over a key store
    pub fn new(keys: KeyStore, padding: EnvelopePadding) -> Self {
        Self {
            aes_small: TokenCipher::new(Algorithm::AesSmall),
            aes_large: TokenCipher::new(Algorithm::AesLarge),
            blowfish: RawBlowfishCipher::new(),
            envelope: EnvelopeEngine::new(padding),
            keys,
        }
    }

    /// Key store used by the envelope engine
    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Passphrase engine for an algorithm, if it uses one
    pub fn passphrase_cipher(&self, algorithm: Algorithm) -> Option<&dyn PassphraseCipher> {
        match algorithm {
            Algorithm::AesSmall => Some(&self.aes_small),
            Algorithm::AesLarge => Some(&self.aes_large),
            Algorithm::Blowfish => Some(&self.blowfish),
            Algorithm::Rsa => None,
        }
    }

    /// Run one engine over a whole buffer
    pub fn apply(&self, direction: Direction, algorithm: Algorithm, input: &[u8], key: &str) -> Result<Vec<u8>> {
        match direction {
            Direction::Encrypt => self.encrypt(algorithm, input, key),
            Direction::Decrypt => self.decrypt(algorithm, input, key),
        }
    }

    /// Encrypt a buffer
    pub fn encrypt(&self, algorithm: Algorithm, plaintext: &[u8], key: &str) -> Result<Vec<u8>> {
        if algorithm.format() == ContainerFormat::Envelope {
            log_ignored_key(key);
            let public = self.keys.load_public()?;
            return self.envelope.seal(plaintext, &public);
        }
        self.cipher_for(algorithm, key)?.encrypt(plaintext, key)
    }

    /// Decrypt a container
    pub fn decrypt(&self, algorithm: Algorithm, container: &[u8], key: &str) -> Result<Vec<u8>> {
        if algorithm.format() == ContainerFormat::Envelope {
            log_ignored_key(key);
            let private = self.keys.load_private()?;
            return self.envelope.open(container, &private);
        }
        self.cipher_for(algorithm, key)?.decrypt(container, key)
    }

    fn cipher_for(&self, algorithm: Algorithm, key: &str) -> Result<&dyn PassphraseCipher> {
        if key.is_empty() {
            return Err(FileCryptError::invalid(format!(
                "algorithm {} requires a passphrase",
                algorithm
            )));
        }
        self.passphrase_cipher(algorithm)
            .ok_or_else(|| FileCryptError::UnsupportedAlgorithm(algorithm.to_string()))
    }
}

fn log_ignored_key(key: &str) {
    if !key.is_empty() {
        tracing::debug!("Ignoring passphrase for rsa; the envelope uses the stored key pair");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_key_pair as shared_pair;
    use tempfile::TempDir;

    fn suite(dir: &TempDir) -> CipherSuite {
        let keys = KeyStore::new(dir.path().join("Keys"));
        keys.save(shared_pair()).unwrap();
        CipherSuite::new(keys, EnvelopePadding::Pkcs7)
    }

    #[test]
    fn test_every_algorithm_round_trips() {
        let dir = TempDir::new().unwrap();
        let suite = suite(&dir);
        let plaintext = b"attack at dawn".repeat(100);

        for alg in Algorithm::ALL {
            let container = suite.encrypt(alg, &plaintext, "test123").unwrap();
            assert_ne!(container, plaintext, "{}", alg);
            let plain = suite.decrypt(alg, &container, "test123").unwrap();
            assert_eq!(plain, plaintext, "{}", alg);
        }
    }

    #[test]
    fn test_hello_world_token() {
        let dir = TempDir::new().unwrap();
        let suite = suite(&dir);
        let token = suite.encrypt(Algorithm::AesSmall, b"hello world", "test123").unwrap();
        let plain = suite.decrypt(Algorithm::AesSmall, &token, "test123").unwrap();
        assert_eq!(plain.len(), 11);
        assert_eq!(plain, b"hello world");
    }

    #[test]
    fn test_rsa_ignores_key() {
        let dir = TempDir::new().unwrap();
        let suite = suite(&dir);
        let container = suite.encrypt(Algorithm::Rsa, b"data", "one").unwrap();
        assert_eq!(suite.decrypt(Algorithm::Rsa, &container, "").unwrap(), b"data");
    }

    #[test]
    fn test_symmetric_requires_passphrase() {
        let dir = TempDir::new().unwrap();
        let suite = suite(&dir);
        for alg in [Algorithm::AesSmall, Algorithm::AesLarge, Algorithm::Blowfish] {
            assert!(matches!(
                suite.encrypt(alg, b"x", "").unwrap_err(),
                FileCryptError::InvalidInput(_)
            ));
        }
    }

    #[test]
    fn test_rsa_without_keys() {
        let dir = TempDir::new().unwrap();
        let suite = CipherSuite::new(KeyStore::new(dir.path()), EnvelopePadding::Pkcs7);
        assert!(matches!(
            suite.encrypt(Algorithm::Rsa, b"x", "").unwrap_err(),
            FileCryptError::NotFound(_)
        ));
    }

    #[test]
    fn test_wrong_key_on_token_is_authentication_failure() {
        let dir = TempDir::new().unwrap();
        let suite = suite(&dir);
        let token = suite.encrypt(Algorithm::AesLarge, b"secret", "right").unwrap();
        assert!(matches!(
            suite.apply(Direction::Decrypt, Algorithm::AesLarge, &token, "wrong").unwrap_err(),
            FileCryptError::AuthenticationFailure
        ));
    }
}
