//! Hybrid RSA envelope
//!
//! A fresh 32-byte AES key and 16-byte IV encrypt the payload with
//! AES-256-CBC; the AES key is then wrapped with RSA-OAEP (SHA-256 for both
//! the label hash and MGF1). Layout:
//!
//! ```text
//! iv (16) ‖ wrapped key (modulus size, 256 for RSA-2048) ‖ ciphertext
//! ```
//!
//! Both halves use PKCS7 padding. Containers written by the old zero-fill
//! encryptor can only be read through [`EnvelopePadding::LegacyZeroFill`],
//! which strips trailing NUL bytes and is therefore lossy for payloads that
//! end in zeros. Like the raw container, the envelope carries no MAC.

use crate::crypto::random_array;
use crate::error::{FileCryptError, Result};
use aes::Aes256;
use cbc::cipher::block_padding::{NoPadding, Pkcs7};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// RSA modulus size in bits
pub const RSA_KEY_BITS: usize = 2048;

/// Envelope IV length
pub const ENVELOPE_IV_LEN: usize = 16;

/// Per-file symmetric key length
pub const ENVELOPE_KEY_LEN: usize = 32;

const AES_BLOCK_LEN: usize = 16;

/// Padding discipline applied when opening an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopePadding {
    /// PKCS7, matching what [`EnvelopeEngine::seal`] writes
    #[default]
    Pkcs7,
    /// Read containers from the old NUL-filling encryptor
    LegacyZeroFill,
}

/// An RSA key pair
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh 2048-bit key pair with public exponent 65537
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut rand::rngs::OsRng, RSA_KEY_BITS)
            .map_err(|e| FileCryptError::key(format!("RSA key generation failed: {}", e)))?;
        Ok(Self::from_private(private))
    }

    /// Build a pair from an existing private key
    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        Self { private, public }
    }

    /// Private half
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Public half
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Private key as unencrypted PKCS#1 PEM (`BEGIN RSA PRIVATE KEY`)
    pub fn private_pem(&self) -> Result<String> {
        let pem = self
            .private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| FileCryptError::key(e.to_string()))?;
        Ok(pem.to_string())
    }

    /// Public key as SubjectPublicKeyInfo PEM (`BEGIN PUBLIC KEY`)
    pub fn public_pem(&self) -> Result<String> {
        public_key_pem(&self.public)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private", &"<redacted>")
            .field("bits", &(self.public.size() * 8))
            .finish()
    }
}

/// Encode a public key as SubjectPublicKeyInfo PEM
pub fn public_key_pem(key: &RsaPublicKey) -> Result<String> {
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| FileCryptError::key(e.to_string()))
}

/// Parse a private key from PKCS#1 or PKCS#8 PEM
pub fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| FileCryptError::key(format!("unreadable private key PEM: {}", e)))
}

/// Parse a public key from SubjectPublicKeyInfo PEM
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .map_err(|e| FileCryptError::key(format!("unreadable public key PEM: {}", e)))
}

/// Hybrid envelope engine
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeEngine {
    padding: EnvelopePadding,
}

impl EnvelopeEngine {
    /// Create an engine that opens containers with the given padding rule
    pub fn new(padding: EnvelopePadding) -> Self {
        Self { padding }
    }

    /// Padding rule used by [`open`](Self::open)
    pub fn padding(&self) -> EnvelopePadding {
        self.padding
    }

    /// Container size for a plaintext of `len` bytes under `key`
    pub fn container_len(len: usize, key: &RsaPublicKey) -> usize {
        ENVELOPE_IV_LEN + key.size() + (len / AES_BLOCK_LEN + 1) * AES_BLOCK_LEN
    }

    /// Encrypt for the holder of `public`
    pub fn seal(&self, plaintext: &[u8], public: &RsaPublicKey) -> Result<Vec<u8>> {
        let file_key: [u8; ENVELOPE_KEY_LEN] = random_array()?;
        let iv: [u8; ENVELOPE_IV_LEN] = random_array()?;

        let ciphertext = Aes256CbcEnc::new_from_slices(&file_key, &iv)
            .map_err(|e| FileCryptError::key(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let wrapped = public
            .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), &file_key)
            .map_err(|e| FileCryptError::key(format!("OAEP wrap failed: {}", e)))?;

        let mut container = Vec::with_capacity(ENVELOPE_IV_LEN + wrapped.len() + ciphertext.len());
        container.extend_from_slice(&iv);
        container.extend_from_slice(&wrapped);
        container.extend_from_slice(&ciphertext);
        Ok(container)
    }

    /// Decrypt a container with `private`
    pub fn open(&self, container: &[u8], private: &RsaPrivateKey) -> Result<Vec<u8>> {
        let wrapped_len = private.size();
        if container.len() < ENVELOPE_IV_LEN + wrapped_len {
            return Err(FileCryptError::malformed(format!(
                "envelope of {} bytes is shorter than its {}-byte header",
                container.len(),
                ENVELOPE_IV_LEN + wrapped_len
            )));
        }

        let (iv, rest) = container.split_at(ENVELOPE_IV_LEN);
        let (wrapped, ciphertext) = rest.split_at(wrapped_len);

        if ciphertext.len() % AES_BLOCK_LEN != 0 {
            return Err(FileCryptError::padding(format!(
                "ciphertext length {} is not a multiple of {}",
                ciphertext.len(),
                AES_BLOCK_LEN
            )));
        }

        let mut file_key = private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| FileCryptError::key(format!("OAEP unwrap failed: {}", e)))?;
        if file_key.len() != ENVELOPE_KEY_LEN {
            return Err(FileCryptError::key(format!(
                "unwrapped key is {} bytes, expected {}",
                file_key.len(),
                ENVELOPE_KEY_LEN
            )));
        }

        let decryptor = Aes256CbcDec::new_from_slices(&file_key, iv)
            .map_err(|e| FileCryptError::key(e.to_string()));
        file_key.iter_mut().for_each(|b| *b = 0);
        let decryptor = decryptor?;

        match self.padding {
            EnvelopePadding::Pkcs7 => {
                if ciphertext.is_empty() {
                    return Err(FileCryptError::padding("empty ciphertext"));
                }
                decryptor
                    .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                    .map_err(|_| FileCryptError::padding("invalid PKCS7 padding in envelope payload"))
            }
            EnvelopePadding::LegacyZeroFill => {
                let mut plain = decryptor
                    .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                    .map_err(|_| FileCryptError::padding("envelope payload is not block aligned"))?;
                let end = plain.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                plain.truncate(end);
                Ok(plain)
            }
        }
    }
}
