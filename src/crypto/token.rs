//! Authenticated token format
//!
//! Self-framing container compatible with Fernet tokens:
//!
//! ```text
//! 0x80 ‖ timestamp (u64 BE) ‖ iv (16) ‖ AES-128-CBC/PKCS7 ciphertext ‖ HMAC-SHA256 (32)
//! ```
//!
//! The whole frame is URL-safe base64 encoded. The 32 derived key bytes are
//! split into a 16-byte signing key followed by a 16-byte encryption key.
//! The tag is checked before any decryption is attempted.

use crate::crypto::{derive_digest_key, random_array, Algorithm, CipherKeyMaterial, PassphraseCipher};
use crate::error::{FileCryptError, Result};
use aes::Aes128;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// Version marker leading every token
pub const TOKEN_VERSION: u8 = 0x80;

const TIMESTAMP_LEN: usize = 8;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + IV_LEN;
const BLOCK_LEN: usize = 16;

/// Authenticated-token cipher
#[derive(Debug, Clone, Copy)]
pub struct TokenCipher {
    algorithm: Algorithm,
}

impl TokenCipher {
    /// Create a token cipher for one of the AES labels
    pub fn new(algorithm: Algorithm) -> Self {
        Self { algorithm }
    }

    /// Encrypt under an already-derived key
    pub fn seal(&self, plaintext: &[u8], key: &CipherKeyMaterial) -> Result<Vec<u8>> {
        let iv: [u8; IV_LEN] = random_array()?;
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        seal_with(plaintext, key, &iv, timestamp)
    }

    /// Verify and decrypt under an already-derived key
    pub fn open(&self, token: &[u8], key: &CipherKeyMaterial) -> Result<Vec<u8>> {
        let frame = decode_frame(token)?;
        let (signing_key, encryption_key) = split_key(key);

        let (signed, tag) = frame.split_at(frame.len() - TAG_LEN);
        let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
            .map_err(|e| FileCryptError::key(e.to_string()))?;
        mac.update(signed);
        mac.verify_slice(tag)
            .map_err(|_| FileCryptError::AuthenticationFailure)?;

        let iv = &signed[1 + TIMESTAMP_LEN..HEADER_LEN];
        let ciphertext = &signed[HEADER_LEN..];

        Aes128CbcDec::new_from_slices(encryption_key, iv)
            .map_err(|e| FileCryptError::key(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| FileCryptError::padding("invalid PKCS7 padding in token payload"))
    }
}

impl PassphraseCipher for TokenCipher {
    fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        let key = derive_digest_key(passphrase, self.algorithm);
        self.seal(plaintext, &key)
    }

    fn decrypt(&self, container: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        let key = derive_digest_key(passphrase, self.algorithm);
        self.open(container, &key)
    }
}

fn seal_with(
    plaintext: &[u8],
    key: &CipherKeyMaterial,
    iv: &[u8; IV_LEN],
    timestamp: u64,
) -> Result<Vec<u8>> {
    let (signing_key, encryption_key) = split_key(key);

    let ciphertext = Aes128CbcEnc::new_from_slices(encryption_key, iv)
        .map_err(|e| FileCryptError::key(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut frame = Vec::with_capacity(HEADER_LEN + ciphertext.len() + TAG_LEN);
    frame.push(TOKEN_VERSION);
    frame.extend_from_slice(&timestamp.to_be_bytes());
    frame.extend_from_slice(iv);
    frame.extend_from_slice(&ciphertext);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(signing_key)
        .map_err(|e| FileCryptError::key(e.to_string()))?;
    mac.update(&frame);
    frame.extend_from_slice(&mac.finalize().into_bytes());

    Ok(URL_SAFE.encode(frame).into_bytes())
}

fn split_key(key: &CipherKeyMaterial) -> (&[u8], &[u8]) {
    key.as_bytes().split_at(16)
}

/// Decode the base64 text and check framing, returning the raw frame
fn decode_frame(token: &[u8]) -> Result<Vec<u8>> {
    let text = token.trim_ascii();
    let frame = URL_SAFE
        .decode(text)
        .map_err(|e| FileCryptError::malformed(format!("token is not URL-safe base64: {}", e)))?;

    if frame.first() != Some(&TOKEN_VERSION) {
        return Err(FileCryptError::malformed("unknown token version"));
    }
    if frame.len() < HEADER_LEN + BLOCK_LEN + TAG_LEN {
        return Err(FileCryptError::malformed(format!(
            "token too short ({} bytes)",
            frame.len()
        )));
    }
    if (frame.len() - HEADER_LEN - TAG_LEN) % BLOCK_LEN != 0 {
        return Err(FileCryptError::malformed("token payload is not block aligned"));
    }

    Ok(frame)
}
