//! Password protection for the stored private key
//!
//! Layout of a wrapped key: `salt (16) ‖ iv (16) ‖ AES-256-CBC/PKCS7(PKCS#8 PEM)`,
//! keyed by PBKDF2-HMAC-SHA256 with [`MIN_PBKDF2_ITERATIONS`] rounds.
//! Wrapping is only ever run on explicit request; the envelope engine
//! reads the plain PEM from the key store.

use crate::crypto::keystore::write_secret;
use crate::crypto::{derive_salted_key, parse_private_key_pem, random_array, Algorithm, KeyStore, MIN_PBKDF2_ITERATIONS};
use crate::error::{FileCryptError, IoResultExt, Result};
use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use std::fs;
use std::path::PathBuf;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;

/// A password-wrapped private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// PBKDF2 salt
    pub salt: [u8; SALT_LEN],
    /// CBC IV
    pub iv: [u8; IV_LEN],
    /// Encrypted PKCS#8 PEM
    pub ciphertext: Vec<u8>,
}

impl WrappedKey {
    /// Serialize to the on-disk layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SALT_LEN + IV_LEN + self.ciphertext.len());
        bytes.extend_from_slice(&self.salt);
        bytes.extend_from_slice(&self.iv);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse the on-disk layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SALT_LEN + IV_LEN + 16 {
            return Err(FileCryptError::malformed("wrapped key is too short"));
        }
        let mut salt = [0u8; SALT_LEN];
        let mut iv = [0u8; IV_LEN];
        salt.copy_from_slice(&bytes[..SALT_LEN]);
        iv.copy_from_slice(&bytes[SALT_LEN..SALT_LEN + IV_LEN]);

        Ok(Self {
            salt,
            iv,
            ciphertext: bytes[SALT_LEN + IV_LEN..].to_vec(),
        })
    }
}

/// Encrypt a private key under a password
pub fn wrap_private_key(private: &RsaPrivateKey, password: &str) -> Result<WrappedKey> {
    if password.is_empty() {
        return Err(FileCryptError::invalid("wrapping password must not be empty"));
    }

    let salt: [u8; SALT_LEN] = random_array()?;
    let iv: [u8; IV_LEN] = random_array()?;
    let key = derive_salted_key(password, &salt, MIN_PBKDF2_ITERATIONS, Algorithm::Rsa)?;

    let pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| FileCryptError::key(e.to_string()))?;

    let ciphertext = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| FileCryptError::key(e.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(pem.as_bytes());

    Ok(WrappedKey { salt, iv, ciphertext })
}

/// Recover a private key from its wrapped form
pub fn unwrap_private_key(wrapped: &WrappedKey, password: &str) -> Result<RsaPrivateKey> {
    let key = derive_salted_key(password, &wrapped.salt, MIN_PBKDF2_ITERATIONS, Algorithm::Rsa)?;

    let pem = Aes256CbcDec::new_from_slices(key.as_bytes(), &wrapped.iv)
        .map_err(|e| FileCryptError::key(e.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(&wrapped.ciphertext)
        .map_err(|_| FileCryptError::key("wrong password or corrupt wrapped key"))?;

    let pem = String::from_utf8(pem)
        .map_err(|_| FileCryptError::key("wrong password or corrupt wrapped key"))?;
    parse_private_key_pem(&pem)
        .map_err(|_| FileCryptError::key("wrong password or corrupt wrapped key"))
}

impl KeyStore {
    /// Wrap the stored private key into [`WRAPPED_KEY_FILE`](crate::crypto::WRAPPED_KEY_FILE)
    pub fn wrap_stored_key(&self, password: &str) -> Result<PathBuf> {
        let private = self.load_private()?;
        let wrapped = wrap_private_key(&private, password)?;

        let path = self.wrapped_key_path();
        write_secret(&path, &wrapped.to_bytes())?;
        tracing::info!("Wrote password-protected private key to {:?}", path);
        Ok(path)
    }

    /// Unwrap the stored wrapped key and write it back as the plain private key
    pub fn unwrap_stored_key(&self, password: &str) -> Result<PathBuf> {
        let wrapped_path = self.wrapped_key_path();
        let bytes = fs::read(&wrapped_path).with_path(&wrapped_path)?;
        let private = unwrap_private_key(&WrappedKey::from_bytes(&bytes)?, password)?;

        let pair = crate::crypto::KeyPair::from_private(private);
        self.save(&pair)?;
        Ok(self.private_key_path())
    }
}
