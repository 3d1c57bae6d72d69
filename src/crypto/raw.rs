//! Raw Blowfish-CBC container
//!
//! Layout: `iv (8) ‖ Blowfish-CBC/PKCS7 ciphertext`. There is no integrity
//! tag. A wrong passphrase either fails the padding check or yields garbage;
//! callers needing tamper detection must use the token format. The layout is
//! kept as-is so existing containers stay readable.
//!
//! The cipher is keyed with the 44-character base64 form of the digest
//! derivation, not the raw 32 digest bytes.

use crate::crypto::{derive_digest_key, random_array, Algorithm, PassphraseCipher};
use crate::error::{FileCryptError, Result};
use blowfish::Blowfish;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type BlowfishCbcEnc = cbc::Encryptor<Blowfish>;
type BlowfishCbcDec = cbc::Decryptor<Blowfish>;

/// Blowfish block and IV size
pub const BLOWFISH_BLOCK_LEN: usize = 8;

/// Raw IV + ciphertext cipher
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBlowfishCipher;

impl RawBlowfishCipher {
    /// Create the cipher
    pub fn new() -> Self {
        Self
    }

    /// Container size for a plaintext of `len` bytes
    pub fn container_len(len: usize) -> usize {
        BLOWFISH_BLOCK_LEN + (len / BLOWFISH_BLOCK_LEN + 1) * BLOWFISH_BLOCK_LEN
    }
}

impl PassphraseCipher for RawBlowfishCipher {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Blowfish
    }

    fn encrypt(&self, plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        let key = derive_digest_key(passphrase, Algorithm::Blowfish).encoded();
        let iv: [u8; BLOWFISH_BLOCK_LEN] = random_array()?;

        let ciphertext = BlowfishCbcEnc::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| FileCryptError::key(e.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut container = Vec::with_capacity(BLOWFISH_BLOCK_LEN + ciphertext.len());
        container.extend_from_slice(&iv);
        container.extend_from_slice(&ciphertext);
        Ok(container)
    }

    fn decrypt(&self, container: &[u8], passphrase: &str) -> Result<Vec<u8>> {
        if container.len() < BLOWFISH_BLOCK_LEN {
            return Err(FileCryptError::malformed(format!(
                "container shorter than the {}-byte IV",
                BLOWFISH_BLOCK_LEN
            )));
        }

        let (iv, ciphertext) = container.split_at(BLOWFISH_BLOCK_LEN);
        if ciphertext.is_empty() || ciphertext.len() % BLOWFISH_BLOCK_LEN != 0 {
            return Err(FileCryptError::padding(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOWFISH_BLOCK_LEN
            )));
        }

        let key = derive_digest_key(passphrase, Algorithm::Blowfish).encoded();
        BlowfishCbcDec::new_from_slices(key.as_bytes(), iv)
            .map_err(|e| FileCryptError::key(e.to_string()))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| FileCryptError::padding("invalid PKCS7 padding (wrong key or corrupt data)"))
    }
}
