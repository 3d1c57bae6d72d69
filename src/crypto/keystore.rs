//! On-disk key store
//!
//! Holds the service key pair as PEM files in a single directory. The
//! private key is stored unencrypted; see [`crate::crypto::wrap_private_key`]
//! for the separate, explicitly invoked wrapping operation.

use crate::crypto::{parse_private_key_pem, parse_public_key_pem, KeyPair};
use crate::error::{FileCryptError, IoResultExt, Result};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the unencrypted private key
pub const PRIVATE_KEY_FILE: &str = "private_key.pem";

/// File name of the public key
pub const PUBLIC_KEY_FILE: &str = "public_key.pem";

/// File name of a password-wrapped private key
pub const WRAPPED_KEY_FILE: &str = "private_key.wrapped";

/// Directory-backed key store
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Open a key store rooted at `dir` (created lazily on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Key store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the private key PEM
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    /// Path of the public key PEM
    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    /// Path of the wrapped private key
    pub fn wrapped_key_path(&self) -> PathBuf {
        self.dir.join(WRAPPED_KEY_FILE)
    }

    /// Whether both halves of the key pair are present
    pub fn has_key_pair(&self) -> bool {
        self.private_key_path().is_file() && self.public_key_path().is_file()
    }

    /// Generate and persist a new key pair
    ///
    /// Refuses to replace an existing pair unless `force` is set.
    pub fn generate(&self, force: bool) -> Result<KeyPair> {
        if !force && self.has_key_pair() {
            return Err(FileCryptError::config(format!(
                "key pair already exists in {:?} (use --force to replace it)",
                self.dir
            )));
        }

        let pair = KeyPair::generate()?;
        self.save(&pair)?;
        tracing::info!("Generated RSA key pair in {:?}", self.dir);
        Ok(pair)
    }

    /// Generate a key pair only if none exists yet
    pub fn ensure_key_pair(&self) -> Result<bool> {
        if self.has_key_pair() {
            return Ok(false);
        }
        self.generate(true)?;
        Ok(true)
    }

    /// Persist both halves of a key pair
    pub fn save(&self, pair: &KeyPair) -> Result<()> {
        fs::create_dir_all(&self.dir).with_path(&self.dir)?;
        write_secret(&self.private_key_path(), pair.private_pem()?.as_bytes())?;

        let public_path = self.public_key_path();
        fs::write(&public_path, pair.public_pem()?).with_path(&public_path)?;
        Ok(())
    }

    /// Load the public key
    pub fn load_public(&self) -> Result<RsaPublicKey> {
        let path = self.public_key_path();
        let pem = fs::read_to_string(&path).with_path(&path)?;
        parse_public_key_pem(&pem).map_err(|e| e.with_context(format!("{}", path.display())))
    }

    /// Load the private key
    pub fn load_private(&self) -> Result<RsaPrivateKey> {
        let path = self.private_key_path();
        let pem = fs::read_to_string(&path).with_path(&path)?;
        parse_private_key_pem(&pem).map_err(|e| e.with_context(format!("{}", path.display())))
    }
}

/// Write a file readable only by the owner where the platform supports it
pub(crate) fn write_secret(path: &Path, contents: &[u8]) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).with_path(path)?;
    file.write_all(contents).with_path(path)?;
    file.sync_all().with_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::envelope::tests::shared_pair;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path().join("Keys"));
        assert!(!store.has_key_pair());

        store.save(shared_pair()).unwrap();
        assert!(store.has_key_pair());

        assert_eq!(&store.load_public().unwrap(), shared_pair().public_key());
        assert_eq!(
            KeyPair::from_private(store.load_private().unwrap()).public_key(),
            shared_pair().public_key()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save(shared_pair()).unwrap();

        let mode = fs::metadata(store.private_key_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_missing_keys_are_not_found() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        assert!(matches!(store.load_public().unwrap_err(), FileCryptError::NotFound(_)));
        assert!(matches!(store.load_private().unwrap_err(), FileCryptError::NotFound(_)));
    }

    #[test]
    fn test_generate_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        store.save(shared_pair()).unwrap();

        assert!(matches!(store.generate(false).unwrap_err(), FileCryptError::ConfigError(_)));
        assert!(!store.ensure_key_pair().unwrap());
    }

    #[test]
    fn test_corrupt_pem_is_key_error() {
        let dir = TempDir::new().unwrap();
        let store = KeyStore::new(dir.path());
        fs::write(store.public_key_path(), "garbage").unwrap();

        let err = store.load_public().unwrap_err();
        assert!(matches!(err.root(), FileCryptError::KeyError(_)));
    }
}
