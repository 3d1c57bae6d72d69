//! Request dispatch
//!
//! Validates an upload, stages it in a fresh session, runs the selected
//! engine on the cipher pool and publishes the result for download.
//! Validation happens before any filesystem side effect.

use crate::core::{CipherPool, CipherSuite, Direction};
use crate::crypto::Algorithm;
use crate::error::{FileCryptError, Result};
use crate::staging::{
    decrypted_name, encrypted_name, sanitize_filename, ArtifactLease, SessionRegistry, SessionToken,
    StagingArea,
};
use std::sync::Arc;
use std::time::Duration;

/// An uploaded file to encrypt
#[derive(Debug, Clone)]
pub struct EncryptionRequest {
    /// Algorithm identifier as supplied by the caller
    pub algorithm: String,
    /// Passphrase (ignored for `rsa`)
    pub key: String,
    /// Client file name
    pub filename: String,
    /// File contents
    pub payload: Vec<u8>,
}

/// An uploaded container to decrypt
#[derive(Debug, Clone)]
pub struct DecryptionRequest {
    /// Algorithm identifier as supplied by the caller
    pub algorithm: String,
    /// Passphrase (ignored for `rsa`)
    pub key: String,
    /// Client file name
    pub filename: String,
    /// Container bytes
    pub payload: Vec<u8>,
}

/// A published result
#[derive(Debug, Clone)]
pub struct StagedArtifact {
    /// Sanitized name of the uploaded file
    pub original_file: String,
    /// Name of the produced artifact
    pub artifact_name: String,
    /// Session holding the artifact
    pub token: SessionToken,
    /// Algorithm that produced it
    pub algorithm: Algorithm,
    /// Artifact size in bytes
    pub size: u64,
}

impl StagedArtifact {
    /// Retrieval path handed back to the caller
    pub fn download_path(&self) -> String {
        format!(
            "/download/{}/{}",
            self.token,
            encode_path_segment(&self.artifact_name)
        )
    }
}

/// Limits applied to every request
#[derive(Debug, Clone, Copy)]
pub struct DispatchLimits {
    /// Largest accepted payload
    pub max_input_size: u64,
    /// Deadline for the cipher job
    pub cipher_timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self {
            max_input_size: 64 * 1024 * 1024,
            cipher_timeout: Duration::from_secs(60),
        }
    }
}

/// Routes requests to engines and staging sessions
#[derive(Debug)]
pub struct AlgorithmDispatcher {
    suite: Arc<CipherSuite>,
    registry: Arc<SessionRegistry>,
    pool: CipherPool,
    limits: DispatchLimits,
}

impl AlgorithmDispatcher {
    /// Create a dispatcher
    pub fn new(
        suite: Arc<CipherSuite>,
        registry: Arc<SessionRegistry>,
        pool: CipherPool,
        limits: DispatchLimits,
    ) -> Self {
        Self {
            suite,
            registry,
            pool,
            limits,
        }
    }

    /// Session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Cipher pool
    pub fn pool(&self) -> &CipherPool {
        &self.pool
    }

    /// Request limits
    pub fn limits(&self) -> DispatchLimits {
        self.limits
    }

    /// Encrypt an upload into a new session
    pub fn encrypt(&self, request: EncryptionRequest) -> Result<StagedArtifact> {
        self.dispatch(
            Direction::Encrypt,
            &request.algorithm,
            request.key,
            &request.filename,
            request.payload,
        )
    }

    /// Decrypt an upload into a new session
    pub fn decrypt(&self, request: DecryptionRequest) -> Result<StagedArtifact> {
        self.dispatch(
            Direction::Decrypt,
            &request.algorithm,
            request.key,
            &request.filename,
            request.payload,
        )
    }

    /// Open a published artifact for download
    pub fn open_artifact(&self, token: &str, name: &str) -> Result<ArtifactLease> {
        self.registry.open_artifact(token, name)
    }

    fn dispatch(
        &self,
        direction: Direction,
        algorithm: &str,
        key: String,
        filename: &str,
        payload: Vec<u8>,
    ) -> Result<StagedArtifact> {
        let algorithm: Algorithm = algorithm.parse()?;
        self.check_size(payload.len() as u64)?;
        let original_file = sanitize_filename(filename)?;
        let (area, artifact_name) = match direction {
            Direction::Encrypt => (StagingArea::Encrypted, encrypted_name(&original_file)?),
            Direction::Decrypt => (StagingArea::Decrypted, decrypted_name(algorithm, &original_file)?),
        };

        let guard = self.registry.create_session()?;
        let session = guard.session();
        session.stage_input(&original_file, &payload)?;

        let suite = Arc::clone(&self.suite);
        let output = self.pool.run(self.limits.cipher_timeout, move || {
            suite.apply(direction, algorithm, &payload, &key)
        })?;

        session.write_output(area, &artifact_name, &output)?;
        session.resolve_output(area, &artifact_name)?;

        let token = guard.keep();
        tracing::info!(
            "{} {} with {} ({} bytes)",
            capitalize(direction.verb()),
            original_file,
            algorithm,
            output.len()
        );

        Ok(StagedArtifact {
            original_file,
            artifact_name,
            token,
            algorithm,
            size: output.len() as u64,
        })
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.limits.max_input_size {
            return Err(FileCryptError::InputTooLarge {
                size,
                limit: self.limits.max_input_size,
            });
        }
        Ok(())
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{test_key_pair, EnvelopePadding, KeyStore};
    use std::fs;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir, limits: DispatchLimits) -> AlgorithmDispatcher {
        let keys = KeyStore::new(dir.path().join("Keys"));
        keys.save(test_key_pair()).unwrap();
        let suite = Arc::new(CipherSuite::new(keys, EnvelopePadding::Pkcs7));
        let registry =
            Arc::new(SessionRegistry::new(dir.path().join("staging"), Duration::from_secs(60)).unwrap());
        AlgorithmDispatcher::new(suite, registry, CipherPool::new(2, 8).unwrap(), limits)
    }

    fn staged_dirs(dir: &TempDir) -> usize {
        fs::read_dir(dir.path().join("staging")).unwrap().count()
    }

    fn encrypt_req(algorithm: &str, filename: &str, payload: &[u8]) -> EncryptionRequest {
        EncryptionRequest {
            algorithm: algorithm.to_string(),
            key: "test123".to_string(),
            filename: filename.to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_unsupported_algorithm_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(&dir, DispatchLimits::default());

        let err = d.encrypt(encrypt_req("des", "a.txt", b"x")).unwrap_err();
        assert!(matches!(err, FileCryptError::UnsupportedAlgorithm(_)));
        assert_eq!(staged_dirs(&dir), 0);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_encrypt_then_decrypt_through_sessions() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(&dir, DispatchLimits::default());

        for alg in ["aes-small", "aes256", "blowfish", "rsa"] {
            let enc = d.encrypt(encrypt_req(alg, "notes.txt", b"hello world")).unwrap();
            assert_eq!(enc.original_file, "notes.txt");
            assert_eq!(enc.artifact_name, "notes.txt.enc");
            assert!(enc.download_path().starts_with("/download/"));

            let container = d.open_artifact(enc.token.as_str(), &enc.artifact_name).unwrap().read_all().unwrap();

            let dec = d
                .decrypt(DecryptionRequest {
                    algorithm: alg.to_string(),
                    key: "test123".to_string(),
                    filename: enc.artifact_name.clone(),
                    payload: container,
                })
                .unwrap();
            assert_eq!(dec.artifact_name, "notes.txt");
            let plain = d.open_artifact(dec.token.as_str(), "notes.txt").unwrap().read_all().unwrap();
            assert_eq!(plain, b"hello world");
        }
        assert_eq!(d.registry().len(), 8);
    }

    #[test]
    fn test_failed_decrypt_disposes_session() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(&dir, DispatchLimits::default());

        let enc = d.encrypt(encrypt_req("aes-large", "a.bin", &[1u8; 64])).unwrap();
        let container = d.open_artifact(enc.token.as_str(), "a.bin.enc").unwrap().read_all().unwrap();
        let before = staged_dirs(&dir);

        let err = d
            .decrypt(DecryptionRequest {
                algorithm: "aes-large".to_string(),
                key: "wrong".to_string(),
                filename: "a.bin.enc".to_string(),
                payload: container,
            })
            .unwrap_err();
        assert!(matches!(err, FileCryptError::AuthenticationFailure));
        assert_eq!(staged_dirs(&dir), before);
        assert_eq!(d.registry().len(), 1);
    }

    #[test]
    fn test_cipher_timeout_disposes_session() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(
            &dir,
            DispatchLimits {
                cipher_timeout: Duration::from_nanos(1),
                ..Default::default()
            },
        );

        let err = d.encrypt(encrypt_req("aes-large", "big.bin", &vec![3u8; 1024 * 1024])).unwrap_err();
        assert!(matches!(err, FileCryptError::Timeout(_)));
        assert_eq!(staged_dirs(&dir), 0);
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_oversized_input_rejected_before_staging() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(
            &dir,
            DispatchLimits {
                max_input_size: 16,
                ..Default::default()
            },
        );

        let err = d.encrypt(encrypt_req("blowfish", "big", &[0u8; 17])).unwrap_err();
        assert!(matches!(err, FileCryptError::InputTooLarge { size: 17, limit: 16 }));
        assert_eq!(staged_dirs(&dir), 0);
    }

    #[test]
    fn test_bad_filename_rejected_before_staging() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(&dir, DispatchLimits::default());
        assert!(d.encrypt(encrypt_req("blowfish", "../", b"x")).is_err());
        assert_eq!(staged_dirs(&dir), 0);
    }

    #[test]
    fn test_client_path_is_stripped() {
        let dir = TempDir::new().unwrap();
        let d = dispatcher(&dir, DispatchLimits::default());
        let enc = d.encrypt(encrypt_req("aes128", "../../etc/passwd", b"x")).unwrap();
        assert_eq!(enc.original_file, "passwd");
        assert_eq!(enc.algorithm, Algorithm::AesSmall);
    }

    #[test]
    fn test_download_path_encoding() {
        let artifact = StagedArtifact {
            original_file: "my file.txt".to_string(),
            artifact_name: "my file.txt.enc".to_string(),
            token: SessionToken::generate().unwrap(),
            algorithm: Algorithm::Blowfish,
            size: 0,
        };
        assert!(artifact.download_path().ends_with("/my%20file.txt.enc"));
        assert_eq!(encode_path_segment("a-b_c.d~"), "a-b_c.d~");
        assert_eq!(encode_path_segment("ü"), "%C3%BC");
    }
}
