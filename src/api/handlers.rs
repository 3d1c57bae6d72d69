//! API Request Handlers
//!
//! Transport-independent handlers for every endpoint. The server parses
//! HTTP and hands the pieces in; handlers talk to the dispatcher.

use crate::api::models::*;
use crate::api::multipart::MultipartForm;
use crate::core::{AlgorithmDispatcher, DecryptionRequest, EncryptionRequest};
use crate::crypto::{generate_key, DEFAULT_GENERATED_KEY_LEN};
use crate::error::{FileCryptError, Result};
use crate::staging::ArtifactLease;
use std::collections::HashMap;
use std::time::Instant;

/// Default label echoed by `generate-key`
pub const DEFAULT_KEY_ALGORITHM: &str = "aes256";

/// Application state shared across connections
pub struct AppState {
    /// Request dispatcher
    pub dispatcher: AlgorithmDispatcher,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(dispatcher: AlgorithmDispatcher) -> Self {
        Self {
            dispatcher,
            start_time: Instant::now(),
        }
    }
}

/// Fields common to encrypt and decrypt uploads
struct Upload {
    algorithm: String,
    key: String,
    filename: String,
    payload: Vec<u8>,
}

impl Upload {
    fn from_form(form: &MultipartForm) -> Result<Self> {
        let (filename, payload) = form.file("file")?;
        Ok(Self {
            algorithm: form.text("algorithm")?.trim().to_string(),
            key: form.text("key")?,
            filename,
            payload,
        })
    }
}

/// Handler for POST /encrypt
pub fn handle_encrypt(state: &AppState, form: &MultipartForm) -> Result<EncryptionResponse> {
    let upload = Upload::from_form(form)?;
    let label = upload.algorithm.clone();
    let artifact = state.dispatcher.encrypt(EncryptionRequest {
        algorithm: upload.algorithm,
        key: upload.key,
        filename: upload.filename,
        payload: upload.payload,
    })?;

    Ok(EncryptionResponse {
        encrypted_file: artifact.download_path(),
        original_file: artifact.original_file,
        algorithm: label,
        message: "File encrypted successfully".to_string(),
    })
}

/// Handler for POST /decrypt
pub fn handle_decrypt(state: &AppState, form: &MultipartForm) -> Result<DecryptionResponse> {
    let upload = Upload::from_form(form)?;
    let label = upload.algorithm.clone();
    let artifact = state.dispatcher.decrypt(DecryptionRequest {
        algorithm: upload.algorithm,
        key: upload.key,
        filename: upload.filename,
        payload: upload.payload,
    })?;

    Ok(DecryptionResponse {
        decrypted_file: artifact.download_path(),
        original_file: artifact.original_file,
        algorithm: label,
        message: "File decrypted successfully".to_string(),
    })
}

/// Handler for GET /download/{token}/{name}
pub fn handle_download(state: &AppState, token: &str, name: &str) -> Result<ArtifactLease> {
    state.dispatcher.open_artifact(token, name)
}

/// Handler for GET /generate-key
pub fn handle_generate_key(params: &HashMap<String, String>) -> Result<GenerateKeyResponse> {
    let length = match params.get("length") {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| FileCryptError::invalid(format!("invalid key length '{}'", raw)))?,
        None => DEFAULT_GENERATED_KEY_LEN,
    };
    let algorithm = params
        .get("algorithm")
        .cloned()
        .unwrap_or_else(|| DEFAULT_KEY_ALGORITHM.to_string());

    Ok(GenerateKeyResponse {
        key: generate_key(length)?,
        algorithm,
    })
}

/// Handler for GET /health
pub fn handle_health(state: &AppState) -> HealthResponse {
    HealthResponse {
        status: "healthy".to_string(),
        message: "Encryption service is running".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions: state.dispatcher.registry().len(),
    }
}

/// Handler for GET /
pub fn handle_root() -> ServiceInfo {
    ServiceInfo {
        message: "Welcome to the Encryption Service API!".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: ["/encrypt", "/decrypt", "/download/{token}/{filename}", "/generate-key", "/health"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{CipherPool, CipherSuite, DispatchLimits};
    use crate::crypto::{test_key_pair, EnvelopePadding, KeyStore};
    use crate::staging::SessionRegistry;
    use base64::engine::general_purpose::URL_SAFE;
    use base64::Engine;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) fn app_state(dir: &TempDir) -> AppState {
        app_state_with(dir, DispatchLimits::default())
    }

    pub(crate) fn app_state_with(dir: &TempDir, limits: DispatchLimits) -> AppState {
        let keys = KeyStore::new(dir.path().join("Keys"));
        keys.save(test_key_pair()).unwrap();
        let suite = Arc::new(CipherSuite::new(keys, EnvelopePadding::Pkcs7));
        let registry =
            Arc::new(SessionRegistry::new(dir.path().join("staging"), Duration::from_secs(60)).unwrap());
        let pool = CipherPool::new(2, 8).unwrap();
        AppState::new(AlgorithmDispatcher::new(suite, registry, pool, limits))
    }

    pub(crate) fn form_body(algorithm: &str, key: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        for (name, value) in [("algorithm", algorithm), ("key", key)] {
            b.extend_from_slice(
                format!("--B\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n", name, value).as_bytes(),
            );
        }
        b.extend_from_slice(
            format!(
                "--B\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\r\n",
                filename
            )
            .as_bytes(),
        );
        b.extend_from_slice(data);
        b.extend_from_slice(b"\r\n--B--\r\n");
        b
    }

    pub(crate) const FORM_CT: &str = "multipart/form-data; boundary=B";

    fn form(algorithm: &str, key: &str, filename: &str, data: &[u8]) -> MultipartForm {
        MultipartForm::parse(FORM_CT, &form_body(algorithm, key, filename, data)).unwrap()
    }

    fn split_download(path: &str) -> (String, String) {
        let rest = path.strip_prefix("/download/").unwrap();
        let (token, name) = rest.split_once('/').unwrap();
        (token.to_string(), name.to_string())
    }

    #[test]
    fn test_encrypt_download_decrypt() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let enc = handle_encrypt(&state, &form("aes256", "test123", "report.pdf", b"%PDF")).unwrap();
        assert_eq!(enc.original_file, "report.pdf");
        assert_eq!(enc.algorithm, "aes256");
        assert_eq!(enc.message, "File encrypted successfully");

        let (token, name) = split_download(&enc.encrypted_file);
        assert_eq!(name, "report.pdf.enc");
        let container = handle_download(&state, &token, &name).unwrap().read_all().unwrap();

        let dec = handle_decrypt(&state, &form("aes256", "test123", &name, &container)).unwrap();
        assert_eq!(dec.message, "File decrypted successfully");
        let (token, name) = split_download(&dec.decrypted_file);
        assert_eq!(name, "report.pdf");
        assert_eq!(handle_download(&state, &token, &name).unwrap().read_all().unwrap(), b"%PDF");
    }

    #[test]
    fn test_errors() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);

        let err = handle_encrypt(&state, &form("des", "k", "a", b"x")).unwrap_err();
        assert_eq!(error_status(&err), 400);

        let err = handle_download(&state, "bogus-token", "a.enc").unwrap_err();
        assert_eq!(error_status(&err), 404);

        let enc = handle_encrypt(&state, &form("blowfish", "k", "a", b"x")).unwrap();
        let (token, _) = split_download(&enc.encrypted_file);
        assert_eq!(error_status(&handle_download(&state, &token, "other").unwrap_err()), 404);
    }

    #[test]
    fn test_generate_key() {
        let resp = handle_generate_key(&HashMap::new()).unwrap();
        assert_eq!(resp.algorithm, DEFAULT_KEY_ALGORITHM);
        assert_eq!(URL_SAFE.decode(&resp.key).unwrap().len(), 32);

        let mut params = HashMap::new();
        params.insert("length".to_string(), "16".to_string());
        params.insert("algorithm".to_string(), "blowfish".to_string());
        let a = handle_generate_key(&params).unwrap();
        let b = handle_generate_key(&params).unwrap();
        assert_eq!(a.algorithm, "blowfish");
        assert_eq!(URL_SAFE.decode(&a.key).unwrap().len(), 16);
        assert_ne!(a.key, b.key);

        params.insert("length".to_string(), "0".to_string());
        assert!(handle_generate_key(&params).is_err());
        params.insert("length".to_string(), "abc".to_string());
        assert!(handle_generate_key(&params).is_err());
    }

    #[test]
    fn test_health_and_root() {
        let dir = TempDir::new().unwrap();
        let state = app_state(&dir);
        let health = handle_health(&state);
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_sessions, 0);
        assert!(handle_root().endpoints.contains(&"/encrypt".to_string()));
    }
}
