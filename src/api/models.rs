//! API Data Models
//!
//! JSON bodies returned by the HTTP endpoints. Field names follow the
//! wire format existing clients already parse.

use crate::error::FileCryptError;
use serde::{Deserialize, Serialize};

/// Response of `POST /encrypt`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptionResponse {
    /// Sanitized name of the uploaded file
    pub original_file: String,
    /// Retrieval path of the container
    pub encrypted_file: String,
    /// Algorithm label as supplied by the caller
    pub algorithm: String,
    /// Human-readable outcome
    pub message: String,
}

/// Response of `POST /decrypt`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecryptionResponse {
    /// Sanitized name of the uploaded container
    pub original_file: String,
    /// Retrieval path of the plaintext
    pub decrypted_file: String,
    /// Algorithm label as supplied by the caller
    pub algorithm: String,
    /// Human-readable outcome
    pub message: String,
}

/// Response of `GET /generate-key`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerateKeyResponse {
    /// URL-safe base64 of the random bytes
    pub key: String,
    /// Echoed algorithm label
    pub algorithm: String,
}

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `healthy` while the server answers
    pub status: String,
    /// Human-readable status line
    pub message: String,
    /// Server uptime
    pub uptime_seconds: u64,
    /// Live staging sessions
    pub active_sessions: usize,
}

/// Response of `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Greeting
    pub message: String,
    /// Server version
    pub version: String,
    /// Available routes
    pub endpoints: Vec<String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code
    pub code: String,
    /// Error message
    pub message: String,
    /// Additional details
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Build an error body for an HTTP status
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: status_code_name(status).to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// HTTP status for a failed operation
pub fn error_status(err: &FileCryptError) -> u16 {
    match err.root() {
        FileCryptError::UnsupportedAlgorithm(_) | FileCryptError::InvalidInput(_) => 400,
        e if e.is_decryption_failure() => 400,
        FileCryptError::NotFound(_) => 404,
        FileCryptError::InputTooLarge { .. } => 413,
        FileCryptError::Busy => 503,
        FileCryptError::Timeout(_) => 504,
        _ => 500,
    }
}

/// Machine-readable code for an HTTP status
pub fn status_code_name(status: u16) -> &'static str {
    match status {
        400 => "BAD_REQUEST",
        404 => "NOT_FOUND",
        405 => "METHOD_NOT_ALLOWED",
        408 => "REQUEST_TIMEOUT",
        411 => "LENGTH_REQUIRED",
        413 => "PAYLOAD_TOO_LARGE",
        415 => "UNSUPPORTED_MEDIA_TYPE",
        503 => "SERVICE_UNAVAILABLE",
        504 => "GATEWAY_TIMEOUT",
        _ => "INTERNAL_ERROR",
    }
}
