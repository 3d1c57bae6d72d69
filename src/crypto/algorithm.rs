//! Supported algorithm identifiers

use crate::error::{FileCryptError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of algorithms the service understands
///
/// `AesSmall` and `AesLarge` select the same authenticated-token mechanism;
/// the labels are kept apart because callers and on-disk directories
/// distinguish them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Authenticated token, "small" label
    AesSmall,
    /// Authenticated token, "large" label
    AesLarge,
    /// Raw Blowfish-CBC container (unauthenticated)
    Blowfish,
    /// RSA-OAEP envelope around AES-256-CBC
    Rsa,
}

/// Container family produced by an algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    /// `version ‖ timestamp ‖ iv ‖ ciphertext ‖ hmac`, base64 encoded
    Token,
    /// `iv(8) ‖ ciphertext`
    RawCbc,
    /// `iv(16) ‖ wrapped_key ‖ ciphertext`
    Envelope,
}

impl Algorithm {
    /// Every supported algorithm
    pub const ALL: [Algorithm; 4] = [
        Algorithm::AesSmall,
        Algorithm::AesLarge,
        Algorithm::Blowfish,
        Algorithm::Rsa,
    ];

    /// Canonical identifier
    pub fn id(&self) -> &'static str {
        match self {
            Self::AesSmall => "aes-small",
            Self::AesLarge => "aes-large",
            Self::Blowfish => "blowfish",
            Self::Rsa => "rsa",
        }
    }

    /// Directory name used under the storage tree
    pub fn legacy_name(&self) -> &'static str {
        match self {
            Self::AesSmall => "aes128",
            Self::AesLarge => "aes256",
            Self::Blowfish => "blowfish",
            Self::Rsa => "rsa",
        }
    }

    /// Container family this algorithm writes
    pub fn format(&self) -> ContainerFormat {
        match self {
            Self::AesSmall | Self::AesLarge => ContainerFormat::Token,
            Self::Blowfish => ContainerFormat::RawCbc,
            Self::Rsa => ContainerFormat::Envelope,
        }
    }

    /// Whether the caller's key string is used as a passphrase
    pub fn uses_passphrase(&self) -> bool {
        !matches!(self, Self::Rsa)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Algorithm {
    type Err = FileCryptError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-small" | "aes128" => Ok(Self::AesSmall),
            "aes-large" | "aes256" => Ok(Self::AesLarge),
            "blowfish" => Ok(Self::Blowfish),
            "rsa" => Ok(Self::Rsa),
            _ => Err(FileCryptError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}
