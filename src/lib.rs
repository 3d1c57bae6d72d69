//! # FileCrypt - File Encryption Service
//!
//! FileCrypt encrypts and decrypts whole files under four algorithms and
//! exposes them either as an HTTP upload service or as a batch tool over a
//! fixed storage tree.
//!
//! ## Algorithms
//!
//! - **aes-small / aes-large**: authenticated token (AES-128-CBC +
//!   HMAC-SHA256), key derived from a SHA-256 digest of the passphrase
//! - **blowfish**: raw `IV || Blowfish-CBC` container
//! - **rsa**: hybrid envelope, a random AES-256 key wrapped with RSA-OAEP
//!
//! ## Quick Start
//!
//! ```no_run
//! use filecrypt::core::CipherSuite;
//! use filecrypt::crypto::{Algorithm, EnvelopePadding, KeyStore};
//!
//! let suite = CipherSuite::new(KeyStore::new("Keys"), EnvelopePadding::Pkcs7);
//! let container = suite.encrypt(Algorithm::AesLarge, b"hello", "passphrase").unwrap();
//! let plain = suite.decrypt(Algorithm::AesLarge, &container, "passphrase").unwrap();
//! assert_eq!(plain, b"hello");
//! ```
//!
//! ## Batch Runs
//!
//! ```no_run
//! use filecrypt::config::StorageLayout;
//! use filecrypt::core::{BatchJob, BatchProcessor, CipherSuite, Direction};
//! use filecrypt::crypto::{Algorithm, EnvelopePadding, KeyStore};
//!
//! let layout = StorageLayout::new("/srv/filecrypt");
//! let suite = CipherSuite::new(KeyStore::new(layout.keys()), EnvelopePadding::Pkcs7);
//! let job = BatchJob {
//!     direction: Direction::Encrypt,
//!     algorithm: Algorithm::Blowfish,
//!     input_dir: layout.originals(Algorithm::Blowfish),
//!     output_dir: layout.encrypted(Algorithm::Blowfish),
//!     key: "secret".to_string(),
//! };
//!
//! let report = BatchProcessor::new(&suite, 0).run(&job).unwrap();
//! report.print_summary(&job);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod core;
pub mod crypto;
pub mod error;
pub mod progress;
pub mod staging;

// Re-export commonly used types
pub use config::{ServiceConfig, StorageLayout};
pub use core::{AlgorithmDispatcher, CipherSuite, Direction};
pub use crypto::Algorithm;
pub use error::{FileCryptError, Result};
pub use progress::ProgressReporter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use filecrypt::prelude::*;
    //! ```

    pub use crate::api::{ApiServer, AppState};
    pub use crate::config::{ServiceConfig, StorageLayout};
    pub use crate::core::{
        AlgorithmDispatcher, BatchJob, BatchProcessor, CipherPool, CipherSuite, DecryptionRequest,
        Direction, DispatchLimits, EncryptionRequest,
    };
    pub use crate::crypto::{Algorithm, EnvelopePadding, KeyStore, PassphraseCipher};
    pub use crate::error::{FileCryptError, Result};
    pub use crate::progress::ProgressReporter;
    pub use crate::staging::{SessionRegistry, SessionReaper, SessionToken};
}
