//! Configuration settings for FileCrypt
//!
//! Defines the CLI surface, the on-disk storage layout and the runtime
//! settings of the HTTP service. Every path is resolved once here and
//! handed to constructors explicitly.

use crate::core::DispatchLimits;
use crate::crypto::Algorithm;
use crate::error::{FileCryptError, Result};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the storage root
pub const BASE_PATH_ENV: &str = "ENCRYPTION_BASE_PATH";

/// FileCrypt - file encryption service and batch tool
#[derive(Parser, Debug, Clone)]
#[command(name = "filecrypt")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Encrypt and decrypt files with token, Blowfish and RSA envelope containers")]
#[command(long_about = r#"
FileCrypt encrypts and decrypts files under four algorithms:

  aes-small, aes-large   authenticated token (AES-128-CBC + HMAC-SHA256)
  blowfish               raw IV + Blowfish-CBC container
  rsa                    RSA-OAEP wrapped AES-256-CBC envelope

It runs either as an HTTP service or as a batch tool over the storage tree
rooted at --base-path (Original_files/, Encrypted_files/, Decrypted_files/, Keys/).

Examples:
  filecrypt serve --port 8000 --init-keys
  filecrypt encrypt --algorithm blowfish --key secret
  filecrypt decrypt --algorithm rsa
  filecrypt keygen --force
"#)]
pub struct CliArgs {
    /// Root of the storage tree (defaults to the executable's directory)
    #[arg(long, global = true, env = BASE_PATH_ENV, value_name = "PATH")]
    pub base_path: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the HTTP encryption service
    #[command(name = "serve")]
    Serve(ServeArgs),

    /// Encrypt every file of an algorithm's originals directory
    #[command(name = "encrypt")]
    Encrypt {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Decrypt every `.enc` file of an algorithm's encrypted directory
    #[command(name = "decrypt")]
    Decrypt {
        #[command(flatten)]
        batch: BatchArgs,

        /// Read envelopes written with trailing NUL padding
        #[arg(long)]
        legacy_zero_padding: bool,
    },

    /// Generate the RSA key pair in the key store
    #[command(name = "keygen")]
    Keygen {
        /// Replace an existing key pair
        #[arg(short, long)]
        force: bool,
    },

    /// Write a password-protected copy of the private key
    #[command(name = "wrap-key")]
    WrapKey {
        /// Wrapping password
        #[arg(long, env = "FILECRYPT_KEY_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Restore the private key from its password-protected copy
    #[command(name = "unwrap-key")]
    UnwrapKey {
        /// Wrapping password
        #[arg(long, env = "FILECRYPT_KEY_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Print a random URL-safe base64 key
    #[command(name = "generate-key")]
    GenerateKey {
        /// Number of random bytes
        #[arg(short, long, default_value = "32")]
        length: usize,

        /// Algorithm label echoed in the output
        #[arg(short, long, default_value = "aes-large")]
        algorithm: String,
    },
}

/// Arguments shared by the batch commands
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Algorithm identifier (aes-small, aes-large, blowfish, rsa)
    #[arg(short, long, value_name = "ALGO")]
    pub algorithm: String,

    /// Passphrase for the symmetric algorithms
    #[arg(short, long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Input directory (defaults to the storage layout)
    #[arg(short, long, value_name = "DIR")]
    pub input: Option<PathBuf>,

    /// Output directory (defaults to the storage layout)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0", value_name = "NUM")]
    pub threads: usize,
}

/// Arguments of the `serve` command
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Listen port
    #[arg(short, long, default_value = "8000")]
    pub port: u16,

    /// Directory holding staging sessions
    #[arg(long, value_name = "DIR")]
    pub staging_dir: Option<PathBuf>,

    /// How long finished sessions stay downloadable (e.g. 30m, 1h)
    #[arg(long, default_value = "1h", value_name = "DURATION")]
    pub session_ttl: String,

    /// Interval between reaper sweeps
    #[arg(long, default_value = "5m", value_name = "DURATION")]
    pub reap_interval: String,

    /// Maximum upload size (e.g. 64M)
    #[arg(long, default_value = "64M", value_name = "SIZE")]
    pub max_input: String,

    /// Deadline for reading a whole request; also the per-write timeout
    #[arg(long, default_value = "30s", value_name = "DURATION")]
    pub io_timeout: String,

    /// Deadline for a single cipher job
    #[arg(long, default_value = "60s", value_name = "DURATION")]
    pub cipher_timeout: String,

    /// Cipher worker threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0", value_name = "NUM")]
    pub workers: usize,

    /// Pending cipher jobs before requests are rejected
    #[arg(long, default_value = "64", value_name = "NUM")]
    pub queue_depth: usize,

    /// Concurrent connections before new ones are refused
    #[arg(long, default_value = "128", value_name = "NUM")]
    pub max_connections: usize,

    /// Disable CORS headers
    #[arg(long)]
    pub no_cors: bool,

    /// Read envelopes written with trailing NUL padding
    #[arg(long)]
    pub legacy_zero_padding: bool,

    /// Generate the RSA key pair at startup if missing
    #[arg(long)]
    pub init_keys: bool,
}

/// Fixed directory tree under the storage root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at an explicit directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve the root from an optional override, falling back to the
    /// directory containing the running executable
    pub fn resolve(base_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = base_path {
            return Ok(Self::new(path));
        }

        let exe = std::env::current_exe()
            .map_err(|e| FileCryptError::config(format!("cannot locate executable: {}", e)))?;
        let dir = exe
            .parent()
            .ok_or_else(|| FileCryptError::config("executable has no parent directory"))?;
        Ok(Self::new(dir))
    }

    /// Storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Plaintext inputs for batch encryption
    pub fn originals(&self, algorithm: Algorithm) -> PathBuf {
        self.root.join("Original_files").join(algorithm.legacy_name())
    }

    /// Batch encryption output
    pub fn encrypted(&self, algorithm: Algorithm) -> PathBuf {
        self.root.join("Encrypted_files").join(algorithm.legacy_name())
    }

    /// Batch decryption output
    pub fn decrypted(&self, algorithm: Algorithm) -> PathBuf {
        self.root.join("Decrypted_files").join(algorithm.legacy_name())
    }

    /// Key store directory
    pub fn keys(&self) -> PathBuf {
        self.root.join("Keys")
    }
}

/// Runtime configuration of the HTTP service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Listen address
    pub bind: String,
    /// Listen port
    pub port: u16,
    /// Staging root
    pub staging_dir: PathBuf,
    /// Session retention after success
    pub session_ttl: Duration,
    /// Reaper sweep interval
    pub reap_interval: Duration,
    /// Maximum upload size in bytes
    pub max_input_size: u64,
    /// Request read deadline and per-write socket timeout
    pub io_timeout: Duration,
    /// Cipher job deadline
    pub cipher_timeout: Duration,
    /// Worker thread count (0 = auto-detect)
    pub workers: usize,
    /// Cipher queue depth
    pub queue_depth: usize,
    /// Connection limit
    pub max_connections: usize,
    /// Emit CORS headers
    pub cors: bool,
    /// Accept NUL-padded envelopes
    pub legacy_zero_padding: bool,
    /// Generate missing keys at startup
    pub init_keys: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            staging_dir: default_staging_dir(),
            session_ttl: Duration::from_secs(60 * 60),
            reap_interval: Duration::from_secs(5 * 60),
            max_input_size: 64 * 1024 * 1024,
            io_timeout: Duration::from_secs(30),
            cipher_timeout: Duration::from_secs(60),
            workers: 0,
            queue_depth: 64,
            max_connections: 128,
            cors: true,
            legacy_zero_padding: false,
            init_keys: false,
        }
    }
}

impl ServiceConfig {
    /// Build from `serve` arguments
    pub fn from_args(args: &ServeArgs) -> Result<Self> {
        let config = Self {
            bind: args.bind.clone(),
            port: args.port,
            staging_dir: args.staging_dir.clone().unwrap_or_else(default_staging_dir),
            session_ttl: parse_duration(&args.session_ttl)
                .map_err(|e| FileCryptError::config(format!("Invalid session TTL: {}", e)))?,
            reap_interval: parse_duration(&args.reap_interval)
                .map_err(|e| FileCryptError::config(format!("Invalid reap interval: {}", e)))?,
            max_input_size: parse_size(&args.max_input)
                .map_err(|e| FileCryptError::config(format!("Invalid max input: {}", e)))?,
            io_timeout: parse_duration(&args.io_timeout)
                .map_err(|e| FileCryptError::config(format!("Invalid I/O timeout: {}", e)))?,
            cipher_timeout: parse_duration(&args.cipher_timeout)
                .map_err(|e| FileCryptError::config(format!("Invalid cipher timeout: {}", e)))?,
            workers: args.workers,
            queue_depth: args.queue_depth,
            max_connections: args.max_connections,
            cors: !args.no_cors,
            legacy_zero_padding: args.legacy_zero_padding,
            init_keys: args.init_keys,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_input_size == 0 {
            return Err(FileCryptError::config("max input size must be positive"));
        }
        if self.queue_depth == 0 {
            return Err(FileCryptError::config("queue depth must be positive"));
        }
        if self.max_connections == 0 {
            return Err(FileCryptError::config("max connections must be positive"));
        }
        for (name, value) in [
            ("session TTL", self.session_ttl),
            ("reap interval", self.reap_interval),
            ("I/O timeout", self.io_timeout),
            ("cipher timeout", self.cipher_timeout),
        ] {
            if value.is_zero() {
                return Err(FileCryptError::config(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    /// Per-request limits enforced by the dispatcher
    pub fn dispatch_limits(&self) -> DispatchLimits {
        DispatchLimits {
            max_input_size: self.max_input_size,
            cipher_timeout: self.cipher_timeout,
        }
    }

    /// Socket address to listen on
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .map_err(|e| FileCryptError::config(format!("Invalid bind address: {}", e)))
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("filecrypt-staging")
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(['G', 'B']), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(['M', 'B']), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(['K', 'B']), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Invalid number: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}

/// Parse a humantime duration such as `90s`, `5m` or `1h 30m`
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5M").unwrap(), (1.5 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
        assert!(parse_size("-1M").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 5m ").unwrap(), Duration::from_secs(300));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_storage_layout() {
        let layout = StorageLayout::new("/srv/crypt");
        assert_eq!(
            layout.originals(Algorithm::AesSmall),
            PathBuf::from("/srv/crypt/Original_files/aes128")
        );
        assert_eq!(
            layout.encrypted(Algorithm::AesLarge),
            PathBuf::from("/srv/crypt/Encrypted_files/aes256")
        );
        assert_eq!(
            layout.decrypted(Algorithm::Rsa),
            PathBuf::from("/srv/crypt/Decrypted_files/rsa")
        );
        assert_eq!(layout.keys(), PathBuf::from("/srv/crypt/Keys"));
    }

    #[test]
    fn test_layout_override_and_default() {
        let explicit = StorageLayout::resolve(Some(Path::new("/data"))).unwrap();
        assert_eq!(explicit.root(), Path::new("/data"));

        let default = StorageLayout::resolve(None).unwrap();
        assert!(default.root().is_dir());
    }

    #[test]
    fn test_service_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert_eq!(config.max_input_size, 64 * 1024 * 1024);
        assert!(config.staging_dir.ends_with("filecrypt-staging"));
        assert!(config.worker_count() >= 1);
        assert!(config.validate().is_ok());
        assert_eq!(config.socket_addr().unwrap().port(), 8000);
    }

    #[test]
    fn test_serve_args() {
        let args = CliArgs::parse_from([
            "filecrypt",
            "--base-path",
            "/tmp/x",
            "serve",
            "--max-input",
            "1K",
            "--session-ttl",
            "10m",
            "--no-cors",
        ]);
        assert_eq!(args.base_path, Some(PathBuf::from("/tmp/x")));

        let Commands::Serve(serve) = args.command else {
            panic!("expected serve");
        };
        let config = ServiceConfig::from_args(&serve).unwrap();
        assert_eq!(config.max_input_size, 1024);
        assert_eq!(config.session_ttl, Duration::from_secs(600));
        assert!(!config.cors);

        let limits = config.dispatch_limits();
        assert_eq!(limits.max_input_size, 1024);
        assert_eq!(limits.cipher_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_serve_args() {
        let args = CliArgs::parse_from(["filecrypt", "serve", "--io-timeout", "0s"]);
        let Commands::Serve(serve) = args.command else {
            panic!("expected serve");
        };
        assert!(matches!(
            ServiceConfig::from_args(&serve).unwrap_err(),
            FileCryptError::ConfigError(_)
        ));
    }

    #[test]
    fn test_batch_args() {
        let args = CliArgs::parse_from([
            "filecrypt",
            "decrypt",
            "--algorithm",
            "rsa",
            "--legacy-zero-padding",
        ]);
        match args.command {
            Commands::Decrypt { batch, legacy_zero_padding } => {
                assert_eq!(batch.algorithm, "rsa");
                assert!(legacy_zero_padding);
                assert!(batch.input.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
