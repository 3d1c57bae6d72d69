//! Configuration module for FileCrypt
//!
//! Provides the CLI arguments, the storage layout and the
//! runtime settings of the HTTP service.

mod settings;

pub use settings::*;
