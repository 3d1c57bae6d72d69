//! Progress reporting module
//!
//! Provides terminal progress for batch encryption runs.

mod reporter;

pub use reporter::*;
