//! Core encryption service
//!
//! Provides engine selection, the bounded cipher worker pool, request
//! dispatch into staging sessions, and batch directory processing.

mod batch;
mod dispatcher;
mod pool;
mod suite;

pub use batch::*;
pub use dispatcher::*;
pub use pool::*;
pub use suite::*;
