//! Staging sessions
//!
//! Isolated per-request work areas, the naming rules for their artifacts,
//! and the registry that keeps successful sessions downloadable until
//! they expire.

mod naming;
mod registry;
mod session;

pub use naming::*;
pub use registry::*;
pub use session::*;
