//! FileCrypt HTTP API
//!
//! Upload a file with an algorithm and passphrase, get back a retrieval
//! path for the result. Every route is also served under `/api`.
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/` | GET | Service landing page |
//! | `/encrypt` | POST | Encrypt a multipart upload (`file`, `algorithm`, `key`) |
//! | `/decrypt` | POST | Decrypt a multipart upload (`file`, `algorithm`, `key`) |
//! | `/download/{token}/{filename}` | GET | Fetch a staged result |
//! | `/generate-key` | GET | Random URL-safe key (`algorithm`, `length`) |
//! | `/health` | GET | Liveness |

mod handlers;
mod models;
mod multipart;
mod server;

pub use handlers::*;
pub use models::*;
pub use multipart::*;
pub use server::*;
