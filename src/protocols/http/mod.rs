//! HTTP paste retrieval.
//!
//! ```text
//! GET /<id>      200 text/plain; charset=utf-8, body = paste
//! GET /<id>      404 text/plain, "Paste not found" (unknown id)
//! anything else  404, empty body
//! ```
//!
//! No access log is written for these requests.

pub mod handler;

pub use handler::{router, AppState};
