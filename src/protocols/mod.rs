//! Protocol implementations.
//!
//! - `ingest`: raw TCP paste submission
//! - `http`: HTTP paste retrieval

pub mod http;
pub mod ingest;
