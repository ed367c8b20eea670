//! Raw TCP paste ingestion.
//!
//! A netcat-friendly protocol with no framing at all:
//! - Client connects, writes the paste bytes, optionally half-closes
//! - Server replies with a single line and closes the connection
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  <raw bytes>
//! Response: http://<host>:<http_port>/<id>\n
//!
//! Request:  <more than max_size bytes>
//! Response: Error: Paste too large (max 1MB)\n
//!
//! Request:  <raw bytes, identifier space exhausted>
//! Response: Error: Bin is full\n
//! ```
//!
//! By default the server keeps reading up to `max_size + 1` bytes for as
//! long as more data arrives within the settle window (`read_settle_ms`),
//! so clients that never half-close (plain `nc`) still get an answer while
//! payloads split over many TCP segments are collected whole. A zero window
//! takes a single read. `read_to_eof` waits for the client's EOF instead.

pub mod handler;
pub mod reply;

pub use handler::{handle_connection, IngestContext};
