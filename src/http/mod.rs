//! HTTP protocol implementation.
//!
//! This module implements an HTTP/1.x request server with support for
//! keep-alive connections on top of [`crate::io::AsyncStream`].
//!
//! # Architecture
//!
//! - **`engine`**: Incremental byte-level request state machine reporting through [`engine::ParserCallbacks`]
//! - **`parser`**: Builds a [`request::Request`] from engine events and drives the engine from a stream
//! - **`request`**: HTTP request representation
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes responses into the stream's output buffer
//! - **`session`**: One request/response cycle bound to its connection
//! - **`connection`**: The keep-alive loop ([`HttpProtocol`]) and the [`Application`] trait
//! - **`inspect`**: Demo application echoing the parsed request
//!
//! # Example
//!
//! ```no_run
//! use coserve::http::{HttpProtocol, inspect::Inspect};
//! use coserve::server::Server;
//!
//! fn main() -> anyhow::Result<()> {
//!     let server = Server::bind(HttpProtocol::new(Inspect), "127.0.0.1", 8080, 4)?;
//!     server.shutdown_on_signal();
//!     server.run()
//! }
//! ```

pub mod connection;
pub mod engine;
pub mod inspect;
pub mod parser;
pub mod request;
pub mod response;
pub mod session;
pub mod writer;

pub use connection::{Application, HttpProtocol};
pub use session::Session;
