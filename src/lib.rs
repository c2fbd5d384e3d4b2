//! Coserve - sequential-style request handling over non-blocking sockets
//!
//! Core library: suspending buffered streams, the connection server and the
//! incremental HTTP request parser.

pub mod config;
pub mod http;
pub mod io;
pub mod server;
