//! HTTP/1.x exchange layer
//!
//! This module implements a per-exchange stream state machine over a shared
//! blocking transport. Each [`Stream`] drives one request/response pair;
//! the owning [`Connection`] serializes concurrent streams so that requests
//! are transmitted one at a time and responses are read in request-issue
//! order (HTTP/1.1 pipelining).
//!
//! # Architecture
//!
//! The transport is abstracted behind the `SessionOps` trait so the same
//! code runs over plain TCP and established TLS sessions:
//!
//! - `SessionOps` defines the operations (poll, read, write, shutdown)
//! - `codec` composes them into line/header/chunk reads and writes
//! - `Stream` owns header collection, body framing and state transitions
//! - `Connection` owns the socket, the pipeline FIFO and the request lock
//!
//! # Examples
//!
//! ```no_run
//! use std::net::TcpStream;
//! use std::time::Duration;
//! use h1stream::http::{Connection, FdSessionOps, Headers, Role, Version};
//!
//! let sock = TcpStream::connect("127.0.0.1:8080").unwrap();
//! let conn = Connection::new(FdSessionOps::new(sock), Role::Client, Version::Http11);
//! let stream = conn.new_stream();
//!
//! let mut req = Headers::new();
//! req.insert(":method", "GET");
//! req.insert(":path", "/");
//! req.insert(":authority", "localhost");
//! stream.write_headers(&req, true, Some(Duration::from_secs(2))).unwrap();
//!
//! let resp = stream.get_headers(Some(Duration::from_secs(2))).unwrap();
//! assert_eq!(resp.get(":status"), Some("200"));
//! ```

pub mod body;
mod codec;
pub mod connection;
pub mod headers;
pub mod message;
pub mod session;
pub mod stream;

pub use body::{BodyReader, BodyWriteKind};
pub use connection::{Connection, Role};
pub use headers::Headers;
pub use message::{Method, Status, Version};
pub use session::{Deadline, FdSessionOps, PollEvents, SessionOps, SslSessionOps};
pub use stream::{Stream, StreamState};

/// Result type for HTTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// HTTP operation errors
///
/// `Closed` and `Timeout` are the expected peer conditions; they are the
/// only errors that may advance a stream's state machine. The remaining
/// variants signal caller mistakes or malformed wire data and never
/// advance state.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("operation timed out")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid HTTP version: {0}")]
    InvalidVersion(String),

    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("invalid HTTP status: {0}")]
    InvalidStatus(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("invalid stream state: {0}")]
    InvalidState(&'static str),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Maximum number of headers per message
pub const MAX_HEADERS: usize = 64;

/// CRLF line ending
pub const CRLF: &str = "\r\n";
