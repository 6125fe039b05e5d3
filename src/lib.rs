//! h1stream - HTTP/1.x stream state machine
//!
//! This crate drives single request/response exchanges over a shared
//! blocking transport, with pipelined ordering across the concurrent
//! streams of a connection, for both the client and the server role.

pub mod http;
