//! Body framing
//!
//! The rule by which the end of an HTTP/1.x message body is determined:
//! chunked terminator, declared length, or connection close. This module
//! owns both directions of that decision — the outbound framing tag chosen
//! when headers are written, and the inbound reader handle built from
//! received headers.

use super::connection::Role;
use super::headers::Headers;
use super::message::{Method, Version};
use super::{Error, Result};

/// Content-Length values longer than this are rejected outright
const MAX_CONTENT_LENGTH_DIGITS: usize = 12;

/// Parse a Content-Length value: decimal digits only, bounded width
fn parse_content_length(value: &str) -> Result<u64> {
    if value.is_empty()
        || value.len() > MAX_CONTENT_LENGTH_DIGITS
        || !value.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(Error::InvalidHeader(format!(
            "Invalid Content-Length: {}",
            value
        )));
    }

    value
        .parse::<u64>()
        .map_err(|_| Error::InvalidHeader(format!("Invalid Content-Length: {}", value)))
}

/// Outbound body framing, chosen exactly once per exchange when headers
/// are written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyWriteKind {
    /// RFC 7230 chunked framing
    Chunked,
    /// Exactly this many bytes remain to be written
    Length(u64),
    /// Body ends when the write side shuts down
    Close,
}

/// Inbound body reader handle
///
/// Created lazily on the first body read and reused for the rest of the
/// exchange; each variant carries the progress it needs to know when the
/// body is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyReader {
    /// Chunked body; `done` set once the zero-size terminator (and the
    /// trailer section) has been consumed
    Chunked { done: bool },
    /// Exactly `remaining` bytes left to read
    Length { remaining: u64 },
    /// Read until the peer closes; `eof` set once it has
    Close { eof: bool },
}

impl BodyReader {
    /// Select the inbound framing from a received header set
    ///
    /// `chunked` is the only transfer coding supported; any other coding
    /// is a protocol error. Without a transfer coding, a valid
    /// `Content-Length` delimits the body; with neither, the body runs to
    /// connection close.
    pub fn from_headers(headers: &Headers) -> Result<BodyReader> {
        if headers.contains("transfer-encoding") {
            for value in headers.get_all("transfer-encoding") {
                for coding in value.split(',') {
                    let coding = coding.trim();
                    if !coding.is_empty() && !coding.eq_ignore_ascii_case("chunked") {
                        return Err(Error::Protocol(format!(
                            "Unsupported transfer coding: {}",
                            coding
                        )));
                    }
                }
            }
            return Ok(BodyReader::Chunked { done: false });
        }

        if let Some(value) = headers.get("content-length") {
            let remaining = parse_content_length(value)?;
            return Ok(BodyReader::Length { remaining });
        }

        Ok(BodyReader::Close { eof: false })
    }
}

/// Whether the local side must close after this exchange, derived from the
/// `Connection` header and the peer's version
///
/// An HTTP/1.0 peer closes unless `keep-alive` is present; an HTTP/1.1
/// peer (or one that has not spoken yet) closes only on an explicit
/// `close` token.
pub fn close_from_connection_header(headers: &Headers, peer_version: Option<Version>) -> bool {
    match peer_version {
        Some(Version::Http10) => !headers.value_has_token("connection", "keep-alive"),
        _ => headers.value_has_token("connection", "close"),
    }
}

/// The outcome of the outbound framing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteFraming {
    pub kind: BodyWriteKind,
    pub close_when_done: bool,
}

/// Choose the outbound framing for a header set about to be written
///
/// Priority order: CONNECT tunnels are close-delimited; `end_stream`
/// means an empty body; then chunked transfer-encoding, declared
/// content-length, and close-delimited framing. A server with no hint
/// falls back to close-delimited and forces the connection closed; a
/// client with no hint has no way to delimit its request body.
pub(crate) fn choose_write_framing(
    headers: &Headers,
    role: Role,
    req_method: Option<Method>,
    peer_version: Option<Version>,
    end_stream: bool,
) -> Result<WriteFraming> {
    if req_method == Some(Method::Connect) {
        return Ok(WriteFraming {
            kind: BodyWriteKind::Close,
            close_when_done: true,
        });
    }

    let close_when_done = close_from_connection_header(headers, peer_version);

    if end_stream {
        return Ok(WriteFraming {
            kind: BodyWriteKind::Length(0),
            close_when_done,
        });
    }

    if headers.value_ends_with_token("transfer-encoding", "chunked") {
        return Ok(WriteFraming {
            kind: BodyWriteKind::Chunked,
            close_when_done,
        });
    }

    if let Some(value) = headers.get("content-length") {
        let length = parse_content_length(value)?;
        return Ok(WriteFraming {
            kind: BodyWriteKind::Length(length),
            close_when_done,
        });
    }

    if close_when_done {
        return Ok(WriteFraming {
            kind: BodyWriteKind::Close,
            close_when_done,
        });
    }

    match role {
        Role::Server => Ok(WriteFraming {
            kind: BodyWriteKind::Close,
            close_when_done: true,
        }),
        Role::Client => Err(Error::InvalidState(
            "client body needs content-length or chunked transfer-encoding",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        let mut h = Headers::new();
        for (name, value) in pairs {
            h.insert(*name, *value);
        }
        h
    }

    #[test]
    fn test_reader_chunked() {
        let h = headers(&[("transfer-encoding", "chunked")]);
        assert_eq!(
            BodyReader::from_headers(&h).unwrap(),
            BodyReader::Chunked { done: false }
        );
    }

    #[test]
    fn test_reader_rejects_unknown_coding() {
        let h = headers(&[("transfer-encoding", "gzip, chunked")]);
        assert!(matches!(
            BodyReader::from_headers(&h),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_reader_length() {
        let h = headers(&[("content-length", "42")]);
        assert_eq!(
            BodyReader::from_headers(&h).unwrap(),
            BodyReader::Length { remaining: 42 }
        );
    }

    #[test]
    fn test_reader_rejects_bad_length() {
        for bad in ["-1", "4x2", "", "1234567890123"] {
            let h = headers(&[("content-length", bad)]);
            assert!(
                matches!(BodyReader::from_headers(&h), Err(Error::InvalidHeader(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_reader_close_delimited() {
        let h = headers(&[("content-type", "text/plain")]);
        assert_eq!(
            BodyReader::from_headers(&h).unwrap(),
            BodyReader::Close { eof: false }
        );
    }

    #[test]
    fn test_close_rules_http10() {
        let plain = headers(&[]);
        assert!(close_from_connection_header(&plain, Some(Version::Http10)));

        let keep = headers(&[("connection", "keep-alive")]);
        assert!(!close_from_connection_header(&keep, Some(Version::Http10)));
    }

    #[test]
    fn test_close_rules_http11() {
        let plain = headers(&[]);
        assert!(!close_from_connection_header(&plain, Some(Version::Http11)));
        assert!(!close_from_connection_header(&plain, None));

        let close = headers(&[("connection", "close")]);
        assert!(close_from_connection_header(&close, Some(Version::Http11)));
        assert!(close_from_connection_header(&close, None));
    }

    #[test]
    fn test_framing_connect_is_close() {
        let h = headers(&[(":method", "CONNECT"), (":authority", "example.com:443")]);
        let framing = choose_write_framing(
            &h,
            Role::Client,
            Some(Method::Connect),
            None,
            false,
        )
        .unwrap();
        assert_eq!(framing.kind, BodyWriteKind::Close);
        assert!(framing.close_when_done);
    }

    #[test]
    fn test_framing_end_stream_is_empty_length() {
        let h = headers(&[(":method", "GET"), (":path", "/")]);
        let framing =
            choose_write_framing(&h, Role::Client, Some(Method::Get), None, true).unwrap();
        assert_eq!(framing.kind, BodyWriteKind::Length(0));
        assert!(!framing.close_when_done);
    }

    #[test]
    fn test_framing_chunked_beats_length() {
        let h = headers(&[
            ("transfer-encoding", "chunked"),
            ("content-length", "10"),
        ]);
        let framing =
            choose_write_framing(&h, Role::Server, Some(Method::Get), Some(Version::Http11), false)
                .unwrap();
        assert_eq!(framing.kind, BodyWriteKind::Chunked);
    }

    #[test]
    fn test_framing_server_fallback_closes() {
        let h = headers(&[("content-type", "text/plain")]);
        let framing =
            choose_write_framing(&h, Role::Server, Some(Method::Get), Some(Version::Http11), false)
                .unwrap();
        assert_eq!(framing.kind, BodyWriteKind::Close);
        assert!(framing.close_when_done);
    }

    #[test]
    fn test_framing_client_without_hint_fails() {
        let h = headers(&[(":method", "POST"), (":path", "/upload")]);
        assert!(matches!(
            choose_write_framing(&h, Role::Client, Some(Method::Post), None, false),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_framing_http10_close_delimited_body() {
        let h = headers(&[]);
        let framing =
            choose_write_framing(&h, Role::Server, Some(Method::Get), Some(Version::Http10), false)
                .unwrap();
        assert_eq!(framing.kind, BodyWriteKind::Close);
        assert!(framing.close_when_done);
    }
}
