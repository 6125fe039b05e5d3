//! HTTP message vocabulary
//!
//! This module defines the request methods, protocol versions and status
//! codes the stream layer works with. Higher-level request/response types
//! are out of scope here; a stream deals in header sets and body chunks.

use super::{Error, Result};
use std::fmt;

/// HTTP methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Connect,
    Options,
    Trace,
    Patch,
}

impl Method {
    const ALL: [Method; 9] = [
        Method::Get,
        Method::Head,
        Method::Post,
        Method::Put,
        Method::Delete,
        Method::Connect,
        Method::Options,
        Method::Trace,
        Method::Patch,
    ];

    /// Wire token for the request line
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Patch => "PATCH",
        }
    }

    /// Parse a request-line token (tokens are case-sensitive on the wire)
    pub fn from_str(token: &str) -> Result<Self> {
        Method::ALL
            .iter()
            .copied()
            .find(|method| method.as_str() == token)
            .ok_or_else(|| Error::InvalidMethod(token.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Parse an `HTTP/major.minor` token; only 1.0 and 1.1 exist on this
    /// wire format
    pub fn from_str(token: &str) -> Result<Self> {
        match token.strip_prefix("HTTP/") {
            Some("1.0") => Ok(Version::Http10),
            Some("1.1") => Ok(Version::Http11),
            _ => Err(Error::InvalidVersion(token.to_string())),
        }
    }

    /// Wire token for request and status lines
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical reason phrases for the codes a peer is likely to send, sorted
/// by code for lookup. Codes outside the table still form valid status
/// lines; they just carry a placeholder phrase.
const REASON_PHRASES: &[(u16, &str)] = &[
    (100, "Continue"),
    (101, "Switching Protocols"),
    (200, "OK"),
    (201, "Created"),
    (202, "Accepted"),
    (203, "Non-Authoritative Information"),
    (204, "No Content"),
    (205, "Reset Content"),
    (206, "Partial Content"),
    (300, "Multiple Choices"),
    (301, "Moved Permanently"),
    (302, "Found"),
    (303, "See Other"),
    (304, "Not Modified"),
    (307, "Temporary Redirect"),
    (308, "Permanent Redirect"),
    (400, "Bad Request"),
    (401, "Unauthorized"),
    (403, "Forbidden"),
    (404, "Not Found"),
    (405, "Method Not Allowed"),
    (406, "Not Acceptable"),
    (407, "Proxy Authentication Required"),
    (408, "Request Timeout"),
    (409, "Conflict"),
    (410, "Gone"),
    (411, "Length Required"),
    (412, "Precondition Failed"),
    (413, "Content Too Large"),
    (414, "URI Too Long"),
    (415, "Unsupported Media Type"),
    (416, "Range Not Satisfiable"),
    (417, "Expectation Failed"),
    (421, "Misdirected Request"),
    (422, "Unprocessable Content"),
    (429, "Too Many Requests"),
    (431, "Request Header Fields Too Large"),
    (500, "Internal Server Error"),
    (501, "Not Implemented"),
    (502, "Bad Gateway"),
    (503, "Service Unavailable"),
    (504, "Gateway Timeout"),
    (505, "HTTP Version Not Supported"),
];

/// HTTP status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    code: u16,
}

impl Status {
    /// Validate a numeric status; status lines only carry 1xx through 5xx
    pub fn new(code: u16) -> Result<Self> {
        if !(100..600).contains(&code) {
            return Err(Error::InvalidStatus(code.to_string()));
        }
        Ok(Status { code })
    }

    /// Get the status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Canonical reason phrase for the status line
    pub fn reason_phrase(&self) -> &'static str {
        match REASON_PHRASES.binary_search_by_key(&self.code, |&(code, _)| code) {
            Ok(found) => REASON_PHRASES[found].1,
            Err(_) => "Unknown",
        }
    }

    /// Non-final (1xx) responses never carry a body and do not end the
    /// exchange
    pub fn is_informational(&self) -> bool {
        self.code < 200
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason_phrase())
    }
}
