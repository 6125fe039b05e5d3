//! Wire codec for HTTP/1.x
//!
//! Blocking, deadline-aware primitives for request/status lines, header
//! fields, RFC 7230 chunked framing and plain body reads. The stream layer
//! composes these operations and never touches raw bytes itself.
//!
//! The receive side keeps parsed-but-unconsumed bytes in an internal
//! buffer, so an operation that times out mid-message can be resumed by a
//! later call.

use super::headers::Headers;
use super::message::{Method, Status, Version};
use super::session::{Deadline, PollEvents, SessionOps};
use super::{Error, Result, CRLF};
use bytes::Bytes;

/// Transport read granularity
const READ_SIZE: usize = 4096;

/// Largest body slice handed back per read
pub(crate) const BODY_READ_MAX: usize = 8192;

/// Find the next CRLF in a buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Collapse transport-level close conditions into `Error::Closed`
fn normalize_io(err: Error) -> Error {
    use std::io::ErrorKind;

    if let Error::Io(io) = &err {
        match io.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof => return Error::Closed,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => return Error::Timeout,
            _ => {}
        }
    }
    err
}

/// Buffered receive half of a connection
pub(crate) struct RecvBuf {
    buf: Vec<u8>,
}

impl RecvBuf {
    pub fn new() -> Self {
        RecvBuf {
            buf: Vec::with_capacity(READ_SIZE),
        }
    }

    /// Pull more bytes from the transport, waiting up to the residual
    /// deadline. EOF surfaces as `Error::Closed`.
    fn fill<S: SessionOps>(&mut self, session: &S, deadline: &Deadline) -> Result<usize> {
        let residual = deadline.remaining()?;
        if !session.poll(PollEvents::Read, residual)? {
            return Err(Error::Timeout);
        }

        let mut temp = [0u8; READ_SIZE];
        let n = session.read(&mut temp).map_err(normalize_io)?;
        if n == 0 {
            return Err(Error::Closed);
        }

        self.buf.extend_from_slice(&temp[..n]);
        Ok(n)
    }

    /// Read one CRLF-terminated line, without the terminator
    fn read_line<S: SessionOps>(&mut self, session: &S, deadline: &Deadline) -> Result<String> {
        loop {
            if let Some(crlf_pos) = find_crlf(&self.buf) {
                let line = String::from_utf8_lossy(&self.buf[..crlf_pos]).to_string();
                self.buf.drain(..crlf_pos + 2);
                return Ok(line);
            }
            self.fill(session, deadline)?;
        }
    }

    /// Read the request line of an incoming request
    ///
    /// Format: `METHOD TARGET VERSION\r\n`
    pub fn read_request_line<S: SessionOps>(
        &mut self,
        session: &S,
        deadline: &Deadline,
    ) -> Result<(Method, String, Version)> {
        let line = self.read_line(session, deadline)?;
        let parts: Vec<&str> = line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(Error::Parse(format!(
                "Invalid request line: expected 3 parts, got {}",
                parts.len()
            )));
        }

        let method = Method::from_str(parts[0])?;
        let target = parts[1].to_string();
        let version = Version::from_str(parts[2])?;

        Ok((method, target, version))
    }

    /// Read the status line of an incoming response
    ///
    /// Format: `VERSION STATUS REASON\r\n`; a missing reason falls back to
    /// the canonical phrase for the code.
    pub fn read_status_line<S: SessionOps>(
        &mut self,
        session: &S,
        deadline: &Deadline,
    ) -> Result<(Version, Status, String)> {
        let line = self.read_line(session, deadline)?;
        let parts: Vec<&str> = line.splitn(3, ' ').collect();

        if parts.len() < 2 {
            return Err(Error::Parse(format!(
                "Invalid status line: expected at least 2 parts, got {}",
                parts.len()
            )));
        }

        let version = Version::from_str(parts[0])?;
        let status_code = parts[1]
            .parse::<u16>()
            .map_err(|_| Error::Parse(format!("Invalid status code: {}", parts[1])))?;
        let status = Status::new(status_code)?;
        let reason = if parts.len() == 3 {
            parts[2].to_string()
        } else {
            status.reason_phrase().to_string()
        };

        Ok((version, status, reason))
    }

    /// Read one header field, or `None` at the blank-line terminator
    pub fn next_header<S: SessionOps>(
        &mut self,
        session: &S,
        deadline: &Deadline,
    ) -> Result<Option<(String, String)>> {
        let line = self.read_line(session, deadline)?;
        if line.is_empty() {
            return Ok(None);
        }

        let (name, value) = Headers::parse_header_line(&line)?;
        Ok(Some((name, value)))
    }

    /// Read one chunk of a chunked body, or `None` at the zero-size
    /// terminator (chunk extensions after `;` are ignored)
    ///
    /// The size line, payload and trailing CRLF are consumed together, so
    /// a timeout mid-chunk leaves the buffer positioned for a retry.
    /// After `None`, the trailer section follows; callers read it with
    /// [`next_header`](Self::next_header) until the terminator.
    pub fn read_chunk<S: SessionOps>(
        &mut self,
        session: &S,
        deadline: &Deadline,
    ) -> Result<Option<Bytes>> {
        loop {
            if let Some(crlf_pos) = find_crlf(&self.buf) {
                let size_str = {
                    let line = String::from_utf8_lossy(&self.buf[..crlf_pos]);
                    line.split(';').next().unwrap_or("").trim().to_string()
                };
                let size = usize::from_str_radix(&size_str, 16)
                    .map_err(|_| Error::InvalidChunkSize(size_str.clone()))?;

                if size == 0 {
                    self.buf.drain(..crlf_pos + 2);
                    return Ok(None);
                }

                let total = crlf_pos + 2 + size + 2;
                while self.buf.len() < total {
                    self.fill(session, deadline)?;
                }
                if &self.buf[total - 2..total] != CRLF.as_bytes() {
                    return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                }

                let data = self.buf[crlf_pos + 2..total - 2].to_vec();
                self.buf.drain(..total);
                return Ok(Some(Bytes::from(data)));
            }
            self.fill(session, deadline)?;
        }
    }

    /// Read up to `max` bytes (at least one), for length-delimited and
    /// close-delimited bodies
    pub fn read_up_to<S: SessionOps>(
        &mut self,
        session: &S,
        max: usize,
        deadline: &Deadline,
    ) -> Result<Bytes> {
        if self.buf.is_empty() {
            self.fill(session, deadline)?;
        }
        let n = max.min(self.buf.len());
        let data: Vec<u8> = self.buf.drain(..n).collect();
        Ok(Bytes::from(data))
    }
}

/// Send half of a connection
///
/// Every operation is a full write: short writes retry with the residual
/// deadline until the bytes are on the wire.
pub(crate) struct SendBuf;

impl SendBuf {
    pub fn new() -> Self {
        SendBuf
    }

    fn write_all<S: SessionOps>(
        &self,
        session: &S,
        mut data: &[u8],
        deadline: &Deadline,
    ) -> Result<()> {
        while !data.is_empty() {
            let residual = deadline.remaining()?;
            if !session.poll(PollEvents::Write, residual)? {
                return Err(Error::Timeout);
            }

            let n = session.write(data).map_err(normalize_io)?;
            if n == 0 {
                return Err(Error::Closed);
            }
            data = &data[n..];
        }
        Ok(())
    }

    /// Emit `METHOD TARGET VERSION\r\n`
    pub fn write_request_line<S: SessionOps>(
        &mut self,
        session: &S,
        method: Method,
        target: &str,
        version: Version,
        deadline: &Deadline,
    ) -> Result<()> {
        let line = format!("{} {} {}{}", method, target, version, CRLF);
        self.write_all(session, line.as_bytes(), deadline)
    }

    /// Emit `VERSION STATUS REASON\r\n`
    pub fn write_status_line<S: SessionOps>(
        &mut self,
        session: &S,
        version: Version,
        status: Status,
        reason: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        let line = format!("{} {} {}{}", version, status.code(), reason, CRLF);
        self.write_all(session, line.as_bytes(), deadline)
    }

    /// Emit `name: value\r\n`
    pub fn write_header<S: SessionOps>(
        &mut self,
        session: &S,
        name: &str,
        value: &str,
        deadline: &Deadline,
    ) -> Result<()> {
        let line = format!("{}: {}{}", name, value, CRLF);
        self.write_all(session, line.as_bytes(), deadline)
    }

    /// Emit the blank-line terminator ending a header or trailer section
    pub fn write_headers_done<S: SessionOps>(
        &mut self,
        session: &S,
        deadline: &Deadline,
    ) -> Result<()> {
        self.write_all(session, CRLF.as_bytes(), deadline)
    }

    /// Emit one chunk in chunked framing; empty chunks are suppressed
    /// (a zero-size chunk would terminate the body)
    pub fn write_body_chunk<S: SessionOps>(
        &mut self,
        session: &S,
        data: &[u8],
        deadline: &Deadline,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let size_line = format!("{:x}{}", data.len(), CRLF);
        self.write_all(session, size_line.as_bytes(), deadline)?;
        self.write_all(session, data, deadline)?;
        self.write_all(session, CRLF.as_bytes(), deadline)
    }

    /// Emit the zero-size last chunk; the trailer section (and its
    /// terminator) follows via `write_header` / `write_headers_done`
    pub fn write_body_last_chunk<S: SessionOps>(
        &mut self,
        session: &S,
        deadline: &Deadline,
    ) -> Result<()> {
        self.write_all(session, b"0\r\n", deadline)
    }

    /// Emit raw body bytes (length-delimited or close-delimited framing)
    pub fn write_body_plain<S: SessionOps>(
        &mut self,
        session: &S,
        data: &[u8],
        deadline: &Deadline,
    ) -> Result<()> {
        self.write_all(session, data, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::session::FdSessionOps;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn wire_pair(wire: &'static [u8]) -> FdSessionOps {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(wire).unwrap();
        });

        FdSessionOps::new(TcpStream::connect(addr).unwrap())
    }

    fn deadline() -> Deadline {
        Deadline::after(Some(Duration::from_secs(2)))
    }

    #[test]
    fn test_read_request_line() {
        let session = wire_pair(b"GET /index.html HTTP/1.1\r\n");
        let mut recv = RecvBuf::new();

        let (method, target, version) = recv.read_request_line(&session, &deadline()).unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(target, "/index.html");
        assert_eq!(version, Version::Http11);
    }

    #[test]
    fn test_read_status_line_default_reason() {
        let session = wire_pair(b"HTTP/1.0 404\r\n");
        let mut recv = RecvBuf::new();

        let (version, status, reason) = recv.read_status_line(&session, &deadline()).unwrap();
        assert_eq!(version, Version::Http10);
        assert_eq!(status.code(), 404);
        assert_eq!(reason, "Not Found");
    }

    #[test]
    fn test_next_header_terminator() {
        let session = wire_pair(b"Content-Type: text/plain\r\n\r\n");
        let mut recv = RecvBuf::new();
        let dl = deadline();

        let (name, value) = recv.next_header(&session, &dl).unwrap().unwrap();
        assert_eq!(name, "Content-Type");
        assert_eq!(value, "text/plain");

        assert!(recv.next_header(&session, &dl).unwrap().is_none());
    }

    #[test]
    fn test_read_chunks() {
        let session = wire_pair(b"5\r\nHello\r\n5;ext=1\r\nWorld\r\n0\r\n\r\n");
        let mut recv = RecvBuf::new();
        let dl = deadline();

        assert_eq!(&recv.read_chunk(&session, &dl).unwrap().unwrap()[..], b"Hello");
        assert_eq!(&recv.read_chunk(&session, &dl).unwrap().unwrap()[..], b"World");
        assert!(recv.read_chunk(&session, &dl).unwrap().is_none());
        // trailer section terminator
        assert!(recv.next_header(&session, &dl).unwrap().is_none());
    }

    #[test]
    fn test_read_chunk_bad_size() {
        let session = wire_pair(b"zz\r\n");
        let mut recv = RecvBuf::new();

        let result = recv.read_chunk(&session, &deadline());
        assert!(matches!(result, Err(Error::InvalidChunkSize(_))));
    }

    #[test]
    fn test_read_up_to_eof_is_closed() {
        let session = wire_pair(b"tail");
        let mut recv = RecvBuf::new();
        let dl = deadline();

        let data = recv.read_up_to(&session, 100, &dl).unwrap();
        assert_eq!(&data[..], b"tail");

        let result = recv.read_up_to(&session, 100, &dl);
        assert!(matches!(result, Err(Error::Closed)));
    }

    #[test]
    fn test_send_side_wire_format() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let session = FdSessionOps::new(stream);
            let mut recv = RecvBuf::new();
            let dl = Deadline::after(Some(Duration::from_secs(2)));

            let mut wire = Vec::new();
            loop {
                match recv.read_up_to(&session, 4096, &dl) {
                    Ok(data) => wire.extend_from_slice(&data),
                    Err(Error::Closed) => break,
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            wire
        });

        let session = FdSessionOps::new(TcpStream::connect(addr).unwrap());
        let mut send = SendBuf::new();
        let dl = deadline();

        send.write_request_line(&session, Method::Post, "/submit", Version::Http11, &dl)
            .unwrap();
        send.write_header(&session, "host", "example.com", &dl).unwrap();
        send.write_headers_done(&session, &dl).unwrap();
        send.write_body_chunk(&session, b"Hello", &dl).unwrap();
        send.write_body_chunk(&session, b"", &dl).unwrap();
        send.write_body_last_chunk(&session, &dl).unwrap();
        send.write_headers_done(&session, &dl).unwrap();
        session.close().unwrap();

        let wire = handle.join().unwrap();
        assert_eq!(
            wire,
            b"POST /submit HTTP/1.1\r\nhost: example.com\r\n\r\n5\r\nHello\r\n0\r\n\r\n"
        );
    }

    #[test]
    fn test_status_line_emission() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let session = FdSessionOps::new(stream);
            let mut recv = RecvBuf::new();
            let dl = Deadline::after(Some(Duration::from_secs(2)));
            recv.read_status_line(&session, &dl).unwrap()
        });

        let session = FdSessionOps::new(TcpStream::connect(addr).unwrap());
        let mut send = SendBuf::new();
        let status = Status::new(204).unwrap();
        send.write_status_line(&session, Version::Http11, status, status.reason_phrase(), &deadline())
            .unwrap();

        let (version, status, reason) = handle.join().unwrap();
        assert_eq!(version, Version::Http11);
        assert_eq!(status.code(), 204);
        assert_eq!(reason, "No Content");
    }
}
