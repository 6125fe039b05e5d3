//! Per-exchange stream state machine
//!
//! A `Stream` drives a single request/response pair over its connection's
//! shared transport. The same machine serves both roles with the two
//! half-directions reversed: a client sends the request (local half) and
//! reads the response (remote half), a server the opposite.
//!
//! All side effects of a transition happen in `set_state`, atomically with
//! the state change: finishing the remote half releases the read-order
//! token (the server's request lock, the client's pipeline slot), and
//! finishing the local half releases the write-order token.

use super::body::{choose_write_framing, BodyReader, BodyWriteKind};
use super::codec::BODY_READ_MAX;
use super::connection::{Connection, Role};
use super::headers::Headers;
use super::message::{Method, Status};
use super::session::{Deadline, SessionOps};
use super::{Error, Result};
use bytes::Bytes;
use log::debug;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::Duration;

/// Timeout used for the best-effort reads and writes of `shutdown`
const SHUTDOWN_GRACE: Duration = Duration::from_millis(50);

/// Stream state
///
/// Shared by client and server; the legal transitions form a path from
/// `Idle` to `Closed` in which each half-direction finishes exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// No headers exchanged yet
    Idle,
    /// Headers sent or received in at least one direction
    Open,
    /// Local side has finished sending
    HalfClosedLocal,
    /// Remote side has finished sending
    HalfClosedRemote,
    /// Terminal
    Closed,
}

impl StreamState {
    /// Check if the stream can send data
    pub fn can_send(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedRemote)
    }

    /// Check if the stream can receive data
    pub fn can_receive(&self) -> bool {
        matches!(self, StreamState::Open | StreamState::HalfClosedLocal)
    }

    /// Check if the stream is closed
    pub fn is_closed(&self) -> bool {
        matches!(self, StreamState::Closed)
    }

    fn local_finished(&self) -> bool {
        matches!(self, StreamState::HalfClosedLocal | StreamState::Closed)
    }

    fn remote_finished(&self) -> bool {
        matches!(self, StreamState::HalfClosedRemote | StreamState::Closed)
    }
}

struct StreamInner {
    state: StreamState,
    headers: Headers,
    headers_done: bool,
    headers_in_flight: bool,
    req_method: Option<Method>,
    peer_version: Option<super::message::Version>,
    body_write: Option<BodyWriteKind>,
    close_when_done: bool,
    body_reader: Option<BodyReader>,
    stats_sent: u64,
}

/// One HTTP/1.x exchange over a shared connection
///
/// The back-reference to the connection is non-owning; operations on a
/// stream whose connection has been dropped fail `Closed`.
pub struct Stream<S: SessionOps> {
    role: Role,
    id: u64,
    connection: Weak<Connection<S>>,
    inner: Mutex<StreamInner>,
    state_cond: Condvar,
    headers_cond: Condvar,
}

impl<S: SessionOps> Stream<S> {
    pub(crate) fn new(connection: Weak<Connection<S>>, role: Role, id: u64) -> Arc<Self> {
        Arc::new(Stream {
            role,
            id,
            connection,
            inner: Mutex::new(StreamInner {
                state: StreamState::Idle,
                headers: Headers::new(),
                headers_done: false,
                headers_in_flight: false,
                req_method: None,
                peer_version: None,
                body_write: None,
                close_when_done: false,
                body_reader: None,
                stats_sent: 0,
            }),
            state_cond: Condvar::new(),
            headers_cond: Condvar::new(),
        })
    }

    /// Stream id, unique within the connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// This side's role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current stream state
    pub fn state(&self) -> StreamState {
        self.inner.lock().unwrap().state
    }

    /// Cumulative body bytes written so far
    pub fn stats_sent(&self) -> u64 {
        self.inner.lock().unwrap().stats_sent
    }

    /// Block until the state differs from `seen`, returning the new state
    pub fn wait_for_state_change(
        &self,
        seen: StreamState,
        timeout: Option<Duration>,
    ) -> Result<StreamState> {
        let deadline = Deadline::after(timeout);
        let mut inner = self.inner.lock().unwrap();
        while inner.state == seen {
            inner = self.wait_cond(&self.state_cond, inner, &deadline)?;
        }
        Ok(inner.state)
    }

    fn connection(&self) -> Result<Arc<Connection<S>>> {
        self.connection.upgrade().ok_or(Error::Closed)
    }

    fn wait_cond<'a>(
        &self,
        cond: &Condvar,
        guard: MutexGuard<'a, StreamInner>,
        deadline: &Deadline,
    ) -> Result<MutexGuard<'a, StreamInner>> {
        match deadline.remaining()? {
            None => Ok(cond.wait(guard).unwrap()),
            Some(residual) => {
                let (guard, _) = cond.wait_timeout(guard, residual).unwrap();
                Ok(guard)
            }
        }
    }

    /// Transition to `new`, performing the bound side effects atomically
    ///
    /// This is the only place pipeline tokens are released.
    fn set_state(&self, inner: &mut StreamInner, conn: &Connection<S>, new: StreamState) {
        let old = inner.state;
        if old == new {
            return;
        }
        inner.state = new;
        debug!("stream {} {:?} -> {:?}", self.id, old, new);

        let local_newly = new.local_finished() && !old.local_finished();
        let remote_newly = new.remote_finished() && !old.remote_finished();

        if remote_newly {
            // The peer's message has been consumed: give up the read-order
            // token so the next exchange can be read.
            match self.role {
                Role::Server => conn.release_request_lock(self.id),
                Role::Client => conn.remove_pipeline(self.id),
            }
        }
        if local_newly {
            // Our message is on the wire: give up the write-order token.
            match self.role {
                Role::Client => conn.release_request_lock(self.id),
                Role::Server => conn.remove_pipeline(self.id),
            }
        }

        self.state_cond.notify_all();
    }

    /// Get the header set of the peer's message, reading it from the
    /// transport on first call
    ///
    /// Idempotent after the first successful return. A server stream in
    /// `Idle` reads the request line (acquiring the request lock and
    /// entering the pipeline first); a client stream reads the status line
    /// once it reaches the head of the pipeline. `Timeout` leaves all
    /// progress in place, so the call can be retried.
    pub fn get_headers(&self, timeout: Option<Duration>) -> Result<Headers> {
        let deadline = Deadline::after(timeout);
        self.get_headers_impl(&deadline)
    }

    fn get_headers_impl(&self, deadline: &Deadline) -> Result<Headers> {
        let conn = self.connection()?;
        let mut inner = self.inner.lock().unwrap();

        loop {
            if inner.headers_done {
                return Ok(inner.headers.clone());
            }
            if !inner.headers_in_flight {
                break;
            }
            // Another caller is reading the headers; wait for them.
            inner = self.wait_cond(&self.headers_cond, inner, deadline)?;
        }

        let need_start_line = match self.role {
            Role::Server => match inner.state {
                StreamState::Idle => true,
                // Resuming the field-line loop after a timeout
                StreamState::Open => false,
                _ => return Err(Error::Closed),
            },
            Role::Client => match inner.state {
                StreamState::Idle => {
                    return Err(Error::InvalidState(
                        "client stream has no headers before the request is sent",
                    ));
                }
                StreamState::Open | StreamState::HalfClosedLocal => {
                    inner.headers.get(":status").is_none()
                }
                _ => return Err(Error::Closed),
            },
        };

        inner.headers_in_flight = true;
        drop(inner);

        let result = self.read_headers_io(&conn, need_start_line, deadline);

        let mut inner = self.inner.lock().unwrap();
        inner.headers_in_flight = false;
        match result {
            Ok(()) => {}
            Err(e) => {
                // Wake any waiter so it can take over or observe the error
                self.headers_cond.notify_all();
                return Err(e);
            }
        }

        inner.headers_done = true;

        // No-body detection: advance the remote half immediately when the
        // message cannot carry a body.
        let no_body = match self.role {
            Role::Client => inner.req_method == Some(Method::Head),
            Role::Server => {
                matches!(inner.req_method, Some(Method::Get) | Some(Method::Head))
                    && !inner.headers.contains("content-length")
                    && !inner.headers.contains("content-type")
                    && !inner.headers.contains("transfer-encoding")
            }
        };
        if no_body {
            let next = if inner.state == StreamState::HalfClosedLocal {
                StreamState::Closed
            } else {
                StreamState::HalfClosedRemote
            };
            self.set_state(&mut inner, &conn, next);
        }

        self.headers_cond.notify_all();
        Ok(inner.headers.clone())
    }

    /// The socket half of `get_headers`; stream fields are updated through
    /// short re-locks so partial progress survives a timeout.
    fn read_headers_io(
        &self,
        conn: &Arc<Connection<S>>,
        need_start_line: bool,
        deadline: &Deadline,
    ) -> Result<()> {
        match self.role {
            Role::Server => {
                if need_start_line {
                    // Only the request-lock holder may read a request;
                    // entering the pipeline fixes the response order.
                    conn.acquire_request_lock(self.id, deadline)?;
                    conn.push_pipeline(self.id);

                    let (method, target, version) = {
                        let mut recv = conn.recv_buf();
                        recv.read_request_line(conn.session(), deadline)?
                    };

                    let mut inner = self.inner.lock().unwrap();
                    inner.headers.insert(":method", method.as_str());
                    if method == Method::Connect {
                        inner.headers.insert(":authority", target);
                    } else {
                        inner.headers.insert(":path", target);
                    }
                    inner.headers.insert(":scheme", conn.scheme());
                    inner.req_method = Some(method);
                    inner.peer_version = Some(version);
                    self.set_state(&mut inner, conn, StreamState::Open);
                }
            }
            Role::Client => {
                // Responses arrive in request-issue order
                conn.wait_pipeline_head(self.id, deadline)?;

                if need_start_line {
                    let (version, status, _reason) = {
                        let mut recv = conn.recv_buf();
                        recv.read_status_line(conn.session(), deadline)?
                    };

                    let mut inner = self.inner.lock().unwrap();
                    inner.peer_version = Some(version);
                    inner.headers.insert(":status", status.code().to_string());
                }
            }
        }

        loop {
            let field = {
                let mut recv = conn.recv_buf();
                recv.next_header(conn.session(), deadline)?
            };
            match field {
                Some((name, value)) => {
                    let mut inner = self.inner.lock().unwrap();
                    if name.eq_ignore_ascii_case("host") {
                        inner.headers.insert(":authority", value);
                    } else {
                        inner.headers.insert(name, value);
                    }
                }
                None => return Ok(()),
            }
        }
    }

    /// Pull the next chunk of the peer's body
    ///
    /// The first call obtains headers (as `get_headers`) and selects the
    /// body reader from them. End of body surfaces as `Err(Closed)` and
    /// finishes the remote half; for a chunked body the terminator call
    /// also reads the trailer section into the header set.
    pub fn get_next_chunk(&self, timeout: Option<Duration>) -> Result<Bytes> {
        let deadline = Deadline::after(timeout);
        let conn = self.connection()?;

        self.get_headers_impl(&deadline)?;

        let reader = {
            let mut inner = self.inner.lock().unwrap();
            match inner.body_reader {
                Some(reader) => reader,
                None => {
                    if inner.state.remote_finished() {
                        // No-body message: the remote half already finished
                        // when headers completed.
                        return Err(Error::Closed);
                    }
                    let selected = BodyReader::from_headers(&inner.headers)?;
                    inner.body_reader = Some(selected);
                    selected
                }
            }
        };

        let needs_io = match reader {
            BodyReader::Chunked { done } => !done,
            BodyReader::Length { remaining } => remaining > 0,
            BodyReader::Close { eof } => !eof,
        };
        if needs_io {
            // Body reads are order-sensitive socket I/O
            match self.role {
                Role::Client => conn.wait_pipeline_head(self.id, &deadline)?,
                Role::Server => {
                    if !conn.holds_request_lock(self.id) {
                        return Err(Error::InvalidState(
                            "server stream no longer holds the request lock",
                        ));
                    }
                }
            }
        }

        let data = match reader {
            BodyReader::Chunked { done: true } => None,
            BodyReader::Chunked { done: false } => {
                let chunk = {
                    let mut recv = conn.recv_buf();
                    recv.read_chunk(conn.session(), &deadline)?
                };
                match chunk {
                    Some(data) => Some(data),
                    None => {
                        // Terminator: the trailer section follows
                        self.read_trailers(&conn, &deadline)?;
                        let mut inner = self.inner.lock().unwrap();
                        inner.body_reader = Some(BodyReader::Chunked { done: true });
                        self.headers_cond.notify_all();
                        None
                    }
                }
            }
            BodyReader::Length { remaining: 0 } => None,
            BodyReader::Length { remaining } => {
                let max = remaining.min(BODY_READ_MAX as u64) as usize;
                let data = {
                    let mut recv = conn.recv_buf();
                    recv.read_up_to(conn.session(), max, &deadline)?
                };
                let mut inner = self.inner.lock().unwrap();
                inner.body_reader = Some(BodyReader::Length {
                    remaining: remaining - data.len() as u64,
                });
                Some(data)
            }
            BodyReader::Close { eof: true } => None,
            BodyReader::Close { eof: false } => {
                let read = {
                    let mut recv = conn.recv_buf();
                    recv.read_up_to(conn.session(), BODY_READ_MAX, &deadline)
                };
                match read {
                    Ok(data) => Some(data),
                    Err(Error::Closed) => {
                        let mut inner = self.inner.lock().unwrap();
                        inner.body_reader = Some(BodyReader::Close { eof: true });
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match data {
            Some(data) => Ok(data),
            None => {
                // End of body: finish the remote half
                let mut inner = self.inner.lock().unwrap();
                let next = if inner.state == StreamState::HalfClosedLocal {
                    StreamState::Closed
                } else if inner.state == StreamState::Closed {
                    StreamState::Closed
                } else {
                    StreamState::HalfClosedRemote
                };
                self.set_state(&mut inner, &conn, next);
                Err(Error::Closed)
            }
        }
    }

    fn read_trailers(&self, conn: &Arc<Connection<S>>, deadline: &Deadline) -> Result<()> {
        loop {
            let field = {
                let mut recv = conn.recv_buf();
                recv.next_header(conn.session(), deadline)?
            };
            match field {
                Some((name, value)) => {
                    let mut inner = self.inner.lock().unwrap();
                    inner.headers.insert(name, value);
                }
                None => return Ok(()),
            }
        }
    }

    /// Send the local message's headers, choosing the body framing
    ///
    /// A client's first call emits the request line after acquiring the
    /// connection's request lock and entering the pipeline; a server emits
    /// the status line (reason phrase looked up from the numeric code)
    /// once at the head of the pipeline. With `end_stream` no body
    /// follows and the local half finishes immediately.
    pub fn write_headers(
        &self,
        headers: &Headers,
        end_stream: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let conn = self.connection()?;
        let inner = self.inner.lock().unwrap();

        if inner.state.local_finished() {
            return Err(Error::Closed);
        }
        if inner.body_write.is_some() {
            return Err(Error::InvalidState("headers already written"));
        }

        match self.role {
            Role::Client => {
                if inner.state != StreamState::Idle {
                    return Err(Error::InvalidState("client request already started"));
                }

                let method_str = headers
                    .get(":method")
                    .ok_or_else(|| Error::InvalidHeader(":method is required".to_string()))?;
                let method = Method::from_str(method_str)?;
                let target = if method == Method::Connect {
                    if headers.contains(":path") {
                        return Err(Error::InvalidHeader(
                            "CONNECT must not carry :path".to_string(),
                        ));
                    }
                    headers.get(":authority").ok_or_else(|| {
                        Error::InvalidHeader(":authority is required for CONNECT".to_string())
                    })?
                } else {
                    headers
                        .get(":path")
                        .ok_or_else(|| Error::InvalidHeader(":path is required".to_string()))?
                }
                .to_string();
                drop(inner);

                // One request on the wire at a time, in lock-acquisition
                // order; entering the pipeline fixes the response order.
                conn.acquire_request_lock(self.id, &deadline)?;
                conn.push_pipeline(self.id);

                {
                    let mut send = conn.send_buf();
                    send.write_request_line(
                        conn.session(),
                        method,
                        &target,
                        conn.version(),
                        &deadline,
                    )?;
                }

                let mut inner = self.inner.lock().unwrap();
                inner.req_method = Some(method);
                self.set_state(&mut inner, &conn, StreamState::Open);
                self.finish_write_headers(&conn, inner, headers, end_stream, &deadline)
            }
            Role::Server => {
                if inner.state == StreamState::Idle {
                    return Err(Error::InvalidState(
                        "server stream has not received a request",
                    ));
                }
                drop(inner);

                // Responses go out in pipeline order
                conn.wait_pipeline_head(self.id, &deadline)?;

                let status_str = headers
                    .get(":status")
                    .ok_or_else(|| Error::InvalidHeader(":status is required".to_string()))?;
                let code = status_str
                    .parse::<u16>()
                    .map_err(|_| Error::InvalidStatus(status_str.to_string()))?;
                let status = Status::new(code)?;

                let inner = self.inner.lock().unwrap();
                let version = inner.peer_version.unwrap_or_else(|| conn.version());
                drop(inner);
                {
                    let mut send = conn.send_buf();
                    send.write_status_line(
                        conn.session(),
                        version,
                        status,
                        status.reason_phrase(),
                        &deadline,
                    )?;
                }

                if status.is_informational() {
                    // Non-final response: no framing choice, no transition;
                    // the final response follows on this same stream.
                    self.emit_fields(&conn, headers, false, false, &deadline)?;
                    return Ok(());
                }

                let inner = self.inner.lock().unwrap();
                self.finish_write_headers(&conn, inner, headers, end_stream, &deadline)
            }
        }
    }

    /// Shared tail of `write_headers`: framing choice, field emission and
    /// terminal effects
    fn finish_write_headers(
        &self,
        conn: &Arc<Connection<S>>,
        mut inner: MutexGuard<'_, StreamInner>,
        headers: &Headers,
        end_stream: bool,
        deadline: &Deadline,
    ) -> Result<()> {
        let framing = choose_write_framing(
            headers,
            self.role,
            inner.req_method,
            inner.peer_version,
            end_stream,
        )?;
        inner.body_write = Some(framing.kind);
        inner.close_when_done = framing.close_when_done;

        let is_connect = inner.req_method == Some(Method::Connect);
        // A body-less client request on a kept-alive connection must say
        // so, or the server would wait for a body that never comes.
        let synthesize_empty_length = end_stream
            && self.role == Role::Client
            && inner.req_method != Some(Method::Head)
            && !framing.close_when_done
            && !headers.contains("content-length");
        drop(inner);

        self.emit_fields(conn, headers, is_connect, synthesize_empty_length, deadline)?;

        if end_stream {
            let mut inner = self.inner.lock().unwrap();
            if inner.close_when_done {
                let _ = conn.shutdown_write();
            }
            let next = if inner.state == StreamState::HalfClosedRemote {
                StreamState::Closed
            } else {
                StreamState::HalfClosedLocal
            };
            self.set_state(&mut inner, conn, next);
        }
        Ok(())
    }

    /// Emit the ordinary header fields and the terminator
    ///
    /// Pseudo-headers are suppressed, except that `:authority` becomes
    /// `Host` on non-CONNECT requests.
    fn emit_fields(
        &self,
        conn: &Arc<Connection<S>>,
        headers: &Headers,
        is_connect: bool,
        synthesize_empty_length: bool,
        deadline: &Deadline,
    ) -> Result<()> {
        let mut send = conn.send_buf();
        for (name, value) in headers.iter() {
            if name.starts_with(':') {
                if name == ":authority" && !is_connect {
                    send.write_header(conn.session(), "host", value, deadline)?;
                }
                continue;
            }
            send.write_header(conn.session(), name, value, deadline)?;
        }
        if synthesize_empty_length {
            send.write_header(conn.session(), "content-length", "0", deadline)?;
        }
        send.write_headers_done(conn.session(), deadline)
    }

    /// Send one chunk of the local message's body
    ///
    /// Requires headers to have been written and the role-appropriate
    /// ordering token to be held. With `end_stream` the local half
    /// finishes, shutting the write side down first when this exchange
    /// closes the connection.
    pub fn write_chunk(
        &self,
        chunk: &[u8],
        end_stream: bool,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let deadline = Deadline::after(timeout);
        let conn = self.connection()?;

        let kind = {
            let inner = self.inner.lock().unwrap();
            if !inner.state.can_send() {
                return Err(Error::InvalidState("stream is not writable"));
            }
            inner
                .body_write
                .ok_or(Error::InvalidState("headers not written"))?
        };

        match self.role {
            Role::Client => {
                if !conn.holds_request_lock(self.id) {
                    return Err(Error::InvalidState(
                        "client stream does not hold the request lock",
                    ));
                }
            }
            Role::Server => {
                if !conn.is_pipeline_head(self.id) {
                    return Err(Error::InvalidState(
                        "server stream is not at the head of the pipeline",
                    ));
                }
            }
        }

        match kind {
            BodyWriteKind::Chunked => {
                let mut send = conn.send_buf();
                if !chunk.is_empty() {
                    send.write_body_chunk(conn.session(), chunk, &deadline)?;
                }
                if end_stream {
                    // Zero-size chunk, then an empty trailer section
                    send.write_body_last_chunk(conn.session(), &deadline)?;
                    send.write_headers_done(conn.session(), &deadline)?;
                }
            }
            BodyWriteKind::Length(left) => {
                if (chunk.len() as u64) > left {
                    return Err(Error::InvalidState(
                        "body longer than the declared content-length",
                    ));
                }
                if end_stream && (chunk.len() as u64) != left {
                    return Err(Error::InvalidState(
                        "content-length not satisfied at end of stream",
                    ));
                }
                let mut send = conn.send_buf();
                send.write_body_plain(conn.session(), chunk, &deadline)?;
            }
            BodyWriteKind::Close => {
                let mut send = conn.send_buf();
                send.write_body_plain(conn.session(), chunk, &deadline)?;
            }
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(BodyWriteKind::Length(ref mut left)) = inner.body_write {
            *left -= chunk.len() as u64;
        }
        inner.stats_sent += chunk.len() as u64;

        if end_stream {
            if inner.close_when_done {
                let _ = conn.shutdown_write();
            }
            let next = if inner.state == StreamState::HalfClosedRemote {
                StreamState::Closed
            } else {
                StreamState::HalfClosedLocal
            };
            self.set_state(&mut inner, &conn, next);
        }
        Ok(())
    }

    /// Abandon the exchange, best effort
    ///
    /// Unread remote body is drained so the transport stays parseable for
    /// the next exchange. A server stream that received a full request but
    /// owes a response body fabricates a terminal one: zero-filled for
    /// length framing, a bare terminator for chunked. The stream always
    /// ends `Closed`, releasing whatever ordering tokens it still holds.
    pub fn shutdown(&self) {
        let conn = match self.connection.upgrade() {
            Some(conn) => conn,
            None => {
                let mut inner = self.inner.lock().unwrap();
                inner.state = StreamState::Closed;
                self.state_cond.notify_all();
                return;
            }
        };

        // Drain whatever the peer still has buffered for us
        loop {
            let state = self.state();
            if !matches!(state, StreamState::Open | StreamState::HalfClosedLocal) {
                break;
            }
            match self.get_next_chunk(Some(SHUTDOWN_GRACE)) {
                Ok(_) => continue,
                Err(_) => break,
            }
        }

        let owed = {
            let inner = self.inner.lock().unwrap();
            if self.role == Role::Server && inner.state == StreamState::HalfClosedRemote {
                inner.body_write
            } else {
                None
            }
        };
        match owed {
            Some(BodyWriteKind::Length(mut left)) => {
                let zeros = [0u8; BODY_READ_MAX];
                if left == 0 {
                    let _ = self.write_chunk(b"", true, Some(SHUTDOWN_GRACE));
                }
                while left > 0 {
                    let n = left.min(zeros.len() as u64) as usize;
                    if self
                        .write_chunk(&zeros[..n], left == n as u64, Some(SHUTDOWN_GRACE))
                        .is_err()
                    {
                        break;
                    }
                    left -= n as u64;
                }
            }
            Some(BodyWriteKind::Chunked) => {
                let _ = self.write_chunk(b"", true, Some(SHUTDOWN_GRACE));
            }
            // Close-delimited or no framing chosen: closing is the terminator
            Some(BodyWriteKind::Close) | None => {}
        }

        let mut inner = self.inner.lock().unwrap();
        self.set_state(&mut inner, &conn, StreamState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::Version;
    use crate::http::session::FdSessionOps;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn timeout() -> Option<Duration> {
        Some(Duration::from_secs(2))
    }

    fn client_conn_with_peer<F>(peer: F) -> Arc<Connection<FdSessionOps>>
    where
        F: FnOnce(TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            peer(stream);
        });

        let stream = TcpStream::connect(addr).unwrap();
        Connection::new(FdSessionOps::new(stream), Role::Client, Version::Http11)
    }

    #[test]
    fn test_client_get_headers_from_idle_is_invalid() {
        let conn = client_conn_with_peer(|_stream| {});
        let stream = conn.new_stream();

        let result = stream.get_headers(timeout());
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(stream.state(), StreamState::Idle);
    }

    #[test]
    fn test_write_chunk_before_headers_is_invalid() {
        let conn = client_conn_with_peer(|_stream| {});
        let stream = conn.new_stream();

        let result = stream.write_chunk(b"data", false, timeout());
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_client_missing_method_is_invalid() {
        let conn = client_conn_with_peer(|_stream| {});
        let stream = conn.new_stream();

        let mut headers = Headers::new();
        headers.insert(":path", "/");

        let result = stream.write_headers(&headers, true, timeout());
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
        assert_eq!(stream.state(), StreamState::Idle);
    }

    #[test]
    fn test_connect_with_path_is_invalid() {
        let conn = client_conn_with_peer(|_stream| {});
        let stream = conn.new_stream();

        let mut headers = Headers::new();
        headers.insert(":method", "CONNECT");
        headers.insert(":authority", "example.com:443");
        headers.insert(":path", "/");

        let result = stream.write_headers(&headers, false, timeout());
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }

    #[test]
    fn test_request_line_and_host_on_wire() {
        let conn = client_conn_with_peer(|mut stream| {
            let mut wire = Vec::new();
            let mut buf = [0u8; 1024];
            while !wire.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                wire.extend_from_slice(&buf[..n]);
            }
            let text = String::from_utf8(wire).unwrap();
            assert!(text.starts_with("GET /x HTTP/1.1\r\n"), "wire: {:?}", text);
            assert!(text.contains("host: example.com\r\n"), "wire: {:?}", text);
            assert!(text.contains("content-length: 0\r\n"), "wire: {:?}", text);
            assert!(!text.contains(":method"), "wire: {:?}", text);

            stream
                .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
                .unwrap();
        });

        let stream = conn.new_stream();
        let mut headers = Headers::new();
        headers.insert(":method", "GET");
        headers.insert(":path", "/x");
        headers.insert(":authority", "example.com");
        stream.write_headers(&headers, true, timeout()).unwrap();
        assert_eq!(stream.state(), StreamState::HalfClosedLocal);

        let resp = stream.get_headers(timeout()).unwrap();
        assert_eq!(resp.get(":status"), Some("204"));
    }

    #[test]
    fn test_second_write_headers_is_invalid() {
        let conn = client_conn_with_peer(|stream| {
            // Keep the socket open while the client writes
            thread::sleep(Duration::from_millis(200));
            drop(stream);
        });

        let stream = conn.new_stream();
        let mut headers = Headers::new();
        headers.insert(":method", "POST");
        headers.insert(":path", "/");
        headers.insert("content-length", "5");
        stream.write_headers(&headers, false, timeout()).unwrap();

        let result = stream.write_headers(&headers, false, timeout());
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_head_response_has_no_body() {
        let conn = client_conn_with_peer(|mut stream| {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 999\r\n\r\n")
                .unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let stream = conn.new_stream();
        let mut headers = Headers::new();
        headers.insert(":method", "HEAD");
        headers.insert(":path", "/x");
        stream.write_headers(&headers, true, timeout()).unwrap();

        let resp = stream.get_headers(timeout()).unwrap();
        assert_eq!(resp.get(":status"), Some("200"));
        assert_eq!(resp.get("content-length"), Some("999"));
        // Remote half finished right after headers despite the length
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(matches!(
            stream.get_next_chunk(timeout()),
            Err(Error::Closed)
        ));
    }

    #[test]
    fn test_get_headers_idempotent() {
        let conn = client_conn_with_peer(|mut stream| {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nX-Marker: once\r\n\r\n")
                .unwrap();
            thread::sleep(Duration::from_millis(200));
        });

        let stream = conn.new_stream();
        let mut headers = Headers::new();
        headers.insert(":method", "HEAD");
        headers.insert(":path", "/");
        stream.write_headers(&headers, true, timeout()).unwrap();

        let first = stream.get_headers(timeout()).unwrap();
        let second = stream.get_headers(timeout()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("x-marker"), Some("once"));
    }

    #[test]
    fn test_length_overrun_is_invalid() {
        let conn = client_conn_with_peer(|stream| {
            thread::sleep(Duration::from_millis(200));
            drop(stream);
        });

        let stream = conn.new_stream();
        let mut headers = Headers::new();
        headers.insert(":method", "POST");
        headers.insert(":path", "/");
        headers.insert("content-length", "4");
        stream.write_headers(&headers, false, timeout()).unwrap();

        let result = stream.write_chunk(b"too long", false, timeout());
        assert!(matches!(result, Err(Error::InvalidState(_))));

        let result = stream.write_chunk(b"ab", true, timeout());
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }
}
