//! Session operations abstraction
//!
//! This module provides the session operations pattern that allows
//! transparent switching between plain TCP and TLS transports, plus the
//! deadline bookkeeping shared by every blocking operation.
//!
//! Operations take `&self`: a pipelined connection has one stream reading
//! (the pipeline head) while another writes (the request-lock holder), so
//! the two halves must not contend for a single `&mut` borrow.

use super::{Error, Result};
use openssl::ssl::SslStream;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps: Send + Sync {
    /// Poll the session for readiness
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Shut down the write side of the session
    fn shutdown_write(&self) -> Result<()>;

    /// Close the session in both directions
    fn close(&self) -> Result<()>;

    /// Whether the transport is TLS-protected
    fn secure(&self) -> bool {
        false
    }
}

/// Poll a raw file descriptor for readiness
fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout.map(|d| d.as_millis() as i32).unwrap_or(-1); // -1 = infinite

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(result > 0)
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (&self.stream).read(buf).map_err(Error::from)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        (&self.stream).write(buf).map_err(Error::from)
    }

    fn shutdown_write(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Write).map_err(Error::from)
    }

    fn close(&self) -> Result<()> {
        self.stream.shutdown(Shutdown::Both).map_err(Error::from)
    }
}

/// TLS session operations over an established `SslStream`
///
/// The handshake happens elsewhere; this wrapper only carries the
/// encrypted byte stream so `:scheme` reports `https`. Reads and writes
/// serialize on an internal mutex because OpenSSL I/O needs exclusive
/// access; readiness polls go to the raw descriptor without the lock.
pub struct SslSessionOps {
    stream: Mutex<SslStream<TcpStream>>,
    fd: RawFd,
}

impl SslSessionOps {
    /// Wrap an established TLS session
    pub fn new(stream: SslStream<TcpStream>) -> Self {
        let fd = stream.get_ref().as_raw_fd();
        SslSessionOps {
            stream: Mutex::new(stream),
            fd,
        }
    }
}

impl SessionOps for SslSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        // Buffered TLS records satisfy a read without the socket being readable
        if events == PollEvents::Read && self.stream.lock().unwrap().ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.fd, events, timeout)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.stream.lock().unwrap().read(buf).map_err(Error::from)
    }

    fn write(&self, buf: &[u8]) -> Result<usize> {
        self.stream.lock().unwrap().write(buf).map_err(Error::from)
    }

    fn shutdown_write(&self) -> Result<()> {
        let mut stream = self.stream.lock().unwrap();
        let _ = stream.shutdown(); // close_notify is best-effort
        stream.get_ref().shutdown(Shutdown::Write).map_err(Error::from)
    }

    fn close(&self) -> Result<()> {
        let mut stream = self.stream.lock().unwrap();
        let _ = stream.shutdown();
        stream.get_ref().shutdown(Shutdown::Both).map_err(Error::from)
    }

    fn secure(&self) -> bool {
        true
    }
}

/// Deadline for a blocking operation
///
/// Computed once at operation entry; each I/O call and condvar wait gets
/// the residual. An exhausted deadline surfaces as `Error::Timeout`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now; `None` waits indefinitely
    pub fn after(timeout: Option<Duration>) -> Self {
        Deadline {
            at: timeout.map(|d| Instant::now() + d),
        }
    }

    /// Residual time, or `Error::Timeout` if the deadline has passed
    pub fn remaining(&self) -> Result<Option<Duration>> {
        match self.at {
            None => Ok(None),
            Some(at) => {
                let now = Instant::now();
                if now >= at {
                    Err(Error::Timeout)
                } else {
                    Ok(Some(at - now))
                }
            }
        }
    }
}
