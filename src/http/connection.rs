//! Connection-level coordination
//!
//! A `Connection` owns the transport and the pipeline: the FIFO of active
//! streams plus the request lock. At most one stream at a time holds the
//! request lock (a client writing its request, a server reading one), and
//! the stream at the head of the FIFO is the only stream permitted to
//! perform order-sensitive socket I/O. Both constraints share a single
//! wake condition, `req_cond`, signalled whenever the lock is released or
//! the FIFO head changes.

use super::codec::{RecvBuf, SendBuf};
use super::message::Version;
use super::session::{Deadline, SessionOps};
use super::stream::Stream;
use super::{Error, Result};
use log::trace;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// Endpoint role, inherited by every stream of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Pipeline state: issue-ordered FIFO of stream ids plus the request lock
struct Pipeline {
    fifo: VecDeque<u64>,
    req_locked: Option<u64>,
}

/// A shared transport carrying pipelined HTTP/1.x exchanges
///
/// The connection outlives its streams: streams hold a weak back-reference
/// and an operation on a stream whose connection is gone fails `Closed`.
pub struct Connection<S: SessionOps> {
    session: S,
    role: Role,
    version: Version,
    pipeline: Mutex<Pipeline>,
    req_cond: Condvar,
    recv: Mutex<RecvBuf>,
    send: Mutex<SendBuf>,
    send_eof: AtomicBool,
    next_stream_id: AtomicU64,
}

impl<S: SessionOps> Connection<S> {
    /// Create a connection over an established transport
    ///
    /// `version` is the HTTP version this side advertises in request
    /// lines; the peer's version is sampled per stream from the first
    /// line it sends.
    pub fn new(session: S, role: Role, version: Version) -> Arc<Self> {
        Arc::new(Connection {
            session,
            role,
            version,
            pipeline: Mutex::new(Pipeline {
                fifo: VecDeque::new(),
                req_locked: None,
            }),
            req_cond: Condvar::new(),
            recv: Mutex::new(RecvBuf::new()),
            send: Mutex::new(SendBuf::new()),
            send_eof: AtomicBool::new(false),
            next_stream_id: AtomicU64::new(1),
        })
    }

    /// Create a new idle stream on this connection
    pub fn new_stream(self: &Arc<Self>) -> Arc<Stream<S>> {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        Stream::new(Arc::downgrade(self), self.role, id)
    }

    /// This side's role
    pub fn role(&self) -> Role {
        self.role
    }

    /// The HTTP version this side advertises
    pub fn version(&self) -> Version {
        self.version
    }

    /// URI scheme implied by the transport
    pub fn scheme(&self) -> &'static str {
        if self.session.secure() {
            "https"
        } else {
            "http"
        }
    }

    pub(crate) fn session(&self) -> &S {
        &self.session
    }

    pub(crate) fn recv_buf(&self) -> MutexGuard<'_, RecvBuf> {
        self.recv.lock().unwrap()
    }

    pub(crate) fn send_buf(&self) -> MutexGuard<'_, SendBuf> {
        self.send.lock().unwrap()
    }

    /// Whether the write side has been shut down
    pub(crate) fn send_is_eof(&self) -> bool {
        self.send_eof.load(Ordering::SeqCst)
    }

    /// Shut down the write side of the transport
    pub(crate) fn shutdown_write(&self) -> Result<()> {
        self.send_eof.store(true, Ordering::SeqCst);
        // Wake lock waiters so they observe the EOF; notifying under the
        // pipeline mutex closes the race with a waiter about to block.
        let guard = self.pipeline.lock().unwrap();
        self.req_cond.notify_all();
        drop(guard);
        self.session.shutdown_write()
    }

    /// Close the transport in both directions
    pub fn close(&self) -> Result<()> {
        self.send_eof.store(true, Ordering::SeqCst);
        let guard = self.pipeline.lock().unwrap();
        self.req_cond.notify_all();
        drop(guard);
        self.session.close()
    }

    fn wait_req_cond<'a>(
        &self,
        guard: MutexGuard<'a, Pipeline>,
        deadline: &Deadline,
    ) -> Result<MutexGuard<'a, Pipeline>> {
        match deadline.remaining()? {
            None => Ok(self.req_cond.wait(guard).unwrap()),
            Some(residual) => {
                let (guard, _) = self.req_cond.wait_timeout(guard, residual).unwrap();
                Ok(guard)
            }
        }
    }

    /// Acquire the request lock for stream `id`, waiting up to the
    /// deadline
    ///
    /// Fails `Closed` once the write side is shut down, `Timeout` if the
    /// deadline passes first. Re-acquisition by the current holder is a
    /// no-op.
    pub(crate) fn acquire_request_lock(&self, id: u64, deadline: &Deadline) -> Result<()> {
        let mut pipeline = self.pipeline.lock().unwrap();
        loop {
            if self.send_is_eof() {
                return Err(Error::Closed);
            }
            match pipeline.req_locked {
                None => {
                    pipeline.req_locked = Some(id);
                    trace!("stream {} acquired request lock", id);
                    return Ok(());
                }
                Some(holder) if holder == id => return Ok(()),
                Some(_) => {
                    pipeline = self.wait_req_cond(pipeline, deadline)?;
                }
            }
        }
    }

    /// Release the request lock if stream `id` holds it
    pub(crate) fn release_request_lock(&self, id: u64) {
        let mut pipeline = self.pipeline.lock().unwrap();
        if pipeline.req_locked == Some(id) {
            pipeline.req_locked = None;
            trace!("stream {} released request lock", id);
            self.req_cond.notify_all();
        }
    }

    /// Whether stream `id` currently holds the request lock
    pub(crate) fn holds_request_lock(&self, id: u64) -> bool {
        self.pipeline.lock().unwrap().req_locked == Some(id)
    }

    /// Append stream `id` to the pipeline FIFO
    ///
    /// Idempotent: a retried operation that already queued the stream
    /// must not enqueue it twice.
    pub(crate) fn push_pipeline(&self, id: u64) {
        let mut pipeline = self.pipeline.lock().unwrap();
        if !pipeline.fifo.contains(&id) {
            pipeline.fifo.push_back(id);
            trace!("stream {} entered pipeline (depth {})", id, pipeline.fifo.len());
        }
    }

    /// Whether stream `id` is at the head of the pipeline
    pub(crate) fn is_pipeline_head(&self, id: u64) -> bool {
        self.pipeline.lock().unwrap().fifo.front() == Some(&id)
    }

    /// Wait until stream `id` reaches the head of the pipeline
    pub(crate) fn wait_pipeline_head(&self, id: u64, deadline: &Deadline) -> Result<()> {
        let mut pipeline = self.pipeline.lock().unwrap();
        loop {
            if pipeline.fifo.front().copied() == Some(id) {
                return Ok(());
            }
            if !pipeline.fifo.contains(&id) {
                return Err(Error::InvalidState("stream is not in the pipeline"));
            }
            pipeline = self.wait_req_cond(pipeline, deadline)?;
        }
    }

    /// Remove stream `id` from the pipeline, waking the next head
    pub(crate) fn remove_pipeline(&self, id: u64) {
        let mut pipeline = self.pipeline.lock().unwrap();
        let before = pipeline.fifo.len();
        pipeline.fifo.retain(|&queued| queued != id);
        if pipeline.fifo.len() != before {
            trace!("stream {} left pipeline (depth {})", id, pipeline.fifo.len());
            self.req_cond.notify_all();
        }
    }
}
