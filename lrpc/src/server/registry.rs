//! The set of live worker connections.

use std::os::fd::BorrowedFd;

use lrpc_proto::{Error, Severity};

use super::dispatch::serve_one;
use crate::connection::Connection;
use crate::host::Host;

/// One negotiated client connection.
#[derive(Debug)]
pub(crate) struct Worker {
    /// Stable id for logs.
    id: u64,
    /// The negotiated connection.
    conn: Connection,
    /// Marked for removal at the next sweep.
    doomed: bool,
}

impl Worker {
    /// The descriptor to wait on, if the transport has one.
    pub(crate) fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.conn.transport().poll_fd()
    }

    /// Input already pulled off the descriptor.
    pub(crate) fn has_buffered(&self) -> bool {
        self.conn.transport().has_buffered()
    }
}

/// Workers in accept order.
///
/// Removal is two-phase: workers are marked while the service pass runs
/// and compacted afterwards, so indices stay stable within a cycle.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    /// Workers in accept order.
    workers: Vec<Worker>,
    /// Id given to the next insert.
    next_id: u64,
}

impl Registry {
    /// Adds a negotiated connection and returns its id.
    pub(crate) fn insert(&mut self, conn: Connection) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.workers.push(Worker {
            id,
            conn,
            doomed: false,
        });
        id
    }

    /// Number of workers, marked ones included.
    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Workers in accept order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.iter()
    }

    /// Returns `true` if any worker holds input `poll(2)` cannot see.
    pub(crate) fn any_buffered(&self) -> bool {
        self.workers.iter().any(Worker::has_buffered)
    }

    /// Returns `true` if any live worker has a request waiting.
    pub(crate) fn any_readable(&mut self) -> bool {
        self.workers.iter_mut().filter(|w| !w.doomed).any(|w| {
            w.has_buffered()
                || w.conn.readable_now().unwrap_or_else(|e| {
                    tracing::debug!(worker = w.id, error = %e, "readiness check failed");
                    false
                })
        })
    }

    /// Serves one request on every worker flagged in `ready`, in order.
    ///
    /// Failed workers are marked for removal. Fatal errors are handed
    /// back with the id of the worker that raised them.
    pub(crate) fn serve_ready<H: Host + ?Sized>(
        &mut self,
        ready: &[bool],
        host: &mut H,
    ) -> Vec<(u64, Error)> {
        let mut fatal = Vec::new();
        for (w, _) in self
            .workers
            .iter_mut()
            .zip(ready)
            .filter(|(w, r)| **r && !w.doomed)
        {
            let Err(e) = serve_one(&mut w.conn, host) else {
                continue;
            };
            w.doomed = true;
            match e.severity() {
                Severity::Done => tracing::info!(worker = w.id, "peer disconnected"),
                Severity::NonFatal => {
                    tracing::warn!(worker = w.id, error = %e, "dropping worker");
                }
                Severity::Fatal => {
                    tracing::error!(worker = w.id, error = %e, "fatal worker error");
                    fatal.push((w.id, e));
                }
            }
        }
        fatal
    }

    /// Closes and removes every marked worker; returns how many went.
    pub(crate) fn sweep(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain_mut(|w| {
            if w.doomed {
                w.conn.close();
            }
            !w.doomed
        });
        before - self.workers.len()
    }

    /// Closes and removes every worker.
    pub(crate) fn close_all(&mut self) {
        for w in &mut self.workers {
            w.conn.close();
        }
        self.workers.clear();
    }
}
