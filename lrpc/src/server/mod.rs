//! Multi-connection server: a listener, its workers and a readiness loop.
//!
//! Each cycle waits on the listener and every worker, serves one request
//! per ready worker, drops failed workers and finally accepts at most one
//! new connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lrpc_proto::{Error, NativeFormat, Result};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ErrorHandler;
use crate::host::Host;
use crate::transport::{Listener, poll_readable};

/// Per-request handling.
mod dispatch;
/// Worker bookkeeping.
mod registry;

pub use dispatch::{serve, serve_one};
use registry::Registry;

/// Readiness observed in one wait.
#[derive(Debug, Default)]
struct Readiness {
    /// A connection is pending.
    listener: bool,
    /// Per worker, in registry order.
    workers: Vec<bool>,
}

/// A TCP server exposing a [`Host`] to any number of clients.
pub struct Server<H> {
    /// `None` once closed.
    listener: Option<Listener>,
    /// Live workers.
    registry: Registry,
    /// The served application.
    host: H,
    /// Format reconciled against on accept.
    native: NativeFormat,
    /// Receives fatal worker errors; without one they stop the loop.
    on_error: Option<ErrorHandler>,
    /// Checked between cycles.
    stop: Arc<AtomicBool>,
}

impl<H: std::fmt::Debug> std::fmt::Debug for Server<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("listener", &self.listener)
            .field("workers", &self.registry.len())
            .field("host", &self.host)
            .field("native", &self.native)
            .field("stopped", &self.stop.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<H: Host> Server<H> {
    /// Binds a listener according to `config`.
    pub fn bind(config: &ServerConfig, host: H) -> Result<Self> {
        let mut listener = Listener::bind(config.address, config.port, config.backlog)?;
        listener.set_accept_timeout(config.communication_timeout);
        let server = Self {
            listener: Some(listener),
            registry: Registry::default(),
            host,
            native: config.native_format(),
            on_error: None,
            stop: Arc::new(AtomicBool::new(false)),
        };
        tracing::info!(addr = %server.local_addr()?, "listening");
        Ok(server)
    }

    /// The bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.as_ref().ok_or(Error::Closed)?.local_addr()
    }

    /// Routes fatal worker errors to `handler` instead of stopping the loop.
    pub fn on_error(&mut self, handler: impl FnMut(&Error) + Send + 'static) {
        self.on_error = Some(Box::new(handler));
    }

    /// A flag that stops [`run`](Self::run) once set, e.g. from a signal.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The served host.
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// Mutable access to the served host.
    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Number of live workers.
    pub fn workers(&self) -> usize {
        self.registry.len()
    }

    /// Returns `false` once the server has been closed.
    pub const fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    /// Returns `true` if a cycle would find work without blocking.
    ///
    /// Checks the listener for a pending connection and every worker for
    /// input, all without waiting.
    pub fn peek(&mut self) -> Result<bool> {
        let listener = self.listener.as_ref().ok_or(Error::Closed)?;
        if poll_readable(listener.as_fd())? {
            return Ok(true);
        }
        Ok(self.registry.any_readable())
    }

    /// Runs cycles until closed or stopped.
    pub fn run(&mut self) -> Result<()> {
        while self.is_open() && !self.stop.load(Ordering::Relaxed) {
            self.run_once()?;
        }
        self.close();
        Ok(())
    }

    /// Runs a single wait/serve/sweep/accept cycle.
    ///
    /// Returns an error only for a fatal worker error with no handler
    /// installed; the server is closed before returning it.
    pub fn run_once(&mut self) -> Result<()> {
        let ready = self.wait()?;

        let fatal = self.registry.serve_ready(&ready.workers, &mut self.host);
        for (id, e) in fatal {
            match self.on_error.as_mut() {
                Some(handler) => handler(&e),
                None => {
                    tracing::error!(worker = id, error = %e, "shutting down");
                    self.close();
                    return Err(e);
                }
            }
        }

        let removed = self.registry.sweep();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.registry.len(), "swept workers");
        }

        if ready.listener {
            self.accept();
        }
        Ok(())
    }

    /// Closes the listener and every worker.
    pub fn close(&mut self) {
        if self.listener.take().is_some() {
            tracing::info!("server closed");
        }
        self.registry.close_all();
    }

    /// Blocks until the listener or a worker is readable.
    ///
    /// An interrupted wait reports nothing ready so the caller re-checks
    /// the stop flag.
    fn wait(&self) -> Result<Readiness> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(Error::Closed);
        };
        let timeout = if self.registry.any_buffered() {
            PollTimeout::ZERO
        } else {
            PollTimeout::NONE
        };

        let mut fds = vec![PollFd::new(listener.as_fd(), PollFlags::POLLIN)];
        let mut slots = Vec::with_capacity(self.registry.len());
        for (i, w) in self.registry.iter().enumerate() {
            if let Some(fd) = w.poll_fd() {
                fds.push(PollFd::new(fd, PollFlags::POLLIN));
                slots.push(i);
            }
        }

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => {
                return Ok(Readiness {
                    listener: false,
                    workers: vec![false; self.registry.len()],
                });
            }
            Err(e) => return Err(io::Error::from(e).into()),
        }

        let hit = |p: &PollFd<'_>| {
            p.revents().is_some_and(|r| {
                r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })
        };
        let mut workers: Vec<bool> = self.registry.iter().map(|w| w.has_buffered()).collect();
        for (p, &i) in fds[1..].iter().zip(&slots) {
            workers[i] |= hit(p);
        }
        Ok(Readiness {
            listener: hit(&fds[0]),
            workers,
        })
    }

    /// Accepts and negotiates one pending connection.
    ///
    /// Failures discard the pending connection without affecting the loop.
    fn accept(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        let transport = match listener.accept() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return;
            }
        };
        let peer = transport.peer_addr().ok();
        let mut conn = Connection::new(Box::new(transport), self.native);
        match conn.accept_handshake() {
            Ok(()) => {
                let format = conn.format();
                let id = self.registry.insert(conn);
                tracing::info!(worker = id, ?peer, ?format, "client connected");
            }
            Err(e) => {
                tracing::debug!(?peer, error = %e, "handshake failed, dropping connection");
                conn.close();
            }
        }
    }
}

