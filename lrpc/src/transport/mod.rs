//! Byte-stream transports: TCP sockets and serial lines.
//!
//! A [`Transport`] is a blocking, exact-count byte pipe. Framing, byte
//! order and error classification live above it in [`Connection`].
//!
//! [`Connection`]: crate::Connection

use std::fmt;
use std::io::{Read, Write};
use std::os::fd::BorrowedFd;
use std::time::Duration;

use lrpc_proto::Result;

#[cfg(test)]
pub(crate) mod memory;
mod serial;
mod tcp;

pub use serial::SerialTransport;
pub use tcp::{Listener, TcpTransport};

/// A reliable, ordered byte stream to one peer.
pub trait Transport: Read + Write + Send + fmt::Debug {
    /// Returns `false` once [`close`](Self::close) has been called.
    fn is_open(&self) -> bool;

    /// Flushes pending output best-effort and releases the stream.
    fn close(&mut self);

    /// Returns `true` if a read would not block right now.
    fn readable_now(&mut self) -> Result<bool>;

    /// Returns `true` if bytes are already buffered in user space.
    ///
    /// `poll(2)` cannot see these, so the dispatch loop must not block
    /// while any worker reports buffered input.
    fn has_buffered(&self) -> bool {
        false
    }

    /// Bounds every subsequent read and write; `None` blocks indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Descriptor to wait on for readability, if the transport has one.
    fn poll_fd(&self) -> Option<BorrowedFd<'_>>;
}

/// Polls a single descriptor for input without blocking.
pub(crate) fn poll_readable(fd: BorrowedFd<'_>) -> Result<bool> {
    use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::ZERO) {
        Ok(n) => Ok(n > 0
            && fds[0]
                .revents()
                .is_some_and(|r| r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))),
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(e) => Err(std::io::Error::from(e).into()),
    }
}
