//! In-memory transport for unit tests: scripted input, recorded output.

use std::io::{self, Cursor, Read, Write};
use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lrpc_proto::Result;

use super::Transport;

/// Reads from a fixed script and records everything written.
#[derive(Debug)]
pub(crate) struct MemoryTransport {
    /// Bytes served to reads.
    input: Cursor<Vec<u8>>,
    /// Everything written, shared with the test.
    output: Arc<Mutex<Vec<u8>>>,
    /// Cleared by `close`.
    open: bool,
}

impl MemoryTransport {
    /// Returns the transport and a shared view of its output.
    pub(crate) fn new(input: Vec<u8>) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let t = Self {
            input: Cursor::new(input),
            output: Arc::clone(&output),
            open: true,
        };
        (t, output)
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output
            .lock()
            .map_err(|_| io::Error::other("output poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn readable_now(&mut self) -> Result<bool> {
        Ok(self.has_buffered())
    }

    fn has_buffered(&self) -> bool {
        (self.input.position() as usize) < self.input.get_ref().len()
    }

    fn set_timeout(&mut self, _timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        None
    }
}
