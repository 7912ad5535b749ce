//! Serial line transport.

#![allow(unsafe_code)]

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::path::Path;
use std::time::Duration;

use lrpc_proto::{Error, Result};
use serialport::{SerialPort, TTYPort};

use super::Transport;

/// Stand-in for "no timeout"; the driver needs a finite bound.
const FOREVER: Duration = Duration::from_secs(24 * 60 * 60);

/// A raw serial device (e.g. `/dev/ttyUSB0`).
#[derive(Debug)]
pub struct SerialTransport {
    /// The open device; `None` once closed.
    port: Option<TTYPort>,
}

impl SerialTransport {
    /// Opens `path` at `baud` with 8N1 framing and no flow control.
    pub fn open(path: impl AsRef<Path>, baud: u32, timeout: Option<Duration>) -> Result<Self> {
        let path = path.as_ref().to_string_lossy();
        let port = serialport::new(path.as_ref(), baud)
            .timeout(timeout.unwrap_or(FOREVER))
            .open_native()
            .map_err(io::Error::from)?;
        tracing::info!(device = %path, baud, "opened serial port");
        Ok(Self { port: Some(port) })
    }

    /// The open device, or `NotConnected` once closed.
    fn port(&mut self) -> io::Result<&mut TTYPort> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port()?.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port()?.flush()
    }
}

impl Transport for SerialTransport {
    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Flushes and drops the device, releasing its descriptor.
    fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            let _ = port.flush();
            tracing::debug!("closed serial port");
        }
    }

    fn readable_now(&mut self) -> Result<bool> {
        let port = self.port.as_ref().ok_or(Error::Closed)?;
        let pending = port.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending > 0)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.port
            .as_mut()
            .ok_or(Error::Closed)?
            .set_timeout(timeout.unwrap_or(FOREVER))
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        let port = self.port.as_ref()?;
        // SAFETY: the descriptor is owned by `port`, which outlives the borrow.
        Some(unsafe { BorrowedFd::borrow_raw(port.as_raw_fd()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A pseudo-terminal pair stands in for a device.
    fn pair() -> (SerialTransport, TTYPort) {
        let (master, slave) = TTYPort::pair().unwrap();
        (SerialTransport { port: Some(master) }, slave)
    }

    #[test]
    fn close_releases_the_port() {
        let (mut t, _slave) = pair();
        assert!(t.is_open());
        assert!(t.poll_fd().is_some());

        t.close();
        assert!(!t.is_open());
        assert!(t.poll_fd().is_none());
        assert!(matches!(t.readable_now(), Err(Error::Closed)));
        assert!(matches!(t.set_timeout(None), Err(Error::Closed)));
        let err = t.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        // Closing twice is harmless.
        t.close();
        assert!(!t.is_open());
    }

    #[test]
    fn reads_what_the_peer_writes() {
        let (mut t, mut slave) = pair();
        t.set_timeout(Some(Duration::from_secs(2))).unwrap();
        assert!(!t.readable_now().unwrap());
        slave.write_all(b"ok").unwrap();
        slave.flush().unwrap();

        let mut buf = [0u8; 2];
        t.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ok");
    }
}
