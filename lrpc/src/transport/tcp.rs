//! TCP client transport and listener.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::{AsFd, BorrowedFd};
use std::time::Duration;

use lrpc_proto::{Error, Result};
use nix::sys::socket::{Backlog, listen};

use super::{Transport, poll_readable};

/// A buffered TCP stream with `TCP_NODELAY` set.
#[derive(Debug)]
pub struct TcpTransport {
    /// Read half.
    reader: BufReader<TcpStream>,
    /// Write half, a clone of the same socket.
    writer: BufWriter<TcpStream>,
    /// Cleared by `close`.
    open: bool,
}

impl TcpTransport {
    /// Connects to the first reachable address of `addr`.
    ///
    /// `timeout` bounds each connection attempt; `None` uses the OS default.
    pub fn connect(addr: impl ToSocketAddrs, timeout: Option<Duration>) -> Result<Self> {
        let mut last = None;
        for sa in addr.to_socket_addrs()? {
            let attempt = match timeout.filter(|t| !t.is_zero()) {
                Some(t) => TcpStream::connect_timeout(&sa, t),
                None => TcpStream::connect(sa),
            };
            match attempt {
                Ok(stream) => return Self::from_stream(stream),
                Err(e) => last = Some(e),
            }
        }
        Err(last.map_or_else(
            || Error::Io(io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")),
            Error::from,
        ))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let write_half = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer: BufWriter::new(write_half),
            open: true,
        })
    }

    /// Address of the remote peer.
    pub fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.reader.get_ref().peer_addr()?)
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Transport for TcpTransport {
    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let _ = self.writer.flush();
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }

    fn readable_now(&mut self) -> Result<bool> {
        if self.has_buffered() {
            return Ok(true);
        }
        poll_readable(self.reader.get_ref().as_fd())
    }

    fn has_buffered(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        // std rejects a zero duration.
        let timeout = timeout.filter(|t| !t.is_zero());
        let stream = self.reader.get_ref();
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        Ok(())
    }

    fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        Some(self.reader.get_ref().as_fd())
    }
}

/// A listening TCP socket that yields [`TcpTransport`]s.
#[derive(Debug)]
pub struct Listener {
    /// The bound socket.
    inner: TcpListener,
    /// Applied to accepted transports.
    timeout: Option<Duration>,
}

impl Listener {
    /// Binds `address:port` and starts listening with the given backlog.
    pub fn bind(address: IpAddr, port: u16, backlog: i32) -> Result<Self> {
        let inner = TcpListener::bind((address, port))?;
        // Re-listen to apply the requested backlog instead of std's default.
        let backlog = Backlog::new(backlog).map_err(io::Error::from)?;
        listen(&inner, backlog).map_err(io::Error::from)?;
        Ok(Self {
            inner,
            timeout: None,
        })
    }

    /// Timeout applied to every accepted transport.
    pub fn set_accept_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Blocks until a peer connects.
    pub fn accept(&self) -> Result<TcpTransport> {
        let (stream, peer) = self.inner.accept()?;
        tracing::debug!(%peer, "accepted connection");
        let mut transport = TcpTransport::from_stream(stream)?;
        transport.set_timeout(self.timeout)?;
        Ok(transport)
    }

    /// The bound address; useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// Descriptor for readiness polling.
    pub fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    #[test]
    fn connect_accept_exchange() {
        let listener = Listener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 4).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpTransport::connect(addr, Some(Duration::from_secs(2))).unwrap();
        let mut server = listener.accept().unwrap();

        assert!(!server.readable_now().unwrap());
        client.write_all(b"ping").unwrap();
        client.flush().unwrap();

        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        assert!(!server.has_buffered());
    }

    #[test]
    fn pipelined_bytes_are_reported_as_buffered() {
        let listener = Listener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 4).unwrap();
        let mut client = TcpTransport::connect(listener.local_addr().unwrap(), None).unwrap();
        let mut server = listener.accept().unwrap();

        client.write_all(&[1, 2]).unwrap();
        client.flush().unwrap();
        let mut one = [0u8; 1];
        server.read_exact(&mut one).unwrap();
        // The second byte may only sit in the BufReader now.
        let mut rest = [0u8; 1];
        if server.has_buffered() {
            assert!(server.readable_now().unwrap());
        }
        server.read_exact(&mut rest).unwrap();
        assert_eq!(rest, [2]);
    }

    #[test]
    fn close_is_idempotent() {
        let listener = Listener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0, 4).unwrap();
        let mut client = TcpTransport::connect(listener.local_addr().unwrap(), None).unwrap();
        client.close();
        client.close();
        assert!(!client.is_open());
    }
}
