//! One negotiated peer link: a transport plus its agreed wire format.

use std::io::{self, Read, Write};
use std::time::Duration;

use lrpc_proto::{
    Command, Error, HEADER_LEN, Header, NativeFormat, Result, Value, WireFormat, codec,
};

use crate::transport::Transport;

/// A transport together with the format negotiated on it.
///
/// Every I/O helper checks that the transport is still open and fails with
/// [`Error::Closed`] otherwise, before any byte is touched.
#[derive(Debug)]
pub struct Connection {
    /// The byte stream.
    transport: Box<dyn Transport>,
    /// This side's own format, advertised or reconciled against.
    native: NativeFormat,
    /// The format in effect.
    format: WireFormat,
}

impl Connection {
    /// Wraps a transport; the wire format starts out as `native`.
    pub fn new(transport: Box<dyn Transport>, native: NativeFormat) -> Self {
        Self {
            transport,
            native,
            format: native.into(),
        }
    }

    /// The format in effect for this connection.
    pub const fn format(&self) -> WireFormat {
        self.format
    }

    /// This side's native format.
    pub const fn native(&self) -> NativeFormat {
        self.native
    }

    /// Returns `false` once the transport has been closed.
    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    /// Closes the underlying transport.
    pub fn close(&mut self) {
        self.transport.close();
    }

    /// Borrows the transport, e.g. for readiness checks.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Returns `true` if a read would not block right now.
    pub fn readable_now(&mut self) -> Result<bool> {
        self.io()?.readable_now()
    }

    /// Bounds subsequent reads and writes.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        self.io()?.set_timeout(timeout)
    }

    /// The transport, or [`Error::Closed`].
    fn io(&mut self) -> Result<&mut dyn Transport> {
        if self.transport.is_open() {
            Ok(self.transport.as_mut())
        } else {
            Err(Error::Closed)
        }
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, b: u8) -> Result<()> {
        codec::write_u8(self.io()?, b)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8> {
        codec::read_u8(self.io()?)
    }

    /// Writes a `u32` in the negotiated byte order.
    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        let fmt = self.format;
        codec::write_u32(self.io()?, v, fmt)
    }

    /// Reads a `u32` in the negotiated byte order.
    pub fn read_u32(&mut self) -> Result<u32> {
        let fmt = self.format;
        codec::read_u32(self.io()?, fmt)
    }

    /// Writes a bare length-prefixed string.
    pub fn write_string(&mut self, s: &[u8]) -> Result<()> {
        let fmt = self.format;
        codec::write_string(self.io()?, s, fmt)
    }

    /// Reads a bare length-prefixed string.
    pub fn read_string(&mut self) -> Result<Vec<u8>> {
        let fmt = self.format;
        codec::read_string(self.io()?, fmt)
    }

    /// Writes a tagged value.
    pub fn write_value(&mut self, v: &Value) -> Result<()> {
        let fmt = self.format;
        codec::encode(self.io()?, v, fmt)
    }

    /// Reads a tagged value.
    pub fn read_value(&mut self) -> Result<Value> {
        let fmt = self.format;
        codec::decode(self.io()?, fmt)
    }

    /// Pushes buffered output to the peer.
    pub fn flush(&mut self) -> Result<()> {
        self.io()?.flush()?;
        Ok(())
    }

    /// Reads the byte that opens a request.
    ///
    /// A clean end of stream here means the peer hung up between requests
    /// and yields [`Error::Disconnected`] instead of [`Error::Eof`].
    pub fn read_command(&mut self) -> Result<u8> {
        let t = self.io()?;
        let mut buf = [0u8; 1];
        loop {
            match t.read(&mut buf) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(_) => return Ok(buf[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Client side of the handshake: advertise, then adopt the server's choice.
    ///
    /// A malformed or incompatible reply closes the transport.
    pub fn negotiate_client(&mut self) -> Result<()> {
        let header = self.native.header().encode();
        let t = self.io()?;
        codec::write_u8(t, Command::Connect.as_u8())?;
        t.write_all(&header)?;
        t.flush()?;

        let mut reply = [0u8; HEADER_LEN];
        t.read_exact(&mut reply)?;
        match Header::decode(&reply) {
            Ok(h) => {
                self.format = h.format();
                tracing::debug!(format = ?self.format, "negotiated wire format");
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Server side of the handshake, after the `CONNECT` byte was consumed.
    pub fn negotiate_server(&mut self) -> Result<()> {
        let t = self.io()?;
        let mut bytes = [0u8; HEADER_LEN];
        t.read_exact(&mut bytes)?;
        let peer = Header::decode(&bytes)?;

        let agreed = self.native.reconcile(&peer);
        let t = self.io()?;
        t.write_all(&agreed.header().encode())?;
        t.flush()?;
        self.format = agreed;
        tracing::debug!(format = ?agreed, "negotiated wire format");
        Ok(())
    }

    /// Runs the server handshake on a freshly accepted transport.
    ///
    /// The first byte must be `CONNECT`.
    pub fn accept_handshake(&mut self) -> Result<()> {
        let first = self.read_u8()?;
        if first != Command::Connect.as_u8() {
            return Err(Error::Header(format!(
                "expected CONNECT as first byte, got {first}"
            )));
        }
        self.negotiate_server()
    }
}
