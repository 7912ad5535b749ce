//! Client handles and lazily built remote paths.
//!
//! A [`Handle`] owns one negotiated connection. Indexing it yields
//! [`Proxy`] values that only record a path; I/O happens when a proxy is
//! called, read or assigned through.
//!
//! ```no_run
//! use lrpc::{ClientConfig, Handle, Value};
//!
//! let handle = Handle::connect("127.0.0.1:12346", ClientConfig::default())?;
//! let sum = handle.index("add")?.call(&[Value::from(3), Value::from(4)])?;
//! println!("{sum:?}");
//! let max = handle.index("math")?.index("max")?;
//! max.call(&[Value::from(1), Value::from(9)])?;
//! handle.index("config")?.set("debug", true)?;
//! # Ok::<(), lrpc::Error>(())
//! ```

use std::cell::RefCell;
use std::fmt;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::rc::Rc;

use lrpc_proto::{Command, RemotePath, Status, Value, WireFormat, check_segment};

use crate::config::ClientConfig;
use crate::connection::Connection;
use crate::error::{Error, ErrorHandler, Result};
use crate::transport::{SerialTransport, TcpTransport, Transport};

/// A client connection to one server.
pub struct Handle {
    /// The negotiated connection.
    conn: RefCell<Connection>,
    /// Settings used for every exchange and for reconnects.
    config: ClientConfig,
    /// Receives failures instead of the caller when set.
    on_error: RefCell<Option<ErrorHandler>>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("conn", &self.conn)
            .field("config", &self.config)
            .field("on_error", &self.on_error.borrow().is_some())
            .finish()
    }
}

impl Handle {
    /// Connects over TCP and negotiates the wire format.
    ///
    /// The connect attempt is bounded by the configured wait timeout.
    pub fn connect(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        let transport = TcpTransport::connect(addr, config.wait_timeout)?;
        Self::from_transport(Box::new(transport), config)
    }

    /// Opens a serial device and negotiates the wire format.
    pub fn open_serial(path: impl AsRef<Path>, baud: u32, config: ClientConfig) -> Result<Self> {
        let transport = SerialTransport::open(path, baud, config.communication_timeout)?;
        Self::from_transport(Box::new(transport), config)
    }

    /// Negotiates over an already open transport.
    pub fn from_transport(transport: Box<dyn Transport>, config: ClientConfig) -> Result<Self> {
        let mut conn = Connection::new(transport, config.native_format());
        conn.set_timeout(config.communication_timeout)?;
        if let Err(e) = conn.negotiate_client() {
            conn.close();
            return Err(e);
        }
        tracing::info!(format = ?conn.format(), "connected");
        Ok(Self {
            conn: RefCell::new(conn),
            config,
            on_error: RefCell::new(None),
        })
    }

    /// Delivers failures to `handler`; operations then return empty results.
    pub fn on_error(&self, handler: impl FnMut(&Error) + Send + 'static) {
        *self.on_error.borrow_mut() = Some(Box::new(handler));
    }

    /// Removes the error handler; failures are returned again.
    pub fn clear_error_handler(&self) {
        *self.on_error.borrow_mut() = None;
    }

    /// The settings this handle was created with.
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The negotiated wire format.
    pub fn format(&self) -> WireFormat {
        self.conn.borrow().format()
    }

    /// Returns `false` once the connection was closed.
    pub fn is_open(&self) -> bool {
        self.conn.borrow().is_open()
    }

    /// Closes the connection; later operations fail with [`Error::Closed`].
    pub fn close(&self) {
        self.conn.borrow_mut().close();
    }

    /// Renegotiates the wire format on the open connection.
    pub fn reconnect(&self) -> Result<()> {
        let r = self.conn.borrow_mut().negotiate_client();
        self.finish(r)
    }

    /// Starts a path at the global `name`. No I/O happens.
    pub fn index(&self, name: &str) -> Result<Proxy<'_>> {
        check_segment(name, self.config.max_name_len)?;
        Ok(Proxy {
            handle: self,
            link: Rc::new(Link {
                name: name.to_owned(),
                parent: None,
            }),
        })
    }

    /// Assigns the global `key`.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.set_path(&RemotePath::root(), &key.into(), &value.into())
    }

    /// Calls the function at `path`.
    pub fn call_path(&self, path: &RemotePath, args: &[Value]) -> Result<Vec<Value>> {
        let r = self.checked(path).and_then(|()| {
            let mut conn = self.conn.borrow_mut();
            call(&mut conn, &self.config, path, args)
        });
        self.finish(r)
    }

    /// Reads the value at `path`.
    pub fn get_path(&self, path: &RemotePath) -> Result<Value> {
        let r = self.checked(path).and_then(|()| {
            let mut conn = self.conn.borrow_mut();
            get(&mut conn, path)
        });
        self.finish(r)
    }

    /// Stores `value` under `key` in the table at `path`.
    pub fn set_path(&self, path: &RemotePath, key: &Value, value: &Value) -> Result<()> {
        let r = self.checked(path).and_then(|()| {
            let mut conn = self.conn.borrow_mut();
            set(&mut conn, path, key, value)
        });
        self.finish(r)
    }

    /// Rejects paths with an overlong segment.
    fn checked(&self, path: &RemotePath) -> Result<()> {
        path.check(self.config.max_name_len)
    }

    /// Applies the error policy: fatal errors and timeouts close the
    /// connection, and an installed handler swallows the error.
    fn finish<T: Default>(&self, r: Result<T>) -> Result<T> {
        let e = match r {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if e.is_fatal() || matches!(e, Error::Timeout) {
            tracing::warn!(error = %e, "closing connection");
            self.conn.borrow_mut().close();
        }
        match self.on_error.borrow_mut().as_mut() {
            Some(handler) => {
                handler(&e);
                Ok(T::default())
            }
            None => Err(e),
        }
    }
}

/// Sends a command byte and waits for `READY`.
fn start(conn: &mut Connection, cmd: Command) -> Result<()> {
    conn.write_u8(cmd.as_u8())?;
    conn.flush()?;
    match conn.read_u8()? {
        b if b == Status::Ready.as_u8() => Ok(()),
        b if b == Status::UnsupportedCommand.as_u8() => Err(Error::protocol(format!(
            "server does not support {cmd:?}"
        ))),
        b => Err(Error::protocol(format!("expected READY, got {b}"))),
    }
}

/// Reads the code and message that follow a failure status.
fn read_remote_error(conn: &mut Connection) -> Error {
    let code = match conn.read_u32() {
        Ok(c) => c,
        Err(e) => return e,
    };
    match conn.read_string() {
        Ok(msg) => Error::Remote {
            code,
            message: String::from_utf8_lossy(&msg).into_owned(),
        },
        Err(e) => e,
    }
}

/// Runs a CALL exchange; the status byte is awaited with the wait timeout.
fn call(
    conn: &mut Connection,
    config: &ClientConfig,
    path: &RemotePath,
    args: &[Value],
) -> Result<Vec<Value>> {
    let argc = u32::try_from(args.len()).map_err(|_| Error::protocol("too many arguments"))?;
    tracing::debug!(%path, argc, "call");
    start(conn, Command::Call)?;
    conn.write_string(path.to_string().as_bytes())?;
    conn.write_u32(argc)?;
    for a in args {
        conn.write_value(a)?;
    }
    conn.flush()?;

    conn.set_timeout(config.wait_timeout)?;
    let status = conn.read_u8();
    conn.set_timeout(config.communication_timeout)?;
    match status? {
        0 => {
            let n = conn.read_u32()?;
            (0..n).map(|_| conn.read_value()).collect()
        }
        1 => Err(read_remote_error(conn)),
        other => Err(Error::protocol(format!("unexpected call status {other}"))),
    }
}

/// Runs a GET exchange.
fn get(conn: &mut Connection, path: &RemotePath) -> Result<Value> {
    tracing::debug!(%path, "get");
    start(conn, Command::Get)?;
    conn.write_string(path.to_string().as_bytes())?;
    conn.flush()?;
    conn.read_value()
}

/// Runs a SET exchange.
fn set(conn: &mut Connection, path: &RemotePath, key: &Value, value: &Value) -> Result<()> {
    tracing::debug!(%path, %key, "set");
    start(conn, Command::Set)?;
    conn.write_string(path.to_string().as_bytes())?;
    conn.write_value(key)?;
    conn.write_value(value)?;
    conn.flush()?;
    match conn.read_u8()? {
        0 => Ok(()),
        1 => Err(read_remote_error(conn)),
        other => Err(Error::protocol(format!("unexpected set status {other}"))),
    }
}

/// One segment of a proxy path.
#[derive(Debug)]
struct Link {
    /// The segment.
    name: String,
    /// The preceding segment; `None` at a global.
    parent: Option<Rc<Link>>,
}

impl Link {
    /// Joins every segment from the root down to this one.
    fn path(&self) -> RemotePath {
        let mut names = vec![self.name.as_str()];
        let mut cur = self.parent.as_deref();
        while let Some(l) = cur {
            names.push(&l.name);
            cur = l.parent.as_deref();
        }
        names.reverse();
        RemotePath::parse(&names.join("."))
    }
}

/// A path into the server's namespace, bound to a [`Handle`].
///
/// Proxies share their ancestors, so building `a.b.c` and `a.b.d` keeps a
/// single `a.b` prefix alive.
#[derive(Debug, Clone)]
pub struct Proxy<'h> {
    /// The handle requests go through.
    handle: &'h Handle,
    /// The last segment of this path.
    link: Rc<Link>,
}

impl<'h> Proxy<'h> {
    /// Extends the path by `name`. No I/O happens.
    pub fn index(&self, name: &str) -> Result<Self> {
        check_segment(name, self.handle.config.max_name_len)?;
        Ok(Self {
            handle: self.handle,
            link: Rc::new(Link {
                name: name.to_owned(),
                parent: Some(Rc::clone(&self.link)),
            }),
        })
    }

    /// The last segment.
    pub fn name(&self) -> &str {
        &self.link.name
    }

    /// The full path.
    pub fn path(&self) -> RemotePath {
        self.link.path()
    }

    /// The handle this proxy talks through.
    pub const fn handle(&self) -> &'h Handle {
        self.handle
    }

    /// Calls the function at this path.
    ///
    /// A trailing `get` segment reads the parent instead, so `x.get()`
    /// style call sites fetch `x` by value.
    pub fn call(&self, args: &[Value]) -> Result<Vec<Value>> {
        if self.link.name == "get" {
            if let Some(parent) = &self.link.parent {
                return self.handle.get_path(&parent.path()).map(|v| vec![v]);
            }
        }
        self.handle.call_path(&self.path(), args)
    }

    /// Reads the value at this path.
    pub fn get(&self) -> Result<Value> {
        self.handle.get_path(&self.path())
    }

    /// Stores `value` under `key` in the table at this path.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Result<()> {
        self.handle.set_path(&self.path(), &key.into(), &value.into())
    }

    /// A reference the server resolves in its own namespace when passed as
    /// an argument.
    pub fn to_value(&self) -> Value {
        Value::Remote(self.path().to_string())
    }
}

impl From<&Proxy<'_>> for Value {
    fn from(p: &Proxy<'_>) -> Self {
        p.to_value()
    }
}
