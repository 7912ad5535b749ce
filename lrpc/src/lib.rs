//! Remote procedure calls between peers over TCP or serial lines.
//!
//! `lrpc` lets a client call functions, read values and assign values that
//! live in a server's namespace. Both sides agree on byte order and number
//! representation once per connection; after that every request is a short
//! command/`READY`/payload/reply exchange (see [`lrpc_proto`]).
//!
//! # Serving
//!
//! ```no_run
//! use lrpc::{Namespace, Server, ServerConfig, Value};
//!
//! let mut ns = Namespace::new();
//! ns.register("add", |args| {
//!     Ok(vec![Value::from(args.iter().filter_map(Value::as_f64).sum::<f64>())])
//! });
//! let mut server = Server::bind(&ServerConfig::default().port(12346), ns)?;
//! server.run()?;
//! # Ok::<(), lrpc::Error>(())
//! ```
//!
//! # Calling
//!
//! ```no_run
//! use lrpc::{ClientConfig, Handle, Value};
//!
//! let h = Handle::connect("127.0.0.1:12346", ClientConfig::default())?;
//! let out = h.index("add")?.call(&[Value::from(1), Value::from(2)])?;
//! assert_eq!(out, vec![Value::from(3)]);
//! # Ok::<(), lrpc::Error>(())
//! ```

#[cfg(unix)]
mod client;
mod config;
#[cfg(unix)]
mod connection;
mod error;
mod host;
mod namespace;
#[cfg(unix)]
mod server;
#[cfg(unix)]
pub mod transport;

#[cfg(unix)]
pub use client::{Handle, Proxy};
pub use config::{ClientConfig, DEFAULT_MAX_NAME_LEN, DEFAULT_PORT, ServerConfig};
#[cfg(unix)]
pub use connection::Connection;
pub use error::{Error, ErrorHandler, Result, Severity};
pub use host::{Host, HostError, RUNTIME_ERROR};
pub use lrpc_proto::{NativeFormat, NumberKind, RemotePath, Value, WireFormat};
pub use namespace::{NativeFn, Namespace};
#[cfg(unix)]
pub use server::{Server, serve, serve_one};
