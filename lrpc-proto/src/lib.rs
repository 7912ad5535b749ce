//! Wire protocol for lrpc peer↔peer communication.
//!
//! Values are written as a one-byte type tag followed by a payload whose
//! byte order and numeric width are agreed per connection during a short
//! handshake (see [`Header`]). Everything here works over plain
//! [`std::io::Read`] / [`std::io::Write`] streams; sockets and serial lines
//! live in the `lrpc` crate.

pub mod codec;
mod command;
mod error;
mod format;
mod path;
mod value;

pub use command::{Command, Status, Tag};
pub use error::{Error, Result, Severity};
pub use format::{HEADER_LEN, Header, MAGIC, NativeFormat, NumberKind, PROTOCOL_VERSION, WireFormat};
pub use path::{RemotePath, check_segment};
pub use value::{Number, Value};
