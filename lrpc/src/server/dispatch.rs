//! Server side of one command exchange.

use lrpc_proto::{Command, Error, RemotePath, Result, Severity, Status, Value};

use crate::connection::Connection;
use crate::host::Host;

/// Serves exactly one request from `conn`.
///
/// Host failures are reported to the peer and leave the connection usable.
/// Protocol and transport failures are returned for the caller to classify.
pub fn serve_one<H: Host + ?Sized>(conn: &mut Connection, host: &mut H) -> Result<()> {
    let byte = conn.read_command()?;
    match Command::from_u8(byte) {
        Some(Command::Call) => {
            ready(conn)?;
            serve_call(conn, host)?;
        }
        Some(Command::Get) => {
            ready(conn)?;
            serve_get(conn, host)?;
        }
        Some(Command::Set) => {
            ready(conn)?;
            serve_set(conn, host)?;
        }
        Some(Command::Connect) => conn.negotiate_server()?,
        None => {
            conn.write_u8(Status::UnsupportedCommand.as_u8())?;
            conn.flush()?;
            return Err(Error::Command(byte));
        }
    }
    conn.flush()
}

/// Serves requests on a single connection until the peer goes away.
///
/// Used for point-to-point links such as serial lines. The handshake is
/// awaited first; idle timeouts are ignored, other non-fatal errors are
/// logged and serving continues.
pub fn serve<H: Host + ?Sized>(conn: &mut Connection, host: &mut H) -> Result<()> {
    loop {
        match conn.accept_handshake() {
            Ok(()) => break,
            Err(Error::Timeout) => {}
            Err(e) => return Err(e),
        }
    }
    tracing::info!(format = ?conn.format(), "peer connected");

    loop {
        match serve_one(conn, host) {
            Ok(()) | Err(Error::Timeout) => {}
            Err(e) => match e.severity() {
                Severity::Done => {
                    tracing::info!("peer disconnected");
                    return Ok(());
                }
                Severity::NonFatal => tracing::warn!(error = %e, "request failed"),
                Severity::Fatal => return Err(e),
            },
        }
    }
}

/// Writes READY so the peer sends the request body.
fn ready(conn: &mut Connection) -> Result<()> {
    conn.write_u8(Status::Ready.as_u8())?;
    conn.flush()
}

/// Reads a dotted path string.
fn read_path(conn: &mut Connection) -> Result<RemotePath> {
    let raw = conn.read_string()?;
    let dotted = std::str::from_utf8(&raw).map_err(|_| Error::protocol("path is not UTF-8"))?;
    Ok(RemotePath::parse(dotted))
}

/// Reads a value, handing blobs to the host.
fn read_arg<H: Host + ?Sized>(conn: &mut Connection, host: &mut H) -> Result<Value> {
    Ok(match conn.read_value()? {
        Value::Blob(bytes) => host.deserialize_callable(bytes),
        v => v,
    })
}

/// Writes status 1 with a code and message.
fn write_failure(conn: &mut Connection, code: u32, message: &str) -> Result<()> {
    conn.write_u8(1)?;
    conn.write_u32(code)?;
    conn.write_string(message.as_bytes())
}

/// Reads path and arguments, invokes, writes results or a failure.
fn serve_call<H: Host + ?Sized>(conn: &mut Connection, host: &mut H) -> Result<()> {
    let path = read_path(conn)?;
    let argc = conn.read_u32()?;
    let mut args = Vec::new();
    for _ in 0..argc {
        args.push(read_arg(conn, host)?);
    }
    tracing::debug!(%path, argc, "call");

    match host.invoke(&path, args) {
        Ok(rets) => {
            let count = u32::try_from(rets.len())
                .map_err(|_| Error::protocol("too many return values"))?;
            conn.write_u8(0)?;
            conn.write_u32(count)?;
            for v in &rets {
                conn.write_value(v)?;
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!(%path, error = %e, "call failed");
            write_failure(conn, e.code(), &e.to_string())
        }
    }
}

/// Reads a path and writes the value found there, or nil.
fn serve_get<H: Host + ?Sized>(conn: &mut Connection, host: &mut H) -> Result<()> {
    let path = read_path(conn)?;
    tracing::debug!(%path, "get");
    let value = match host.resolve(&path) {
        Ok(v) => v,
        Err(e) if e.is_not_found() => Value::Nil,
        // GET has no error reply; the exchange cannot be completed.
        Err(e) => return Err(Error::protocol(format!("get {path}: {e}"))),
    };
    conn.write_value(&value)
}

/// Reads path, key and value, assigns, writes the status.
fn serve_set<H: Host + ?Sized>(conn: &mut Connection, host: &mut H) -> Result<()> {
    let path = read_path(conn)?;
    let key = read_arg(conn, host)?;
    let value = read_arg(conn, host)?;
    tracing::debug!(%path, %key, "set");

    match host.assign(&path, key, value) {
        Ok(()) => conn.write_u8(0),
        Err(e) => write_failure(conn, e.code(), &e.to_string()),
    }
}
