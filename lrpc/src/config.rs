//! Client and server settings with JSON persistence.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;
use std::{fs, io};

use lrpc_proto::NativeFormat;
use serde::{Deserialize, Serialize};

/// Default TCP port for `lrpc serve`.
pub const DEFAULT_PORT: u16 = 12346;

/// Longest path segment a client will send.
pub const DEFAULT_MAX_NAME_LEN: usize = 19;

/// Settings for a client [`Handle`](crate::Handle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Bound on each read or write during an exchange.
    #[serde(with = "millis")]
    pub communication_timeout: Option<Duration>,
    /// Bound on connecting and on waiting for a call's result.
    #[serde(with = "millis")]
    pub wait_timeout: Option<Duration>,
    /// Maximum length of one path segment in bytes.
    pub max_name_len: usize,
    /// Overrides the advertised number format.
    pub native: Option<NativeFormat>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            communication_timeout: Some(Duration::from_secs(10)),
            wait_timeout: None,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            native: None,
        }
    }
}

impl ClientConfig {
    /// Sets the per-operation I/O timeout.
    #[must_use]
    pub const fn communication_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.communication_timeout = timeout;
        self
    }

    /// Sets the connect / call-result timeout.
    #[must_use]
    pub const fn wait_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Sets the maximum path-segment length.
    #[must_use]
    pub const fn max_name_len(mut self, len: usize) -> Self {
        self.max_name_len = len;
        self
    }

    /// Advertises `format` instead of the host's own.
    #[must_use]
    pub const fn native(mut self, format: NativeFormat) -> Self {
        self.native = Some(format);
        self
    }

    /// The format to advertise during negotiation.
    pub fn native_format(&self) -> NativeFormat {
        self.native.unwrap_or_default()
    }

    /// Loads settings from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        load_json(path)
    }

    /// Persists settings to a JSON file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        save_json(path, self)
    }
}

/// Settings for a [`Server`](crate::Server).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct ServerConfig {
    /// Address to bind.
    pub address: IpAddr,
    /// Port to bind; `0` picks an ephemeral one.
    pub port: u16,
    /// Pending-connection queue length.
    pub backlog: i32,
    /// Bound on each read or write on accepted connections.
    #[serde(with = "millis")]
    pub communication_timeout: Option<Duration>,
    /// Overrides the number format used for reconciliation.
    pub native: Option<NativeFormat>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backlog: 10,
            communication_timeout: Some(Duration::from_secs(10)),
            native: None,
        }
    }
}

impl ServerConfig {
    /// Sets the bind address.
    #[must_use]
    pub const fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the listen backlog.
    #[must_use]
    pub const fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Sets the per-operation I/O timeout for accepted connections.
    #[must_use]
    pub const fn communication_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.communication_timeout = timeout;
        self
    }

    /// Reconciles against `format` instead of the host's own.
    #[must_use]
    pub const fn native(mut self, format: NativeFormat) -> Self {
        self.native = Some(format);
        self
    }

    /// The local format used for reconciliation.
    pub fn native_format(&self) -> NativeFormat {
        self.native.unwrap_or_default()
    }

    /// Loads settings from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        load_json(path)
    }

    /// Persists settings to a JSON file.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        save_json(path, self)
    }
}

/// Reads a JSON file; parse errors become `InvalidData`.
fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> io::Result<T> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Writes pretty-printed JSON.
fn save_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let file = fs::File::create(path)?;
    serde_json::to_writer_pretty(file, value).map_err(io::Error::other)
}

/// Optional durations as whole milliseconds; `null` means no timeout.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Writes whole milliseconds or `null`.
    #[allow(clippy::ref_option, clippy::cast_possible_truncation)]
    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    /// Reads whole milliseconds or `null`.
    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
