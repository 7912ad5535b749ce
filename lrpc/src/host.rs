//! The seam between the command protocol and the serving application.

use lrpc_proto::{RemotePath, Value};

/// Error code reported for runtime failures, matching what script hosts use.
pub const RUNTIME_ERROR: u32 = 2;

/// A failure inside the host while serving a request.
///
/// Host errors are reported back to the caller and never tear down the
/// connection on their own.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HostError {
    /// Nothing lives at the path.
    #[error("undefined value: {0}")]
    NotFound(String),

    /// The path exists but cannot be invoked.
    #[error("undefined function: {0}")]
    NotCallable(String),

    /// The invoked function or assignment failed.
    #[error("{message}")]
    Failed {
        /// Code reported on the wire.
        code: u32,
        /// Message reported on the wire.
        message: String,
    },
}

impl HostError {
    /// A missing value at `path`.
    pub fn not_found(path: &RemotePath) -> Self {
        Self::NotFound(path.to_string())
    }

    /// A runtime failure with [`RUNTIME_ERROR`] as its code.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            code: RUNTIME_ERROR,
            message: message.into(),
        }
    }

    /// The code written to the wire.
    pub const fn code(&self) -> u32 {
        match self {
            Self::NotFound(_) | Self::NotCallable(_) => RUNTIME_ERROR,
            Self::Failed { code, .. } => *code,
        }
    }

    /// Returns `true` if nothing was found at the requested path.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The application behind a server: its global namespace.
///
/// Paths are resolved segment by segment: the first against the globals,
/// each further one as a member of the previous value.
pub trait Host {
    /// Reads the value at `path`.
    fn resolve(&self, path: &RemotePath) -> Result<Value, HostError>;

    /// Stores `value` under `key` in the table at `path`.
    ///
    /// The empty path assigns a global named by `key`.
    fn assign(&mut self, path: &RemotePath, key: Value, value: Value) -> Result<(), HostError>;

    /// Calls the function at `path`.
    fn invoke(&mut self, path: &RemotePath, args: Vec<Value>) -> Result<Vec<Value>, HostError>;

    /// Turns an incoming opaque blob into a host value.
    ///
    /// The default keeps the bytes as they are.
    fn deserialize_callable(&mut self, blob: Vec<u8>) -> Value {
        Value::Blob(blob)
    }
}
