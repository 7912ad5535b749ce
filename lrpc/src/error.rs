//! Error types for lrpc operations.

pub use lrpc_proto::{Error, Result, Severity};

/// Callback that receives errors instead of the caller.
pub type ErrorHandler = Box<dyn FnMut(&Error) + Send>;
