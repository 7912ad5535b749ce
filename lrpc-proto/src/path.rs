//! Dotted paths into a peer's global namespace.

use std::fmt;

use crate::error::{Error, Result};

/// An ordered sequence of name segments, e.g. `["a", "b", "c"]` for `a.b.c`.
///
/// Paths are flattened to a single dot-joined string only when written to
/// the wire. The empty path addresses the global namespace itself and is
/// only meaningful for assignments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RemotePath {
    /// Non-empty names, outermost first.
    segments: Vec<String>,
}

impl RemotePath {
    /// The empty path.
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Splits a dotted string into segments. Empty segments are skipped,
    /// so `"a..b"` and `".a.b."` both yield `a.b`.
    pub fn parse(dotted: &str) -> Self {
        Self {
            segments: dotted
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    /// Builds a path from segments, checking each against `max_len` bytes.
    pub fn from_segments<I, S>(segments: I, max_len: usize) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut path = Self::root();
        for s in segments {
            path = path.join(s, max_len)?;
        }
        Ok(path)
    }

    /// Returns a new path with `name` appended.
    ///
    /// Fails with [`Error::LongName`] if `name` is longer than `max_len`
    /// bytes; nothing is sent before this check.
    pub fn join(&self, name: impl Into<String>, max_len: usize) -> Result<Self> {
        let name = name.into();
        check_segment(&name, max_len)?;
        let mut segments = self.segments.clone();
        segments.push(name);
        Ok(Self { segments })
    }

    /// The segments, root first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns `true` for the empty (global) path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment, if any.
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The path without its last segment, if it has one.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self {
            segments: rest.to_vec(),
        })
    }

    /// Checks every segment against `max_len` bytes.
    pub fn check(&self, max_len: usize) -> Result<()> {
        self.segments.iter().try_for_each(|s| check_segment(s, max_len))
    }
}

/// Rejects a segment longer than `max_len` bytes with [`Error::LongName`].
pub fn check_segment(name: &str, max_len: usize) -> Result<()> {
    if name.len() > max_len {
        return Err(Error::LongName {
            segment: name.to_owned(),
            max: max_len,
        });
    }
    Ok(())
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for RemotePath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}
