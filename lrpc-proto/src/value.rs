//! The dynamically-typed value model carried on the wire.

use std::fmt;

use crate::format::NumberKind;

/// A number together with the representation it travelled in.
///
/// Equality compares the numeric value only, so `1` sent as an integer
/// equals `1.0` received as a float.
#[derive(Debug, Clone, Copy)]
pub struct Number {
    /// The numeric value.
    pub value: f64,
    /// Float or integer representation.
    pub kind: NumberKind,
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// A value exchanged between peers.
#[derive(Debug, Clone, PartialEq, Default)]
#[non_exhaustive]
pub enum Value {
    /// Absence of a value.
    #[default]
    Nil,
    /// `true` or `false`.
    Boolean(bool),
    /// A number.
    Number(Number),
    /// A byte string with explicit length.
    String(Vec<u8>),
    /// Ordered key/value pairs.
    Table(Vec<(Value, Value)>),
    /// Opaque host-specific bytes (e.g. a serialized callable).
    Blob(Vec<u8>),
    /// A dotted path naming a value that lives on the receiving peer.
    Remote(String),
}

impl Value {
    /// A float number.
    pub const fn float(value: f64) -> Self {
        Self::Number(Number {
            value,
            kind: NumberKind::Float,
        })
    }

    /// An integer number.
    #[allow(clippy::cast_precision_loss)]
    pub fn integer(value: i64) -> Self {
        Self::Number(Number {
            value: value as f64,
            kind: NumberKind::Integer,
        })
    }

    /// A table from key/value pairs.
    pub fn table<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Self>,
        V: Into<Self>,
    {
        Self::Table(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// A table keyed `1..=n`, the conventional array shape.
    pub fn list(items: impl IntoIterator<Item = Self>) -> Self {
        Self::Table(
            items
                .into_iter()
                .zip(1..)
                .map(|(v, i)| (Self::integer(i), v))
                .collect(),
        )
    }

    /// Short name of the variant, for diagnostics.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Table(_) => "table",
            Self::Blob(_) => "blob",
            Self::Remote(_) => "remote",
        }
    }

    /// Returns `true` for [`Value::Nil`].
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Returns the number, if this is one.
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(n.value),
            _ => None,
        }
    }

    /// Returns the boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string as UTF-8, if this is a valid UTF-8 string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }

    /// Looks up a string key in a table. Later duplicates win.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Table(pairs) => pairs
                .iter()
                .rev()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable lookup of a string key in a table.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Self> {
        match self {
            Self::Table(pairs) => pairs
                .iter_mut()
                .rev()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::float(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::integer(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s.into_bytes())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Nil, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", n.value),
            Self::String(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            Self::Table(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "[{k}] = {v}")?;
                }
                f.write_str("}")
            }
            Self::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
            Self::Remote(path) => write!(f, "<remote {path}>"),
        }
    }
}
