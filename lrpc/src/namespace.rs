//! An in-memory [`Host`]: nested tables, plain values and native functions.

use std::collections::BTreeMap;
use std::fmt;

use lrpc_proto::{RemotePath, Value};

use crate::host::{Host, HostError};

/// A function callable by remote peers.
pub type NativeFn = Box<dyn FnMut(Vec<Value>) -> Result<Vec<Value>, HostError> + Send>;

/// One node of the namespace tree.
enum Entry {
    /// Plain data.
    Value(Value),
    /// A native function.
    Function(NativeFn),
    /// Nested entries; later duplicates of a key win.
    Table(Vec<(Value, Entry)>),
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Function(_) => f.write_str("<function>"),
            Self::Table(pairs) => f
                .debug_map()
                .entries(pairs.iter().map(|(k, v)| (k.to_string(), v)))
                .finish(),
        }
    }
}

impl Entry {
    /// Converts data, turning tables into nested entries.
    fn from_value(v: Value) -> Self {
        match v {
            Value::Table(pairs) => Self::Table(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_value(v)))
                    .collect(),
            ),
            other => Self::Value(other),
        }
    }

    /// Snapshot as a wire value; functions become remote references.
    fn to_value(&self, path: &str) -> Value {
        match self {
            Self::Value(v) => v.clone(),
            Self::Function(_) => Value::Remote(path.to_owned()),
            Self::Table(pairs) => Value::Table(
                pairs
                    .iter()
                    .map(|(k, v)| {
                        let child = match k.as_str() {
                            Some(name) => v.to_value(&format!("{path}.{name}")),
                            None if matches!(v, Self::Function(_)) => Value::Nil,
                            None => v.to_value(path),
                        };
                        (k.clone(), child)
                    })
                    .collect(),
            ),
        }
    }

    /// The child named `name`, if this is a table.
    fn member(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Table(pairs) => pairs
                .iter()
                .rev()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable form of [`member`](Self::member).
    fn member_mut(&mut self, name: &str) -> Option<&mut Self> {
        match self {
            Self::Table(pairs) => pairs
                .iter_mut()
                .rev()
                .find(|(k, _)| k.as_str() == Some(name))
                .map(|(_, v)| v),
            _ => None,
        }
    }
}

/// Stores `entry` under `key`; a nil value removes the key.
fn set_pair(pairs: &mut Vec<(Value, Entry)>, key: Value, entry: Entry) {
    let existing = pairs.iter().rposition(|(k, _)| *k == key);
    match (existing, entry) {
        (Some(i), Entry::Value(Value::Nil)) => {
            pairs.remove(i);
        }
        (None, Entry::Value(Value::Nil)) => {}
        (Some(i), entry) => pairs[i].1 = entry,
        (None, entry) => pairs.push((key, entry)),
    }
}

/// A tree of named values and functions served to remote peers.
///
/// ```
/// use lrpc::{Namespace, Value};
///
/// let mut ns = Namespace::new();
/// ns.insert("config.name", "demo")
///     .register("add", |args| {
///         let sum = args.iter().filter_map(Value::as_f64).sum::<f64>();
///         Ok(vec![Value::from(sum)])
///     });
/// assert_eq!(ns.get("config.name"), Some(Value::from("demo")));
/// ```
#[derive(Debug, Default)]
pub struct Namespace {
    /// Top-level names.
    globals: BTreeMap<String, Entry>,
}

impl Namespace {
    /// An empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` at a dotted path, creating intermediate tables.
    ///
    /// Intermediate nodes that are not tables are replaced.
    pub fn insert(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.place(path, Entry::from_value(value.into()));
        self
    }

    /// Registers a native function at a dotted path.
    pub fn register<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: FnMut(Vec<Value>) -> Result<Vec<Value>, HostError> + Send + 'static,
    {
        self.place(path, Entry::Function(Box::new(f)));
        self
    }

    /// Reads a dotted path; `None` if nothing lives there.
    pub fn get(&self, path: &str) -> Option<Value> {
        self.resolve(&RemotePath::parse(path)).ok()
    }

    /// Stores `entry` at `path`, creating tables along the way.
    fn place(&mut self, path: &str, entry: Entry) {
        let path = RemotePath::parse(path);
        let Some((first, rest)) = path.segments().split_first() else {
            return;
        };
        let Some((last, middle)) = rest.split_last() else {
            self.globals.insert(first.clone(), entry);
            return;
        };

        let mut node = self
            .globals
            .entry(first.clone())
            .or_insert_with(|| Entry::Table(Vec::new()));
        for seg in middle {
            node = table_child(node, seg);
        }
        if !matches!(node, Entry::Table(_)) {
            *node = Entry::Table(Vec::new());
        }
        if let Entry::Table(pairs) = node {
            set_pair(pairs, Value::from(last.as_str()), entry);
        }
    }

    /// Walks `path` from the globals.
    fn lookup(&self, path: &RemotePath) -> Option<&Entry> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.globals.get(first)?;
        for seg in rest {
            node = node.member(seg)?;
        }
        Some(node)
    }

    /// Mutable form of [`lookup`](Self::lookup).
    fn lookup_mut(&mut self, path: &RemotePath) -> Option<&mut Entry> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.globals.get_mut(first)?;
        for seg in rest {
            node = node.member_mut(seg)?;
        }
        Some(node)
    }
}

/// Descends into `name`, turning `node` into a table and adding the child
/// table if needed.
fn table_child<'a>(node: &'a mut Entry, name: &str) -> &'a mut Entry {
    if !matches!(node, Entry::Table(_)) {
        *node = Entry::Table(Vec::new());
    }
    match node {
        Entry::Table(pairs) => {
            let idx = match pairs.iter().rposition(|(k, _)| k.as_str() == Some(name)) {
                Some(i) => i,
                None => {
                    pairs.push((Value::from(name), Entry::Table(Vec::new())));
                    pairs.len() - 1
                }
            };
            &mut pairs[idx].1
        }
        other => other,
    }
}

impl Host for Namespace {
    fn resolve(&self, path: &RemotePath) -> Result<Value, HostError> {
        self.lookup(path)
            .map(|e| e.to_value(&path.to_string()))
            .ok_or_else(|| HostError::not_found(path))
    }

    fn assign(&mut self, path: &RemotePath, key: Value, value: Value) -> Result<(), HostError> {
        let entry = Entry::from_value(value);
        if path.is_root() {
            let name = key
                .as_str()
                .ok_or_else(|| HostError::failed("global names must be strings"))?;
            if matches!(entry, Entry::Value(Value::Nil)) {
                self.globals.remove(name);
            } else {
                self.globals.insert(name.to_owned(), entry);
            }
            return Ok(());
        }
        match self.lookup_mut(path) {
            Some(Entry::Table(pairs)) => {
                set_pair(pairs, key, entry);
                Ok(())
            }
            Some(_) => Err(HostError::failed(format!("cannot index {path}: not a table"))),
            None => Err(HostError::not_found(path)),
        }
    }

    fn invoke(&mut self, path: &RemotePath, args: Vec<Value>) -> Result<Vec<Value>, HostError> {
        // Remote references in the arguments name values living here.
        let args: Vec<Value> = args
            .into_iter()
            .map(|a| match a {
                Value::Remote(p) => self.resolve(&RemotePath::parse(&p)).unwrap_or_default(),
                other => other,
            })
            .collect();
        match self.lookup_mut(path) {
            Some(Entry::Function(f)) => f(args),
            _ => Err(HostError::NotCallable(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo() -> Namespace {
        let mut ns = Namespace::new();
        ns.insert("a.b.x", 1)
            .insert("greeting", "hi")
            .register("math.max", |args| {
                let m = args
                    .iter()
                    .filter_map(Value::as_f64)
                    .fold(f64::NEG_INFINITY, f64::max);
                Ok(vec![Value::from(m)])
            })
            .register("fail", |_| Err(HostError::failed("nope")));
        ns
    }

    #[test]
    fn resolve_walks_segments() {
        let ns = demo();
        assert_eq!(ns.get("a.b.x"), Some(Value::integer(1)));
        assert_eq!(ns.get("greeting"), Some(Value::from("hi")));
        assert_eq!(ns.get("a.missing"), None);
        assert_eq!(ns.get("greeting.len"), None);
        assert!(ns.resolve(&RemotePath::root()).unwrap_err().is_not_found());
    }

    #[test]
    fn functions_resolve_to_remote_references() {
        let ns = demo();
        assert_eq!(ns.get("math.max"), Some(Value::Remote("math.max".into())));
        let math = ns.get("math").unwrap();
        assert_eq!(math.get("max"), Some(&Value::Remote("math.max".into())));
    }

    #[test]
    fn assign_into_tables_and_globals() {
        let mut ns = demo();
        ns.assign(&RemotePath::parse("a.b"), Value::from("c"), Value::from(42))
            .unwrap();
        assert_eq!(ns.get("a.b.c"), Some(Value::integer(42)));

        ns.assign(&RemotePath::root(), Value::from("g"), Value::from(true))
            .unwrap();
        assert_eq!(ns.get("g"), Some(Value::Boolean(true)));

        ns.assign(&RemotePath::root(), Value::from("g"), Value::Nil)
            .unwrap();
        assert_eq!(ns.get("g"), None);
    }

    #[test]
    fn assign_errors() {
        let mut ns = demo();
        let err = ns
            .assign(&RemotePath::parse("nope"), Value::from("k"), Value::Nil)
            .unwrap_err();
        assert!(err.is_not_found());
        let err = ns
            .assign(&RemotePath::parse("greeting"), Value::from("k"), Value::Nil)
            .unwrap_err();
        assert!(matches!(err, HostError::Failed { .. }));
    }

    #[test]
    fn assigned_tables_are_navigable() {
        let mut ns = Namespace::new();
        let t = Value::table([("inner", Value::table([("v", 5)]))]);
        ns.assign(&RemotePath::root(), Value::from("t"), t).unwrap();
        assert_eq!(ns.get("t.inner.v"), Some(Value::integer(5)));
    }

    #[test]
    fn invoke_resolves_remote_arguments() {
        let mut ns = demo();
        let out = ns
            .invoke(
                &RemotePath::parse("math.max"),
                vec![Value::from(3.0), Value::Remote("a.b.x".into()), Value::from(7.5)],
            )
            .unwrap();
        assert_eq!(out, vec![Value::from(7.5)]);
    }

    #[test]
    fn invoke_errors() {
        let mut ns = demo();
        let err = ns.invoke(&RemotePath::parse("math.nope"), vec![]).unwrap_err();
        assert_eq!(err.to_string(), "undefined function: math.nope");
        assert_eq!(err.code(), 2);
        let err = ns.invoke(&RemotePath::parse("greeting"), vec![]).unwrap_err();
        assert!(matches!(err, HostError::NotCallable(_)));
        let err = ns.invoke(&RemotePath::parse("fail"), vec![]).unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }
}
