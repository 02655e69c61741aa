//! Canonicalizer
//!
//! Produces an order-stable copy of a JSON value:
//! - object keys ordered lexicographically, by a callback, or left as given
//! - arrays sorted by their tagged text, by a callback, or left as given
//! - excluded paths removed entirely (not nulled)
//!
//! Paths address the *input* value: array indices refer to positions before
//! any reordering.
//!
//! [`tagged_text`] renders a canonical value with a type prefix on every
//! node, so `1` and `"1"` (or `null` and `""`) never render the same.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// One step of a path into a JSON value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

pub type Path = Vec<PathSegment>;

/// Path made only of object keys, e.g. `key_path(&["variables", "cursor"])`
pub fn key_path(keys: &[&str]) -> Path {
    keys.iter().map(|k| PathSegment::from(*k)).collect()
}

pub type KeyOrderFn = Arc<dyn Fn(&[PathSegment], Vec<String>) -> Vec<String> + Send + Sync>;
pub type ListOrderFn = Arc<dyn Fn(&[PathSegment], Vec<Value>) -> Vec<Value> + Send + Sync>;

#[derive(Clone, Default)]
pub enum KeyOrder {
    /// Lexicographic
    #[default]
    Default,
    /// Input order; not deterministic across differently built inputs
    None,
    /// Receives the object's path and its keys, returns them in order.
    /// Keys left out of the result are dropped.
    Custom(KeyOrderFn),
}

#[derive(Clone, Default)]
pub enum ListOrder {
    /// Sorted by tagged text
    #[default]
    Default,
    /// Input order
    None,
    Custom(ListOrderFn),
}

impl fmt::Debug for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrder::Default => write!(f, "Default"),
            KeyOrder::None => write!(f, "None"),
            KeyOrder::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

impl fmt::Debug for ListOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListOrder::Default => write!(f, "Default"),
            ListOrder::None => write!(f, "None"),
            ListOrder::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanonicalOptions {
    pub excludes: Vec<Path>,
    pub key_order: KeyOrder,
    pub list_order: ListOrder,
}

impl CanonicalOptions {
    pub fn exclude(mut self, path: Path) -> Self {
        self.excludes.push(path);
        self
    }

    pub fn key_order(mut self, order: KeyOrder) -> Self {
        self.key_order = order;
        self
    }

    pub fn list_order(mut self, order: ListOrder) -> Self {
        self.list_order = order;
        self
    }

    fn is_excluded(&self, path: &[PathSegment]) -> bool {
        self.excludes.iter().any(|p| p.as_slice() == path)
    }
}

/// Canonical copy of `value`. An empty exclusion path is ignored.
pub fn canonicalize(value: &Value, options: &CanonicalOptions) -> Value {
    let mut path = Vec::new();
    walk(value, &mut path, options)
}

/// Canonical copy of `value` located at `base` inside a larger structure.
/// Returns `None` when `base` itself is excluded.
pub fn canonicalize_at(value: &Value, base: &[PathSegment], options: &CanonicalOptions) -> Option<Value> {
    if !base.is_empty() && options.is_excluded(base) {
        return None;
    }
    let mut path = base.to_vec();
    Some(walk(value, &mut path, options))
}

fn walk(value: &Value, path: &mut Vec<PathSegment>, options: &CanonicalOptions) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<String> = Vec::with_capacity(map.len());
            for key in map.keys() {
                path.push(PathSegment::Key(key.clone()));
                if !options.is_excluded(path) {
                    keys.push(key.clone());
                }
                path.pop();
            }

            let keys = match &options.key_order {
                KeyOrder::Default => {
                    keys.sort();
                    keys
                }
                KeyOrder::None => keys,
                KeyOrder::Custom(order) => order(path, keys),
            };

            let mut out = Map::with_capacity(keys.len());
            for key in keys {
                if let Some(child) = map.get(&key) {
                    path.push(PathSegment::Key(key.clone()));
                    let child = walk(child, path, options);
                    path.pop();
                    out.insert(key, child);
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(idx));
                if !options.is_excluded(path) {
                    out.push(walk(item, path, options));
                }
                path.pop();
            }

            let out = match &options.list_order {
                ListOrder::Default => {
                    out.sort_by_cached_key(tagged_text);
                    out
                }
                ListOrder::None => out,
                ListOrder::Custom(order) => order(path, out),
            };
            Value::Array(out)
        }
        other => other.clone(),
    }
}

/// Tag for an absent value
pub const UNDEFINED_TAG: &str = "undefined::";

/// Type-tagged text of a value, in the value's own key order
pub fn tagged_text(value: &Value) -> String {
    let mut out = String::new();
    write_tagged(value, &mut out);
    out
}

pub(crate) fn write_tagged(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null::"),
        Value::Bool(b) => {
            out.push_str("boolean::");
            out.push_str(if *b { "true" } else { "false" });
        }
        Value::Number(n) => {
            out.push_str("number::");
            out.push_str(&normalize_number(n));
        }
        Value::String(s) if s.is_empty() => out.push_str("void::"),
        Value::String(s) => {
            out.push_str("string::");
            out.push_str(&Value::String(s.clone()).to_string());
        }
        Value::Array(items) => {
            out.push_str("array::[");
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_tagged(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("object::{");
            for (idx, (key, item)) in map.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_tagged(item, out);
            }
            out.push('}');
        }
    }
}

// 1 and 1.0 are the same number
fn normalize_number(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => (f as i64).to_string(),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}
