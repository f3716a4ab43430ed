//! The JSON node model.
//!
//! Nodes are allocated in a per-worker arena and borrow from it; strings
//! duplicate their bytes into the arena. Array backings, object tables and
//! object keys use the general heap (they resize in ways a bump allocator
//! cannot), and their destructors run at the arena's next reset.

use indexmap::IndexMap;

/// A parsed JSON value with arena lifetime `'a`.
#[derive(Debug, PartialEq)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    Number(f64),
    /// Arena-copied string data.
    String(&'a str),
    /// Heap-resized vector of arena node references.
    Array(Vec<&'a Value<'a>>),
    /// Insertion-ordered table with heap keys and arena node references.
    Object(IndexMap<String, &'a Value<'a>>),
}

impl<'a> Value<'a> {
    /// True for `null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The number, if this is a `Number`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as a `u64`, if it is a non-negative integer that fits.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64 => {
                Some(*n as u64)
            }
            _ => None,
        }
    }

    /// The string slice, if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Value::String(s) => Some(*s),
            _ => None,
        }
    }

    /// The element vector, if this is an `Array`.
    #[must_use]
    pub fn as_array(&self) -> Option<&[&'a Value<'a>]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The member table, if this is an `Object`.
    #[must_use]
    pub fn as_object(&self) -> Option<&IndexMap<String, &'a Value<'a>>> {
        match self {
            Value::Object(members) => Some(members),
            _ => None,
        }
    }

    /// Object member lookup; `None` for non-objects and missing keys.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&'a Value<'a>> {
        match self {
            Value::Object(members) => members.get(key).copied(),
            _ => None,
        }
    }

    /// True when this value may carry JSON-RPC `params` (object or array).
    #[must_use]
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }
}
