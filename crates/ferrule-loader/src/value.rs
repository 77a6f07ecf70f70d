// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Values produced by scripts and module namespaces

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A runtime value
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Immutable array
    Array(Arc<Vec<Value>>),
    /// Module namespace object
    Namespace(Namespace),
}

impl Value {
    /// Build an array value
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Arc::new(items.into_iter().collect()))
    }

    /// Whether this value is `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// The string contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// The number, if this is a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The elements, if this is an array
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The namespace, if this is a module namespace
    pub fn as_namespace(&self) -> Option<&Namespace> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    /// Name of the value's type, as `typeof` would report it
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Null | Value::Array(_) | Value::Namespace(_) => "object",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Namespace(ns) => write!(f, "{}", ns),
        }
    }
}

/// An immutable module namespace
///
/// Holds exactly the exported bindings of a module, in sorted key order.
/// There is no API to add, remove or reassign a binding once built; clones
/// share the same underlying instance.
#[derive(Clone, Default)]
pub struct Namespace {
    exports: Arc<BTreeMap<String, Value>>,
}

impl Namespace {
    /// Build a namespace from its exports
    pub fn new(exports: BTreeMap<String, Value>) -> Self {
        Self {
            exports: Arc::new(exports),
        }
    }

    /// Get an exported value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.exports.get(name)
    }

    /// Check if a binding is exported
    pub fn has(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    /// Exported names, sorted
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }

    /// Iterate over exported bindings
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.exports.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of exported bindings
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Check if nothing is exported
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Whether both handles refer to the same namespace instance
    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.exports, &other.exports)
    }
}

impl FromIterator<(String, Value)> for Namespace {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.exports.iter()).finish()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Module: null prototype] {{")?;
        for (i, (name, value)) in self.exports.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: {}", name, value)?;
        }
        if !self.exports.is_empty() {
            write!(f, " ")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_identity() {
        let ns: Namespace = [("a".to_string(), Value::from(1.0))].into_iter().collect();
        let same = ns.clone();
        let other: Namespace = [("a".to_string(), Value::from(1.0))].into_iter().collect();

        assert!(ns.ptr_eq(&same));
        assert!(!ns.ptr_eq(&other));
        assert_eq!(Value::Namespace(ns.clone()), Value::Namespace(same));
        assert_ne!(Value::Namespace(ns), Value::Namespace(other));
    }

    #[test]
    fn test_namespace_has_only_exports() {
        let ns: Namespace = [
            ("b".to_string(), Value::from("B")),
            ("a".to_string(), Value::from("A")),
        ]
        .into_iter()
        .collect();

        assert_eq!(ns.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(ns.get("toString").is_none());
        assert_eq!(ns.to_string(), "[Module: null prototype] { a: A, b: B }");
    }

    #[test]
    fn test_value_display() {
        assert_eq!(Value::from(42.0).to_string(), "42");
        assert_eq!(Value::from(1.5).to_string(), "1.5");
        assert_eq!(
            Value::array([Value::from("t"), Value::from("A")]).to_string(),
            "t,A"
        );
        assert_eq!(Value::Undefined.to_string(), "undefined");
    }
}
