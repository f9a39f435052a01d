//! Host-side value model.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// A host object that can be handed to script code by reference.
///
/// Script code reaches it through `Host.send(target, method, args)` when the
/// foreign bridge is enabled.
pub trait HostObject: fmt::Debug {
    /// Type name used in error messages.
    fn type_name(&self) -> &str;

    /// Invoke `method` by name.
    fn send(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
        let _ = args;
        Err(Error::no_method(self.type_name(), method))
    }
}

/// Mapping key. Only string and symbol keys can cross into the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    String(String),
    Symbol(String),
    Integer(i64),
    Boolean(bool),
}

impl MapKey {
    /// Property name for string-like keys.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            MapKey::String(s) | MapKey::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::String(s) => write!(f, "{:?}", s),
            MapKey::Symbol(s) => write!(f, ":{}", s),
            MapKey::Integer(i) => write!(f, "{}", i),
            MapKey::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::String(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::String(s)
    }
}

/// A value on the host side of the bridge.
#[derive(Debug, Clone)]
pub enum HostValue {
    Nil,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Symbol(String),
    Sequence(Vec<HostValue>),
    Mapping(BTreeMap<MapKey, HostValue>),
    Opaque(Rc<dyn HostObject>),
    /// Stand-in for engine values without a host representation.
    Complex,
}

impl HostValue {
    pub fn symbol(name: &str) -> Self {
        HostValue::Symbol(name.to_string())
    }

    pub fn opaque<T: HostObject + 'static>(object: T) -> Self {
        HostValue::Opaque(Rc::new(object))
    }

    /// Build a mapping from string keys.
    pub fn mapping<K, I>(entries: I) -> Self
    where
        K: Into<MapKey>,
        I: IntoIterator<Item = (K, HostValue)>,
    {
        HostValue::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short description used in error messages.
    pub fn type_name(&self) -> &str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Integer(_) => "Integer",
            HostValue::Float(_) => "Float",
            HostValue::Boolean(_) => "Boolean",
            HostValue::String(_) => "String",
            HostValue::Symbol(_) => "Symbol",
            HostValue::Sequence(_) => "Sequence",
            HostValue::Mapping(_) => "Mapping",
            HostValue::Opaque(object) => object.type_name(),
            HostValue::Complex => "ComplexObject",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Float(n) => Some(*n),
            HostValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) | HostValue::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Identity comparison for opaque values, structural otherwise.
    pub(crate) fn is_same(&self, other: &HostValue) -> bool {
        match (self, other) {
            (HostValue::Opaque(a), HostValue::Opaque(b)) => Rc::ptr_eq(a, b),
            (HostValue::Opaque(_), _) | (_, HostValue::Opaque(_)) => false,
            _ => self == other,
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) | (HostValue::Complex, HostValue::Complex) => true,
            (HostValue::Integer(a), HostValue::Integer(b)) => a == b,
            (HostValue::Float(a), HostValue::Float(b)) => a == b,
            (HostValue::Boolean(a), HostValue::Boolean(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Symbol(a), HostValue::Symbol(b)) => a == b,
            (HostValue::Sequence(a), HostValue::Sequence(b)) => a == b,
            (HostValue::Mapping(a), HostValue::Mapping(b)) => a == b,
            (HostValue::Opaque(a), HostValue::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Default for HostValue {
    fn default() -> Self {
        HostValue::Nil
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Integer(n)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::Integer(n as i64)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Float(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Boolean(b)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::Sequence(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(HostValue::Nil)
    }
}

impl From<BTreeMap<MapKey, HostValue>> for HostValue {
    fn from(map: BTreeMap<MapKey, HostValue>) -> Self {
        HostValue::Mapping(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain;

    impl HostObject for Plain {
        fn type_name(&self) -> &str {
            "Plain"
        }
    }

    #[test]
    fn test_opaque_equality_is_identity() {
        let a = Rc::new(Plain) as Rc<dyn HostObject>;
        let b = Rc::new(Plain) as Rc<dyn HostObject>;
        assert_eq!(HostValue::Opaque(a.clone()), HostValue::Opaque(a.clone()));
        assert_ne!(HostValue::Opaque(a), HostValue::Opaque(b));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(HostValue::from(vec![1, 2]), HostValue::Sequence(vec![1.into(), 2.into()]));
        assert_eq!(HostValue::from(None::<i64>), HostValue::Nil);
        let map = HostValue::mapping([("a", HostValue::from(true))]);
        assert_eq!(map.type_name(), "Mapping");
        assert_eq!(HostValue::opaque(Plain).type_name(), "Plain");
    }

    #[test]
    fn test_default_send_reports_missing_method() {
        let err = Plain.send("explode", Vec::new()).unwrap_err();
        assert_eq!(err, Error::no_method("Plain", "explode"));
    }
}
