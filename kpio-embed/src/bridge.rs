//! Value conversion between the host and the engine stack.
//!
//! Pushing converts a [`HostValue`] into exactly one new stack value;
//! pulling reads a stack slot and leaves the stack as it found it. Both
//! directions bound their recursion by `ContextConfig::max_depth`; pulling
//! also tracks the engine objects on the current path to reject cycles.

use hashbrown::HashSet;
use kpio_js::{EngineResult, EnumFlags, Engine, HeapPtr, Type};

use crate::codec;
use crate::context::Shared;
use crate::error::{self, Error, Result};
use crate::foreign;
use crate::value::{HostValue, MapKey};

/// A pulled value, flagged when it is the configured sentinel standing in
/// for something the host cannot represent.
#[derive(Debug)]
pub(crate) struct Pulled {
    pub value: HostValue,
    pub complex: bool,
}

/// Push `value` on top of the engine stack.
pub(crate) fn push(engine: &mut Engine, shared: &Shared, value: &HostValue) -> Result<()> {
    Pusher { engine, shared }.push(value, 0)
}

/// Convert the value at `idx`.
pub(crate) fn pull(engine: &mut Engine, shared: &Shared, idx: i32) -> Result<HostValue> {
    let mut puller = Puller {
        engine,
        shared,
        visiting: HashSet::new(),
    };
    Ok(puller.pull(idx, 0)?.value)
}

/// Settle an engine primitive, translating failures.
pub(crate) fn check<T>(engine: &mut Engine, shared: &Shared, result: EngineResult<T>) -> Result<T> {
    result.map_err(|failure| error::translate(engine, shared, failure))
}

fn too_deep(max: usize) -> Error {
    Error::Argument(format!("nesting deeper than {} levels", max))
}

struct Pusher<'a> {
    engine: &'a mut Engine,
    shared: &'a Shared,
}

impl Pusher<'_> {
    fn check<T>(&mut self, result: EngineResult<T>) -> Result<T> {
        check(self.engine, self.shared, result)
    }

    fn push(&mut self, value: &HostValue, depth: usize) -> Result<()> {
        let max = self.shared.config.max_depth;
        if depth > max {
            return Err(too_deep(max));
        }
        let sentinel = &self.shared.config.complex_object;
        if matches!(sentinel, HostValue::Opaque(_)) && value.is_same(sentinel) {
            return Err(Error::Type(format!(
                "{} has no script representation",
                sentinel.type_name()
            )));
        }
        match value {
            HostValue::Nil => self.engine.push_null(),
            HostValue::Integer(n) => self.engine.push_number(*n as f64),
            HostValue::Float(n) => self.engine.push_number(*n),
            HostValue::Boolean(b) => self.engine.push_boolean(*b),
            HostValue::String(s) | HostValue::Symbol(s) => self.engine.push_lstring(&codec::encode(s)),
            HostValue::Sequence(items) => {
                let result = self.engine.push_array();
                self.check(result)?;
                for (index, item) in items.iter().enumerate() {
                    self.push(item, depth + 1)?;
                    let result = self.engine.put_prop_index(-2, index as u32);
                    self.check(result)?;
                }
            }
            HostValue::Mapping(entries) => {
                let result = self.engine.push_object();
                self.check(result)?;
                for (key, item) in entries {
                    let Some(name) = key.as_name() else {
                        return Err(invalid_key(key));
                    };
                    self.push(item, depth + 1)?;
                    let result = self.engine.put_prop_lstring(-2, &codec::encode(name));
                    self.check(result)?;
                }
            }
            HostValue::Opaque(object) => {
                if !self.shared.config.enable_foreign_bridge {
                    return Err(Error::Type(format!(
                        "cannot convert {} into a script value",
                        object.type_name()
                    )));
                }
                foreign::push_wrapper(self.engine, self.shared, object.clone())?;
            }
            HostValue::Complex => {
                return Err(Error::Type(
                    "ComplexObject has no script representation".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn invalid_key(key: &MapKey) -> Error {
    Error::Type(format!("invalid mapping key {}: only strings and symbols are allowed", key))
}

struct Puller<'a> {
    engine: &'a mut Engine,
    shared: &'a Shared,
    /// Engine objects on the current conversion path.
    visiting: HashSet<HeapPtr>,
}

impl Puller<'_> {
    fn check<T>(&mut self, result: EngineResult<T>) -> Result<T> {
        check(self.engine, self.shared, result)
    }

    fn complex(&self) -> Pulled {
        Pulled {
            value: self.shared.config.complex_object.clone(),
            complex: true,
        }
    }

    fn pull(&mut self, idx: i32, depth: usize) -> Result<Pulled> {
        let Some(idx) = self.engine.normalize_index(idx) else {
            return Ok(self.complex());
        };
        let value = match self.engine.get_type(idx) {
            Type::Undefined | Type::Null => HostValue::Nil,
            Type::Boolean => HostValue::Boolean(self.engine.get_boolean(idx)),
            Type::Number => HostValue::Float(self.engine.get_number(idx)),
            Type::String => {
                let bytes = self.engine.get_lstring(idx).unwrap_or_default();
                HostValue::String(codec::decode(&bytes)?)
            }
            Type::Object => return self.pull_object(idx, depth),
            Type::None | Type::Buffer | Type::Pointer => return Ok(self.complex()),
        };
        Ok(Pulled {
            value,
            complex: false,
        })
    }

    fn pull_object(&mut self, idx: i32, depth: usize) -> Result<Pulled> {
        if self.shared.config.enable_foreign_bridge {
            if let Some(object) = foreign::resolve(self.engine, self.shared, idx)? {
                return Ok(Pulled {
                    value: HostValue::Opaque(object),
                    complex: false,
                });
            }
        }
        if self.engine.is_callable(idx) {
            return Ok(self.complex());
        }
        let Some(ptr) = self.engine.get_heapptr(idx) else {
            return Ok(self.complex());
        };
        let max = self.shared.config.max_depth;
        if depth > max {
            return Err(too_deep(max));
        }
        if !self.visiting.insert(ptr) {
            return Err(Error::Argument("cannot convert cyclic structure".to_string()));
        }
        let result = if self.engine.is_array(idx) {
            self.pull_array(idx, depth)
        } else {
            self.pull_mapping(idx, depth)
        };
        self.visiting.remove(&ptr);
        Ok(Pulled {
            value: result?,
            complex: false,
        })
    }

    fn pull_array(&mut self, idx: i32, depth: usize) -> Result<HostValue> {
        let flags = EnumFlags::OWN_PROPERTIES_ONLY
            | EnumFlags::ARRAY_INDICES_ONLY
            | EnumFlags::SORT_ARRAY_INDICES;
        let mut items = Vec::new();
        self.each_property(idx, flags, |puller, _key| {
            items.push(puller.pull(-1, depth + 1)?.value);
            Ok(())
        })?;
        Ok(HostValue::Sequence(items))
    }

    fn pull_mapping(&mut self, idx: i32, depth: usize) -> Result<HostValue> {
        let mut entries = std::collections::BTreeMap::new();
        self.each_property(idx, EnumFlags::OWN_PROPERTIES_ONLY, |puller, key| {
            let pulled = puller.pull(-1, depth + 1)?;
            if !pulled.complex {
                entries.insert(MapKey::String(key), pulled.value);
            }
            Ok(())
        })?;
        Ok(HostValue::Mapping(entries))
    }

    /// Enumerate `idx`, calling `visit` with each key while the value sits
    /// on top of the stack.
    fn each_property<F>(&mut self, idx: i32, flags: EnumFlags, mut visit: F) -> Result<()>
    where
        F: FnMut(&mut Self, String) -> Result<()>,
    {
        let top = self.engine.get_top();
        let result = self.engine.push_enumerator(idx, flags);
        self.check(result)?;
        loop {
            let result = self.engine.next(-1, true);
            if !self.check(result)? {
                break;
            }
            let key = self.engine.get_lstring(-2).unwrap_or_default();
            visit(self, codec::decode(&key)?)?;
            self.engine.set_top(top + 1);
        }
        self.engine.set_top(top);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::context::Shared;
    use std::collections::BTreeMap;

    fn setup(config: ContextConfig) -> (Engine, Shared) {
        let engine = Engine::with_config(config.engine.clone());
        (engine, Shared::new(config))
    }

    fn round_trip(value: HostValue) -> HostValue {
        let (mut engine, shared) = setup(ContextConfig::default());
        push(&mut engine, &shared, &value).unwrap();
        assert_eq!(engine.get_top(), 1);
        let pulled = pull(&mut engine, &shared, -1).unwrap();
        assert_eq!(engine.get_top(), 1);
        pulled
    }

    #[test]
    fn test_primitives() {
        assert_eq!(round_trip(HostValue::Nil), HostValue::Nil);
        assert_eq!(round_trip(HostValue::Integer(7)), HostValue::Float(7.0));
        assert_eq!(round_trip(HostValue::Float(-1.5)), HostValue::Float(-1.5));
        assert_eq!(round_trip(HostValue::Boolean(true)), HostValue::Boolean(true));
        assert_eq!(round_trip("h\u{e9}\u{1F600}".into()), "h\u{e9}\u{1F600}".into());
        assert_eq!(round_trip(HostValue::symbol("name")), "name".into());
    }

    #[test]
    fn test_containers() {
        let nested = HostValue::Sequence(vec![
            1.into(),
            HostValue::Sequence(vec!["a".into(), HostValue::Nil]),
            HostValue::mapping([("k", HostValue::from(false))]),
        ]);
        assert_eq!(
            round_trip(nested),
            HostValue::Sequence(vec![
                1.0.into(),
                HostValue::Sequence(vec!["a".into(), HostValue::Nil]),
                HostValue::mapping([("k", HostValue::from(false))]),
            ])
        );
    }

    #[test]
    fn test_non_string_keys_are_rejected() {
        let (mut engine, shared) = setup(ContextConfig::default());
        let mut map = BTreeMap::new();
        map.insert(MapKey::Integer(123), HostValue::Nil);
        let err = push(&mut engine, &shared, &HostValue::Mapping(map)).unwrap_err();
        assert!(matches!(&err, Error::Type(m) if m.contains("123")), "{}", err);
    }

    #[test]
    fn test_depth_limit() {
        let mut value = HostValue::Nil;
        for _ in 0..10 {
            value = HostValue::Sequence(vec![value]);
        }
        let (mut engine, shared) = setup(ContextConfig::default().with_max_depth(4));
        let err = push(&mut engine, &shared, &value).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn test_cycles_are_rejected() {
        let (mut engine, shared) = setup(ContextConfig::default());
        engine.push_object().unwrap();
        engine.dup(-1).unwrap();
        engine.put_prop_string(-2, "self").unwrap();
        let err = pull(&mut engine, &shared, -1).unwrap_err();
        assert_eq!(err, Error::Argument("cannot convert cyclic structure".to_string()));
    }

    #[test]
    fn test_shared_children_are_not_cycles() {
        let (mut engine, shared) = setup(ContextConfig::default());
        engine.push_array().unwrap();
        engine.push_object().unwrap();
        engine.dup(-1).unwrap();
        engine.put_prop_index(-3, 0).unwrap();
        engine.put_prop_index(-2, 1).unwrap();
        let pulled = pull(&mut engine, &shared, -1).unwrap();
        let empty = HostValue::Mapping(BTreeMap::new());
        assert_eq!(pulled, HostValue::Sequence(vec![empty.clone(), empty]));
    }

    #[test]
    fn test_functions_become_the_sentinel() {
        let sentinel = HostValue::String("<complex>".to_string());
        let (mut engine, shared) = setup(ContextConfig::default().with_complex_object(sentinel.clone()));
        engine.push_native_function(|_| Ok(0), None).unwrap();
        assert_eq!(pull(&mut engine, &shared, -1).unwrap(), sentinel);
        engine.push_pointer(1);
        assert_eq!(pull(&mut engine, &shared, -1).unwrap(), sentinel);
    }
}
