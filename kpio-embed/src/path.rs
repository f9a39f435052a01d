//! Property paths rooted at the global object.

use core::fmt;

use kpio_js::{Engine, EngineResult, ErrorKind, Type};

use crate::bridge;
use crate::codec;
use crate::context::Shared;
use crate::error::{Error, Result};
use crate::value::HostValue;

/// A non-empty list of property names, resolved from the global object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath(Vec<String>);

impl PropertyPath {
    pub fn new<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err(Error::Argument("empty property path".to_string()));
        }
        Ok(PropertyPath(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The last segment.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Anything accepted as a property path.
pub trait IntoPropertyPath {
    fn into_property_path(self) -> Result<PropertyPath>;
}

impl IntoPropertyPath for PropertyPath {
    fn into_property_path(self) -> Result<PropertyPath> {
        Ok(self)
    }
}

impl IntoPropertyPath for &PropertyPath {
    fn into_property_path(self) -> Result<PropertyPath> {
        Ok(self.clone())
    }
}

impl IntoPropertyPath for &str {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new([self])
    }
}

impl IntoPropertyPath for String {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new([self])
    }
}

impl IntoPropertyPath for &String {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new([self.as_str()])
    }
}

impl IntoPropertyPath for &[&str] {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new(self.iter().copied())
    }
}

impl<const N: usize> IntoPropertyPath for [&str; N] {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new(self)
    }
}

impl IntoPropertyPath for Vec<&str> {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new(self)
    }
}

impl IntoPropertyPath for Vec<String> {
    fn into_property_path(self) -> Result<PropertyPath> {
        PropertyPath::new(self)
    }
}

impl IntoPropertyPath for &HostValue {
    fn into_property_path(self) -> Result<PropertyPath> {
        match self {
            HostValue::String(name) | HostValue::Symbol(name) => PropertyPath::new([name.as_str()]),
            HostValue::Sequence(items) => {
                let names = items
                    .iter()
                    .map(|item| item.as_str().ok_or_else(|| invalid_path(item)))
                    .collect::<Result<Vec<_>>>()?;
                PropertyPath::new(names)
            }
            other => Err(invalid_path(other)),
        }
    }
}

impl IntoPropertyPath for HostValue {
    fn into_property_path(self) -> Result<PropertyPath> {
        (&self).into_property_path()
    }
}

fn invalid_path(value: &HostValue) -> Error {
    Error::Type(format!(
        "wrong property path type {} (expected String, Symbol or Sequence)",
        value.type_name()
    ))
}

/// Resolve `path`, leaving `[parent, value]` on top of the stack.
pub(crate) fn resolve(engine: &mut Engine, shared: &Shared, path: &PropertyPath) -> Result<()> {
    let result = walk(engine, path);
    bridge::check(engine, shared, result)
}

fn walk(engine: &mut Engine, path: &PropertyPath) -> EngineResult<()> {
    let bottom = engine.get_top();
    engine.push_global_object();
    for (depth, segment) in path.segments().iter().enumerate() {
        if matches!(engine.get_type(-1), Type::Undefined | Type::Null) {
            return Err(engine.throw(ErrorKind::Type, "invalid base value"));
        }
        let found = engine.get_prop_lstring(-1, &codec::encode(segment))?;
        if depth == 0 && !found {
            let message = format!("identifier '{}' undefined", segment);
            return Err(engine.throw(ErrorKind::Reference, message));
        }
        if engine.get_top() - bottom > 2 {
            engine.remove(-3)?;
        }
    }
    Ok(())
}

/// Call the function at `path` with its parent as `this`, leaving the
/// result on top of the stack.
pub(crate) fn call(
    engine: &mut Engine,
    shared: &Shared,
    path: &PropertyPath,
    args: &[HostValue],
) -> Result<()> {
    resolve(engine, shared, path)?;
    if !engine.is_callable(-1) {
        let failure = engine.throw(ErrorKind::Type, "not callable");
        return Err(crate::error::translate(engine, shared, failure));
    }
    let result = engine.insert(-2);
    bridge::check(engine, shared, result)?;
    for arg in args {
        bridge::push(engine, shared, arg)?;
    }
    log::trace!("[KPIO EMBED] calling {} with {} arguments", path, args.len());
    let result = engine.pcall_method(args.len());
    bridge::check(engine, shared, result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_conversions() {
        assert_eq!("a".into_property_path().unwrap().segments(), ["a"]);
        assert_eq!(["a", "b"].into_property_path().unwrap().to_string(), "a.b");
        assert_eq!(
            HostValue::from(vec!["x", "y"]).into_property_path().unwrap().name(),
            "y"
        );
        assert_eq!(
            HostValue::symbol("s").into_property_path().unwrap().segments(),
            ["s"]
        );
    }

    #[test]
    fn test_invalid_paths() {
        assert!(matches!(
            Vec::<String>::new().into_property_path(),
            Err(Error::Argument(_))
        ));
        let err = HostValue::Integer(1).into_property_path().unwrap_err();
        assert!(matches!(&err, Error::Type(m) if m.contains("Integer")));
        let err = HostValue::from(vec![HostValue::from("a"), HostValue::Nil])
            .into_property_path()
            .unwrap_err();
        assert!(matches!(&err, Error::Type(m) if m.contains("nil")));
    }

    #[test]
    fn test_walk_keeps_parent_and_value() {
        let mut engine = Engine::new();
        engine.push_string("var a = {b: {c: 3}}");
        engine.push_string("path.js");
        engine.compile(kpio_js::CompileFlags::empty()).unwrap();
        engine.pcall(0).unwrap();
        engine.set_top(0);

        let path = PropertyPath::new(["a", "b", "c"]).unwrap();
        walk(&mut engine, &path).unwrap();
        assert_eq!(engine.get_top(), 2);
        assert_eq!(engine.get_number(-1), 3.0);
        assert_eq!(engine.get_type(-2), Type::Object);
    }
}
