//! Object system.
//!
//! Objects live in the engine heap and are addressed by [`ObjectId`]
//! handles. Properties keep insertion order; arrays and `arguments` keep
//! their index properties in a dense element vector with holes.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;

use crate::api::Engine;
use crate::ast::FunctionNode;
use crate::error::{EngineResult, JsResult};
use crate::gc::Handle;
use crate::string::JsString;
use crate::value::Value;

/// Largest gap a single array write may open past the current length.
pub const MAX_ARRAY_GAP: u32 = 1 << 16;

/// Handle to a heap object. Stale handles never resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub(crate) Handle);

/// Handle to a scope record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub(crate) Handle);

bitflags::bitflags! {
    /// Property attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u8 {
        const WRITABLE = 1 << 0;
        const ENUMERABLE = 1 << 1;
        const CONFIGURABLE = 1 << 2;
    }
}

impl PropertyFlags {
    /// Attributes of properties created by assignment.
    pub const DEFAULT: PropertyFlags = PropertyFlags::all();
    /// Attributes of builtin methods and internal slots.
    pub const HIDDEN: PropertyFlags =
        PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE);
}

/// Property key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    Index(u32),
    Name(JsString),
}

impl PropertyKey {
    /// Canonicalize a string key; numeric strings become indices.
    pub fn from_string(s: JsString) -> Self {
        match s.array_index() {
            Some(index) => PropertyKey::Index(index),
            None => PropertyKey::Name(s),
        }
    }

    pub fn to_js_string(&self) -> JsString {
        match self {
            PropertyKey::Index(i) => JsString::new(&alloc::format!("{}", i)),
            PropertyKey::Name(s) => s.clone(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, PropertyKey::Name(s) if s.is_internal())
    }

    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, PropertyKey::Name(s) if s.as_bytes() == name.as_bytes())
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        PropertyKey::from_string(JsString::new(s))
    }
}

impl From<u32> for PropertyKey {
    fn from(i: u32) -> Self {
        PropertyKey::Index(i)
    }
}

/// Stored property.
#[derive(Clone, Debug)]
pub struct Property {
    pub key: PropertyKey,
    pub value: Value,
    pub flags: PropertyFlags,
}

/// Object classification.
#[derive(Clone, Debug)]
pub enum ObjectKind {
    Ordinary,
    Array,
    Function,
    Error,
    Arguments,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Enumerator(EnumState),
}

/// Snapshot state of an enumerator object.
#[derive(Clone, Debug)]
pub struct EnumState {
    pub target: Value,
    pub keys: Vec<PropertyKey>,
    pub position: usize,
}

/// Result of writing an own property.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    ReadOnly,
    /// Array write too far past the end.
    OutOfRange,
}

/// A heap object.
#[derive(Clone, Debug)]
pub struct JsObject {
    pub kind: ObjectKind,
    pub prototype: Option<ObjectId>,
    properties: Vec<Property>,
    elements: Vec<Option<Value>>,
    pub callable: Option<Callable>,
    /// Function invoked once when the object becomes unreachable.
    pub finalizer: Option<Value>,
    pub finalized: bool,
}

impl JsObject {
    pub fn new(kind: ObjectKind, prototype: Option<ObjectId>) -> Self {
        JsObject {
            kind,
            prototype,
            properties: Vec::new(),
            elements: Vec::new(),
            callable: None,
            finalizer: None,
            finalized: false,
        }
    }

    pub fn ordinary(prototype: Option<ObjectId>) -> Self {
        Self::new(ObjectKind::Ordinary, prototype)
    }

    pub fn array(prototype: ObjectId, values: Vec<Value>) -> Self {
        let mut obj = Self::new(ObjectKind::Array, Some(prototype));
        obj.elements = values.into_iter().map(Some).collect();
        obj
    }

    pub fn function(prototype: ObjectId, callable: Callable) -> Self {
        let mut obj = Self::new(ObjectKind::Function, Some(prototype));
        obj.callable = Some(callable);
        obj
    }

    pub fn is_array(&self) -> bool {
        matches!(self.kind, ObjectKind::Array)
    }

    pub fn is_callable(&self) -> bool {
        self.callable.is_some()
    }

    fn has_elements(&self) -> bool {
        matches!(self.kind, ObjectKind::Array | ObjectKind::Arguments)
    }

    /// Own property lookup, including the virtual `length` of arrays.
    pub fn get_own(&self, key: &PropertyKey) -> Option<Value> {
        self.get_own_property(key).map(|(value, _)| value)
    }

    pub fn get_own_property(&self, key: &PropertyKey) -> Option<(Value, PropertyFlags)> {
        if self.has_elements() {
            match key {
                PropertyKey::Index(i) => {
                    return self
                        .elements
                        .get(*i as usize)
                        .and_then(|slot| slot.clone())
                        .map(|v| (v, PropertyFlags::DEFAULT));
                }
                PropertyKey::Name(_) if key.is_named("length") => {
                    return Some((
                        Value::Number(self.elements.len() as f64),
                        PropertyFlags::WRITABLE,
                    ));
                }
                _ => {}
            }
        }
        if let ObjectKind::String(s) = &self.kind {
            if key.is_named("length") {
                return Some((Value::Number(s.unit_len() as f64), PropertyFlags::empty()));
            }
        }
        self.properties
            .iter()
            .find(|p| &p.key == key)
            .map(|p| (p.value.clone(), p.flags))
    }

    pub fn has_own(&self, key: &PropertyKey) -> bool {
        self.get_own_property(key).is_some()
    }

    /// Assignment semantics: update an existing property or add a new one.
    pub fn put(&mut self, key: PropertyKey, value: Value) -> PutOutcome {
        if self.has_elements() {
            if let PropertyKey::Index(i) = key {
                return self.put_element(i, value);
            }
            if key.is_named("length") {
                return match value {
                    Value::Number(n) if n >= 0.0 && n <= u32::MAX as f64 && (n as u32) as f64 == n => {
                        self.set_array_length(n as u32)
                    }
                    _ => PutOutcome::OutOfRange,
                };
            }
        }
        if let Some(prop) = self.properties.iter_mut().find(|p| p.key == key) {
            if !prop.flags.contains(PropertyFlags::WRITABLE) {
                return PutOutcome::ReadOnly;
            }
            prop.value = value;
            return PutOutcome::Stored;
        }
        self.properties.push(Property {
            key,
            value,
            flags: PropertyFlags::DEFAULT,
        });
        PutOutcome::Stored
    }

    /// Define or redefine a property with explicit attributes.
    pub fn define(&mut self, key: PropertyKey, value: Value, flags: PropertyFlags) {
        if self.has_elements() {
            if let PropertyKey::Index(i) = key {
                self.put_element(i, value);
                return;
            }
        }
        match self.properties.iter_mut().find(|p| p.key == key) {
            Some(prop) => {
                prop.value = value;
                prop.flags = flags;
            }
            None => self.properties.push(Property { key, value, flags }),
        }
    }

    /// Remove an own property. Returns false for non-configurable ones.
    pub fn delete(&mut self, key: &PropertyKey) -> bool {
        if self.has_elements() {
            if let PropertyKey::Index(i) = key {
                if let Some(slot) = self.elements.get_mut(*i as usize) {
                    *slot = None;
                }
                return true;
            }
            if key.is_named("length") {
                return false;
            }
        }
        match self.properties.iter().position(|p| &p.key == key) {
            Some(pos) => {
                if !self.properties[pos].flags.contains(PropertyFlags::CONFIGURABLE) {
                    return false;
                }
                self.properties.remove(pos);
                true
            }
            None => true,
        }
    }

    /// Own keys in enumeration order: indices ascending, then names in
    /// insertion order.
    pub fn own_keys(&self, include_hidden: bool, include_internal: bool) -> Vec<PropertyKey> {
        let mut keys: Vec<PropertyKey> = Vec::new();
        if let ObjectKind::String(s) = &self.kind {
            keys.extend((0..s.unit_len() as u32).map(PropertyKey::Index));
        }
        for (i, slot) in self.elements.iter().enumerate() {
            if slot.is_some() {
                keys.push(PropertyKey::Index(i as u32));
            }
        }
        let mut indexed: Vec<u32> = self
            .properties
            .iter()
            .filter(|p| include_hidden || p.flags.contains(PropertyFlags::ENUMERABLE))
            .filter_map(|p| match p.key {
                PropertyKey::Index(i) => Some(i),
                _ => None,
            })
            .collect();
        indexed.sort_unstable();
        keys.extend(indexed.into_iter().map(PropertyKey::Index));
        for prop in &self.properties {
            if let PropertyKey::Name(name) = &prop.key {
                if name.is_internal() && !include_internal {
                    continue;
                }
                if include_hidden || prop.flags.contains(PropertyFlags::ENUMERABLE) {
                    keys.push(prop.key.clone());
                }
            }
        }
        keys
    }

    /// Array length; zero for non-array objects.
    pub fn array_length(&self) -> u32 {
        self.elements.len() as u32
    }

    pub fn set_array_length(&mut self, len: u32) -> PutOutcome {
        let current = self.elements.len() as u32;
        if len > current && len - current > MAX_ARRAY_GAP {
            return PutOutcome::OutOfRange;
        }
        self.elements.resize(len as usize, None);
        PutOutcome::Stored
    }

    fn put_element(&mut self, index: u32, value: Value) -> PutOutcome {
        let len = self.elements.len() as u32;
        if index >= len {
            if index - len > MAX_ARRAY_GAP {
                return PutOutcome::OutOfRange;
            }
            self.elements.resize(index as usize + 1, None);
        }
        self.elements[index as usize] = Some(value);
        PutOutcome::Stored
    }

    /// Dense element view (holes included).
    pub fn elements(&self) -> &[Option<Value>] {
        &self.elements
    }

    pub fn elements_mut(&mut self) -> &mut Vec<Option<Value>> {
        &mut self.elements
    }

    pub(crate) fn properties(&self) -> &[Property] {
        &self.properties
    }
}

/// Builtin implemented in Rust with direct interpreter access.
pub(crate) type BuiltinFn = fn(&mut Engine, &Value, &[Value]) -> JsResult<Value>;

/// Embedder function driven through the stack API.
///
/// Arguments are at stack indices `0..n` of the call frame. The return value
/// is the number of results (0 or 1) left on top of the frame.
pub type NativeFn = Rc<dyn Fn(&mut Engine) -> EngineResult<usize>>;

/// What kind of code a script function runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeKind {
    Function,
    /// Top-level program, result discarded.
    Program,
    /// Eval code, result is the completion value.
    Eval,
}

#[derive(Clone)]
pub struct ScriptFunction {
    pub code: Rc<FunctionNode>,
    pub scope: ScopeId,
    pub filename: Rc<str>,
    pub kind: CodeKind,
}

#[derive(Clone)]
pub struct BuiltinFunction {
    pub name: &'static str,
    pub(crate) func: BuiltinFn,
}

#[derive(Clone)]
pub struct NativeFunction {
    pub func: NativeFn,
    /// Fixed argument count, or `None` for varargs.
    pub nargs: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct BoundFunction {
    pub target: ObjectId,
    pub this: Value,
    pub args: Vec<Value>,
}

/// Call behaviour of a function object.
#[derive(Clone)]
pub enum Callable {
    Script(ScriptFunction),
    Builtin(BuiltinFunction),
    Native(NativeFunction),
    Bound(BoundFunction),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Script(s) => write!(f, "Script({:?})", s.code.name),
            Callable::Builtin(b) => write!(f, "Builtin({})", b.name),
            Callable::Native(n) => write!(f, "Native(nargs={:?})", n.nargs),
            Callable::Bound(b) => write!(f, "Bound({:?})", b.target),
        }
    }
}

/// Declarative scope record.
///
/// The global scope stores nothing itself; lookups that reach it go to the
/// global object.
#[derive(Clone, Debug, Default)]
pub struct Scope {
    pub bindings: HashMap<JsString, Value>,
    pub parent: Option<ScopeId>,
    pub global: bool,
}

impl Scope {
    pub fn new(parent: ScopeId) -> Self {
        Scope {
            bindings: HashMap::new(),
            parent: Some(parent),
            global: false,
        }
    }

    pub fn global() -> Self {
        Scope {
            bindings: HashMap::new(),
            parent: None,
            global: true,
        }
    }
}
