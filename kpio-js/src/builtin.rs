//! Built-in objects and functions.
//!
//! The realm is built directly on the heap before the engine exists. Every
//! builtin is a plain `fn` with interpreter access; methods are installed
//! non-enumerable so `for-in` over script objects never sees them.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::Ordering;
use libm::{fabs, floor};

use crate::api::Engine;
use crate::error::{ErrorKind, JsResult};
use crate::gc::Heap;
use crate::interpreter::primitive_to_string;
use crate::json;
use crate::object::{
    BoundFunction, BuiltinFn, BuiltinFunction, Callable, JsObject, ObjectId, ObjectKind,
    PropertyFlags, PropertyKey, PutOutcome,
};
use crate::string::JsString;
use crate::value::{
    number_to_radix_string, number_to_string, parse_radix_digits, to_int32, to_integer, to_uint32,
    Value,
};

/// Intrinsic objects of the engine.
pub(crate) struct Realm {
    pub global: ObjectId,
    pub object_prototype: ObjectId,
    pub function_prototype: ObjectId,
    pub array_prototype: ObjectId,
    pub string_prototype: ObjectId,
    pub number_prototype: ObjectId,
    pub boolean_prototype: ObjectId,
    /// Indexed by `ErrorKind::index()`.
    pub error_prototypes: Vec<ObjectId>,
}

impl Realm {
    pub fn roots(&self) -> Vec<ObjectId> {
        let mut roots = vec![
            self.global,
            self.object_prototype,
            self.function_prototype,
            self.array_prototype,
            self.string_prototype,
            self.number_prototype,
            self.boolean_prototype,
        ];
        roots.extend_from_slice(&self.error_prototypes);
        roots
    }
}

struct Builder<'a> {
    heap: &'a mut Heap,
    function_prototype: ObjectId,
    global: ObjectId,
}

impl Builder<'_> {
    fn object(&mut self, kind: ObjectKind, proto: ObjectId) -> ObjectId {
        self.heap.alloc(JsObject::new(kind, Some(proto)))
    }

    fn function(&mut self, name: &'static str, length: usize, func: BuiltinFn) -> ObjectId {
        let mut obj = JsObject::function(
            self.function_prototype,
            Callable::Builtin(BuiltinFunction { name, func }),
        );
        obj.define(
            PropertyKey::from("length"),
            Value::Number(length as f64),
            PropertyFlags::empty(),
        );
        obj.define(PropertyKey::from("name"), Value::string(name), PropertyFlags::empty());
        self.heap.alloc(obj)
    }

    fn define(&mut self, target: ObjectId, name: &str, value: Value, flags: PropertyFlags) {
        if let Some(obj) = self.heap.get_mut(target) {
            obj.define(PropertyKey::from(name), value, flags);
        }
    }

    fn method(&mut self, target: ObjectId, name: &'static str, length: usize, func: BuiltinFn) {
        let f = self.function(name, length, func);
        self.define(target, name, Value::Object(f), PropertyFlags::HIDDEN);
    }

    /// Install a global constructor wired to its prototype.
    fn constructor(
        &mut self,
        name: &'static str,
        length: usize,
        func: BuiltinFn,
        prototype: ObjectId,
    ) -> ObjectId {
        let ctor = self.function(name, length, func);
        self.define(ctor, "prototype", Value::Object(prototype), PropertyFlags::empty());
        self.define(prototype, "constructor", Value::Object(ctor), PropertyFlags::HIDDEN);
        let global = self.global;
        self.define(global, name, Value::Object(ctor), PropertyFlags::HIDDEN);
        ctor
    }
}

/// Build the intrinsics and the global object.
pub(crate) fn init(heap: &mut Heap) -> Realm {
    let object_prototype = heap.alloc(JsObject::ordinary(None));
    let function_prototype = heap.alloc(JsObject::function(
        object_prototype,
        Callable::Builtin(BuiltinFunction {
            name: "",
            func: function_prototype_noop,
        }),
    ));
    let global = heap.alloc(JsObject::ordinary(Some(object_prototype)));
    let mut b = Builder {
        heap,
        function_prototype,
        global,
    };

    init_globals(&mut b);
    init_object(&mut b, object_prototype);
    init_function(&mut b);
    let array_prototype = init_array(&mut b, object_prototype);
    let string_prototype = init_string(&mut b, object_prototype);
    let number_prototype = init_number(&mut b, object_prototype);
    let boolean_prototype = init_boolean(&mut b, object_prototype);
    init_math(&mut b, object_prototype);
    init_json(&mut b, object_prototype);
    let error_prototypes = init_errors(&mut b, object_prototype);

    Realm {
        global,
        object_prototype,
        function_prototype,
        array_prototype,
        string_prototype,
        number_prototype,
        boolean_prototype,
        error_prototypes,
    }
}

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn string_arg(engine: &mut Engine, args: &[Value], index: usize) -> JsResult<JsString> {
    engine.to_js_string(&arg(args, index))
}

fn number_arg(engine: &mut Engine, args: &[Value], index: usize) -> JsResult<f64> {
    engine.to_number(&arg(args, index))
}

/// Resolve a relative start/end argument against `len`.
fn relative_index(engine: &mut Engine, value: Option<&Value>, len: usize, default: usize) -> JsResult<usize> {
    let Some(value) = value.filter(|v| !matches!(v, Value::Undefined)) else {
        return Ok(default);
    };
    let n = to_integer(engine.to_number(value)?);
    let len = len as f64;
    Ok(if n < 0.0 {
        (len + n).max(0.0) as usize
    } else {
        n.min(len) as usize
    })
}

fn require_callable(engine: &mut Engine, value: &Value) -> JsResult<()> {
    if engine.is_callable_value(value) {
        Ok(())
    } else {
        Err(engine.throw_error(ErrorKind::Type, "not callable"))
    }
}

/// The wrapper object under construction when a primitive constructor runs
/// through `new`.
fn constructing(engine: &Engine, this: &Value, proto: ObjectId) -> Option<ObjectId> {
    let Value::Object(id) = this else {
        return None;
    };
    let obj = engine.heap.get(*id)?;
    let fresh = matches!(obj.kind, ObjectKind::Ordinary)
        && obj.prototype == Some(proto)
        && obj.properties().is_empty();
    fresh.then_some(*id)
}

// Global functions

fn init_globals(b: &mut Builder) {
    let global = b.global;
    let constant = PropertyFlags::empty();
    b.define(global, "undefined", Value::Undefined, constant);
    b.define(global, "NaN", Value::Number(f64::NAN), constant);
    b.define(global, "Infinity", Value::Number(f64::INFINITY), constant);
    b.method(global, "isNaN", 1, is_nan);
    b.method(global, "isFinite", 1, is_finite);
    b.method(global, "parseInt", 2, parse_int);
    b.method(global, "parseFloat", 1, parse_float);
    b.method(global, "print", 0, print);
    b.method(global, "require", 1, require);
}

fn function_prototype_noop(_engine: &mut Engine, _this: &Value, _args: &[Value]) -> JsResult<Value> {
    Ok(Value::Undefined)
}

fn is_nan(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    Ok(Value::Boolean(number_arg(engine, args, 0)?.is_nan()))
}

fn is_finite(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    Ok(Value::Boolean(number_arg(engine, args, 0)?.is_finite()))
}

fn parse_int(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let input = string_arg(engine, args, 0)?.to_rust_string();
    let mut radix = match arg(args, 1) {
        Value::Undefined => 0,
        other => to_int32(engine.to_number(&other)?),
    };
    let mut s = input.trim_start();
    let negative = s.starts_with('-');
    if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('+')) {
        s = rest;
    }
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return Ok(Value::Number(f64::NAN));
    }
    let end = s
        .char_indices()
        .find(|(_, c)| c.to_digit(radix as u32).is_none())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    let value = parse_radix_digits(&s[..end], radix as u32).unwrap_or(f64::NAN);
    Ok(Value::Number(if negative { -value } else { value }))
}

fn parse_float(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let input = string_arg(engine, args, 0)?.to_rust_string();
    let s = input.trim_start();
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.starts_with("Infinity") {
        let value = if s.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        };
        return Ok(Value::Number(value));
    }
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if !s[digits_start..end].bytes().any(|b| b.is_ascii_digit()) {
        return Ok(Value::Number(f64::NAN));
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    Ok(Value::Number(s[..end].parse::<f64>().unwrap_or(f64::NAN)))
}

fn print(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        parts.push(engine.to_js_string(value)?.to_rust_string());
    }
    log::info!("[KPIO JS] print: {}", parts.join(" "));
    Ok(Value::Undefined)
}

fn require(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = string_arg(engine, args, 0)?;
    Err(engine.throw_error(ErrorKind::Type, &format!("cannot find module: {}", id)))
}

// Object

fn init_object(b: &mut Builder, proto: ObjectId) {
    let ctor = b.constructor("Object", 1, object_constructor, proto);
    b.method(ctor, "keys", 1, object_keys);
    b.method(ctor, "create", 2, object_create);
    b.method(ctor, "getPrototypeOf", 1, object_get_prototype_of);
    b.method(ctor, "defineProperty", 3, object_define_property);
    b.method(proto, "hasOwnProperty", 1, object_has_own_property);
    b.method(proto, "toString", 0, object_to_string);
    b.method(proto, "valueOf", 0, object_value_of);
}

fn object_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    match arg(args, 0) {
        Value::Undefined | Value::Null => Ok(Value::Object(engine.new_object()?)),
        other => Ok(Value::Object(engine.to_object(&other)?)),
    }
}

fn require_object(engine: &mut Engine, value: &Value) -> JsResult<ObjectId> {
    match value {
        Value::Object(id) => Ok(*id),
        _ => Err(engine.throw_error(ErrorKind::Type, "not an object")),
    }
}

fn object_keys(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = require_object(engine, &arg(args, 0))?;
    let keys: Vec<Value> = engine
        .obj(id)?
        .own_keys(false, false)
        .iter()
        .map(|key| Value::String(key.to_js_string()))
        .collect();
    Ok(Value::Object(engine.new_array(keys)?))
}

fn object_create(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let proto = match arg(args, 0) {
        Value::Object(id) => Some(id),
        Value::Null => None,
        _ => return Err(engine.throw_error(ErrorKind::Type, "invalid prototype")),
    };
    Ok(Value::Object(engine.alloc(JsObject::ordinary(proto))?))
}

fn object_get_prototype_of(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = require_object(engine, &arg(args, 0))?;
    Ok(engine
        .obj(id)?
        .prototype
        .map(Value::Object)
        .unwrap_or(Value::Null))
}

/// Data properties only.
fn object_define_property(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let target = arg(args, 0);
    let id = require_object(engine, &target)?;
    let key = engine.to_property_key(&arg(args, 1))?;
    let descriptor = arg(args, 2);
    require_object(engine, &descriptor)?;
    for accessor in ["get", "set"] {
        if engine.has_value_property(&descriptor, &PropertyKey::from(accessor))? {
            return Err(engine.throw_error(ErrorKind::Type, "accessor properties are not supported"));
        }
    }
    let existing = engine.obj(id)?.get_own_property(&key);
    if let Some((_, flags)) = &existing {
        if !flags.contains(PropertyFlags::CONFIGURABLE) {
            return Err(engine.throw_error(ErrorKind::Type, "property is not configurable"));
        }
    }
    let (mut value, mut flags) = existing.unwrap_or((Value::Undefined, PropertyFlags::empty()));
    if engine.has_value_property(&descriptor, &PropertyKey::from("value"))? {
        value = engine.get_named(&descriptor, "value")?;
    }
    for (name, flag) in [
        ("writable", PropertyFlags::WRITABLE),
        ("enumerable", PropertyFlags::ENUMERABLE),
        ("configurable", PropertyFlags::CONFIGURABLE),
    ] {
        if engine.has_value_property(&descriptor, &PropertyKey::from(name))? {
            let enabled = engine.get_named(&descriptor, name)?.to_boolean();
            flags.set(flag, enabled);
        }
    }
    engine.obj_mut(id)?.define(key, value, flags);
    Ok(target)
}

fn object_has_own_property(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let key = engine.to_property_key(&arg(args, 0))?;
    let found = match this {
        Value::Object(id) => engine.obj(*id)?.has_own(&key),
        Value::String(s) => {
            key.is_named("length") || matches!(key, PropertyKey::Index(i) if (i as usize) < s.unit_len())
        }
        Value::Undefined | Value::Null => {
            return Err(engine.throw_error(ErrorKind::Type, "invalid base value"))
        }
        _ => false,
    };
    Ok(Value::Boolean(found))
}

fn object_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let class = match this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Boolean(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Buffer(_) => "Buffer",
        Value::Pointer(_) => "Pointer",
        Value::Object(id) => {
            let obj = engine.obj(*id)?;
            match obj.kind {
                _ if obj.is_callable() => "Function",
                ObjectKind::Array => "Array",
                ObjectKind::Error => "Error",
                ObjectKind::Arguments => "Arguments",
                ObjectKind::Boolean(_) => "Boolean",
                ObjectKind::Number(_) => "Number",
                ObjectKind::String(_) => "String",
                _ => "Object",
            }
        }
    };
    Ok(Value::string(&format!("[object {}]", class)))
}

fn object_value_of(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    Ok(Value::Object(engine.to_object(this)?))
}

// Function

fn init_function(b: &mut Builder) {
    let proto = b.function_prototype;
    b.constructor("Function", 1, function_constructor, proto);
    b.method(proto, "call", 1, function_call);
    b.method(proto, "apply", 2, function_apply);
    b.method(proto, "bind", 1, function_bind);
    b.method(proto, "toString", 0, function_to_string);
}

fn function_constructor(engine: &mut Engine, _this: &Value, _args: &[Value]) -> JsResult<Value> {
    Err(engine.throw_error(ErrorKind::Unsupported, "dynamic function creation is not supported"))
}

fn function_call(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let rest = args.get(1..).map(<[Value]>::to_vec).unwrap_or_default();
    engine.call(this, arg(args, 0), rest)
}

fn function_apply(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let list = array_like_values(engine, &arg(args, 1))?;
    engine.call(this, arg(args, 0), list)
}

fn function_bind(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    require_callable(engine, this)?;
    let Value::Object(target) = this else {
        return Err(engine.throw_error(ErrorKind::Type, "not callable"));
    };
    let bound_args = args.get(1..).map(<[Value]>::to_vec).unwrap_or_default();
    let target_length = match engine.get_named(this, "length")? {
        Value::Number(n) => n as usize,
        _ => 0,
    };
    let length = target_length.saturating_sub(bound_args.len());
    let callable = Callable::Bound(BoundFunction {
        target: *target,
        this: arg(args, 0),
        args: bound_args,
    });
    Ok(Value::Object(engine.new_function(callable, "bound", length)?))
}

fn function_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    require_callable(engine, this)?;
    let name = engine.get_named(this, "name")?;
    let name = engine.to_js_string(&name)?;
    let scripted = match this {
        Value::Object(id) => matches!(engine.obj(*id)?.callable, Some(Callable::Script(_))),
        _ => false,
    };
    let body = if scripted { "[ecmascript code]" } else { "[native code]" };
    Ok(Value::string(&format!("function {}() {{ {} }}", name, body)))
}

/// Arguments list from an array-like value (`apply`).
pub(crate) fn array_like_values(engine: &mut Engine, value: &Value) -> JsResult<Vec<Value>> {
    match value {
        Value::Undefined | Value::Null => Ok(Vec::new()),
        Value::Object(_) => Ok(read_elements(engine, value)?
            .into_iter()
            .map(Option::unwrap_or_default)
            .collect()),
        _ => Err(engine.throw_error(ErrorKind::Type, "invalid argument list")),
    }
}

// Array

fn init_array(b: &mut Builder, object_prototype: ObjectId) -> ObjectId {
    let proto = b.object(ObjectKind::Ordinary, object_prototype);
    let ctor = b.constructor("Array", 1, array_constructor, proto);
    b.method(ctor, "isArray", 1, array_is_array);
    b.method(proto, "push", 1, array_push);
    b.method(proto, "pop", 0, array_pop);
    b.method(proto, "shift", 0, array_shift);
    b.method(proto, "unshift", 1, array_unshift);
    b.method(proto, "slice", 2, array_slice);
    b.method(proto, "splice", 2, array_splice);
    b.method(proto, "concat", 1, array_concat);
    b.method(proto, "join", 1, array_join);
    b.method(proto, "toString", 0, array_to_string);
    b.method(proto, "reverse", 0, array_reverse);
    b.method(proto, "indexOf", 1, array_index_of);
    b.method(proto, "lastIndexOf", 1, array_last_index_of);
    b.method(proto, "forEach", 1, array_for_each);
    b.method(proto, "map", 1, array_map);
    b.method(proto, "filter", 1, array_filter);
    b.method(proto, "reduce", 1, array_reduce);
    b.method(proto, "some", 1, array_some);
    b.method(proto, "every", 1, array_every);
    b.method(proto, "sort", 1, array_sort);
    proto
}

fn array_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    if let [Value::Number(n)] = args {
        let id = engine.new_array(Vec::new())?;
        let valid = *n >= 0.0 && to_uint32(*n) as f64 == *n;
        if !valid || engine.obj_mut(id)?.set_array_length(*n as u32) == PutOutcome::OutOfRange {
            return Err(engine.throw_error(ErrorKind::Range, "invalid array length"));
        }
        return Ok(Value::Object(id));
    }
    Ok(Value::Object(engine.new_array(args.to_vec())?))
}

fn array_is_array(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let is_array = match arg(args, 0) {
        Value::Object(id) => engine.obj(id)?.is_array(),
        _ => false,
    };
    Ok(Value::Boolean(is_array))
}

/// The element-backed object `this`, for mutating methods.
fn this_array(engine: &mut Engine, this: &Value) -> JsResult<ObjectId> {
    if let Value::Object(id) = this {
        if matches!(engine.obj(*id)?.kind, ObjectKind::Array | ObjectKind::Arguments) {
            return Ok(*id);
        }
    }
    Err(engine.throw_error(ErrorKind::Type, "not an array"))
}

/// Snapshot of an array-like's elements; holes are `None`.
fn read_elements(engine: &mut Engine, this: &Value) -> JsResult<Vec<Option<Value>>> {
    if let Value::Object(id) = this {
        let obj = engine.obj(*id)?;
        if matches!(obj.kind, ObjectKind::Array | ObjectKind::Arguments) {
            return Ok(obj.elements().to_vec());
        }
    }
    let length = engine.get_named(this, "length")?;
    let length = to_uint32(engine.to_number(&length)?);
    let mut elements = Vec::new();
    for i in 0..length {
        let key = PropertyKey::Index(i);
        if engine.has_value_property(this, &key)? {
            elements.push(Some(engine.get(this, &key)?));
        } else {
            elements.push(None);
        }
    }
    Ok(elements)
}

fn array_from_slots(engine: &mut Engine, slots: Vec<Option<Value>>) -> JsResult<Value> {
    let id = engine.new_array(Vec::new())?;
    *engine.obj_mut(id)?.elements_mut() = slots;
    Ok(Value::Object(id))
}

fn array_push(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    let elements = engine.obj_mut(id)?.elements_mut();
    elements.extend(args.iter().cloned().map(Some));
    Ok(Value::Number(elements.len() as f64))
}

fn array_pop(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    Ok(engine
        .obj_mut(id)?
        .elements_mut()
        .pop()
        .flatten()
        .unwrap_or_default())
}

fn array_shift(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    let elements = engine.obj_mut(id)?.elements_mut();
    if elements.is_empty() {
        return Ok(Value::Undefined);
    }
    Ok(elements.remove(0).unwrap_or_default())
}

fn array_unshift(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    let elements = engine.obj_mut(id)?.elements_mut();
    elements.splice(0..0, args.iter().cloned().map(Some));
    Ok(Value::Number(elements.len() as f64))
}

fn array_slice(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let elements = read_elements(engine, this)?;
    let len = elements.len();
    let start = relative_index(engine, args.first(), len, 0)?;
    let end = relative_index(engine, args.get(1), len, len)?;
    let slice = if start < end {
        elements[start..end].to_vec()
    } else {
        Vec::new()
    };
    array_from_slots(engine, slice)
}

fn array_splice(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    let len = engine.obj(id)?.elements().len();
    let start = relative_index(engine, args.first(), len, 0)?;
    let count = match args.get(1) {
        None => len - start,
        Some(value) => {
            let n = to_integer(engine.to_number(value)?);
            n.max(0.0).min((len - start) as f64) as usize
        }
    };
    let items = args.get(2..).unwrap_or(&[]).iter().cloned().map(Some);
    let removed: Vec<Option<Value>> = engine
        .obj_mut(id)?
        .elements_mut()
        .splice(start..start + count, items)
        .collect();
    array_from_slots(engine, removed)
}

fn array_concat(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut slots = read_elements(engine, this)?;
    for value in args {
        let spread = match value {
            Value::Object(id) => engine.obj(*id)?.is_array(),
            _ => false,
        };
        if spread {
            slots.extend(read_elements(engine, value)?);
        } else {
            slots.push(Some(value.clone()));
        }
    }
    array_from_slots(engine, slots)
}

fn array_join(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let separator = match arg(args, 0) {
        Value::Undefined => JsString::new(","),
        other => engine.to_js_string(&other)?,
    };
    let elements = read_elements(engine, this)?;
    let mut bytes: Vec<u8> = Vec::new();
    for (i, slot) in elements.iter().enumerate() {
        if i > 0 {
            bytes.extend_from_slice(separator.as_bytes());
        }
        match slot {
            None | Some(Value::Undefined) | Some(Value::Null) => {}
            Some(value) => bytes.extend_from_slice(engine.to_js_string(value)?.as_bytes()),
        }
    }
    Ok(Value::String(JsString::from_bytes(&bytes)))
}

fn array_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    if let Value::Object(id) = this {
        if engine.obj(*id)?.is_array() {
            return array_join(engine, this, &[]);
        }
    }
    object_to_string(engine, this, &[])
}

fn array_reverse(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    engine.obj_mut(id)?.elements_mut().reverse();
    Ok(this.clone())
}

fn array_index_of(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let search = arg(args, 0);
    let elements = read_elements(engine, this)?;
    let start = relative_index(engine, args.get(1), elements.len(), 0)?;
    let found = elements
        .iter()
        .enumerate()
        .skip(start)
        .find(|(_, slot)| matches!(slot, Some(v) if v.strict_equals(&search)))
        .map(|(i, _)| i as f64);
    Ok(Value::Number(found.unwrap_or(-1.0)))
}

fn array_last_index_of(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let search = arg(args, 0);
    let elements = read_elements(engine, this)?;
    let found = elements
        .iter()
        .enumerate()
        .rev()
        .find(|(_, slot)| matches!(slot, Some(v) if v.strict_equals(&search)))
        .map(|(i, _)| i as f64);
    Ok(Value::Number(found.unwrap_or(-1.0)))
}

/// Run `callback(value, index, this)` over present elements until it
/// returns `stop_on`; reports whether it did.
fn iterate(engine: &mut Engine, this: &Value, args: &[Value], mut visit: impl FnMut(usize, &Value, &Value) -> bool) -> JsResult<bool> {
    let callback = arg(args, 0);
    require_callable(engine, &callback)?;
    let this_arg = arg(args, 1);
    let elements = read_elements(engine, this)?;
    for (i, slot) in elements.into_iter().enumerate() {
        let Some(value) = slot else {
            continue;
        };
        let result = engine.call(
            &callback,
            this_arg.clone(),
            vec![value.clone(), Value::Number(i as f64), this.clone()],
        )?;
        if visit(i, &value, &result) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn array_for_each(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    iterate(engine, this, args, |_, _, _| false)?;
    Ok(Value::Undefined)
}

fn array_map(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut mapped: Vec<Option<Value>> = Vec::new();
    iterate(engine, this, args, |i, _, result| {
        mapped.resize(i, None);
        mapped.push(Some(result.clone()));
        false
    })?;
    let len = read_elements(engine, this)?.len();
    mapped.resize(len, None);
    array_from_slots(engine, mapped)
}

fn array_filter(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut kept = Vec::new();
    iterate(engine, this, args, |_, value, result| {
        if result.to_boolean() {
            kept.push(value.clone());
        }
        false
    })?;
    Ok(Value::Object(engine.new_array(kept)?))
}

fn array_some(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let found = iterate(engine, this, args, |_, _, result| result.to_boolean())?;
    Ok(Value::Boolean(found))
}

fn array_every(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let failed = iterate(engine, this, args, |_, _, result| !result.to_boolean())?;
    Ok(Value::Boolean(!failed))
}

fn array_reduce(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let callback = arg(args, 0);
    require_callable(engine, &callback)?;
    let elements = read_elements(engine, this)?;
    let mut present = elements
        .into_iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.map(|v| (i, v)));
    let mut accumulator = match args.get(1) {
        Some(initial) => initial.clone(),
        None => match present.next() {
            Some((_, first)) => first,
            None => {
                return Err(engine.throw_error(
                    ErrorKind::Type,
                    "reduce of empty array with no initial value",
                ))
            }
        },
    };
    for (i, value) in present {
        accumulator = engine.call(
            &callback,
            Value::Undefined,
            vec![accumulator, value, Value::Number(i as f64), this.clone()],
        )?;
    }
    Ok(accumulator)
}

fn array_sort(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let id = this_array(engine, this)?;
    let comparator = arg(args, 0);
    if !matches!(comparator, Value::Undefined) {
        require_callable(engine, &comparator)?;
    }
    let elements = engine.obj(id)?.elements().to_vec();
    let len = elements.len();
    let mut defined = Vec::new();
    let mut undefined = 0;
    for slot in elements.into_iter().flatten() {
        match slot {
            Value::Undefined => undefined += 1,
            value => defined.push(value),
        }
    }
    let sorted = merge_sort(engine, defined, &comparator)?;
    let mut slots: Vec<Option<Value>> = sorted.into_iter().map(Some).collect();
    slots.extend((0..undefined).map(|_| Some(Value::Undefined)));
    slots.resize(len, None);
    *engine.obj_mut(id)?.elements_mut() = slots;
    Ok(this.clone())
}

/// Stable sort with a fallible comparator.
fn merge_sort(engine: &mut Engine, mut values: Vec<Value>, comparator: &Value) -> JsResult<Vec<Value>> {
    if values.len() <= 1 {
        return Ok(values);
    }
    let right = values.split_off(values.len() / 2);
    let left = merge_sort(engine, values, comparator)?;
    let right = merge_sort(engine, right, comparator)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if sort_compare(engine, &right[j], &left[i], comparator)? == Ordering::Less {
            merged.push(right[j].clone());
            j += 1;
        } else {
            merged.push(left[i].clone());
            i += 1;
        }
    }
    merged.extend_from_slice(&left[i..]);
    merged.extend_from_slice(&right[j..]);
    Ok(merged)
}

fn sort_compare(engine: &mut Engine, a: &Value, b: &Value, comparator: &Value) -> JsResult<Ordering> {
    if matches!(comparator, Value::Undefined) {
        let a = engine.to_js_string(a)?.units();
        let b = engine.to_js_string(b)?.units();
        return Ok(a.cmp(&b));
    }
    let result = engine.call(comparator, Value::Undefined, vec![a.clone(), b.clone()])?;
    let n = engine.to_number(&result)?;
    Ok(if n < 0.0 {
        Ordering::Less
    } else if n > 0.0 {
        Ordering::Greater
    } else {
        Ordering::Equal
    })
}

// String

fn init_string(b: &mut Builder, object_prototype: ObjectId) -> ObjectId {
    let proto = b.object(ObjectKind::String(JsString::empty()), object_prototype);
    let ctor = b.constructor("String", 1, string_constructor, proto);
    b.method(ctor, "fromCharCode", 1, string_from_char_code);
    b.method(proto, "toString", 0, string_value_of);
    b.method(proto, "valueOf", 0, string_value_of);
    b.method(proto, "charAt", 1, string_char_at);
    b.method(proto, "charCodeAt", 1, string_char_code_at);
    b.method(proto, "indexOf", 1, string_index_of);
    b.method(proto, "lastIndexOf", 1, string_last_index_of);
    b.method(proto, "slice", 2, string_slice);
    b.method(proto, "substring", 2, string_substring);
    b.method(proto, "substr", 2, string_substr);
    b.method(proto, "toUpperCase", 0, string_to_upper_case);
    b.method(proto, "toLowerCase", 0, string_to_lower_case);
    b.method(proto, "trim", 0, string_trim);
    b.method(proto, "split", 2, string_split);
    b.method(proto, "replace", 2, string_replace);
    b.method(proto, "concat", 1, string_concat);
    proto
}

fn string_constructor(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let s = if args.is_empty() {
        JsString::empty()
    } else {
        string_arg(engine, args, 0)?
    };
    if let Some(id) = constructing(engine, this, engine.realm.string_prototype) {
        engine.obj_mut(id)?.kind = ObjectKind::String(s);
        return Ok(Value::Object(id));
    }
    Ok(Value::String(s))
}

fn string_from_char_code(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut units = Vec::with_capacity(args.len());
    for value in args {
        units.push(to_uint32(engine.to_number(value)?) as u16);
    }
    Ok(Value::String(JsString::from_units(&units)))
}

/// `this` coerced to a string, as string methods are generic.
fn this_string(engine: &mut Engine, this: &Value) -> JsResult<JsString> {
    match this {
        Value::String(s) => Ok(s.clone()),
        Value::Undefined | Value::Null => {
            Err(engine.throw_error(ErrorKind::Type, "invalid base value"))
        }
        other => engine.to_js_string(other),
    }
}

fn string_value_of(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    match this {
        Value::String(_) => Ok(this.clone()),
        Value::Object(id) => match &engine.obj(*id)?.kind {
            ObjectKind::String(s) => Ok(Value::String(s.clone())),
            _ => Err(engine.throw_error(ErrorKind::Type, "not a string")),
        },
        _ => Err(engine.throw_error(ErrorKind::Type, "not a string")),
    }
}

fn string_char_at(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let pos = to_integer(number_arg(engine, args, 0)?);
    let unit = (pos >= 0.0).then(|| units.get(pos as usize)).flatten();
    Ok(Value::String(match unit {
        Some(unit) => JsString::from_units(&[*unit]),
        None => JsString::empty(),
    }))
}

fn string_char_code_at(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let pos = to_integer(number_arg(engine, args, 0)?);
    let unit = (pos >= 0.0).then(|| units.get(pos as usize)).flatten();
    Ok(Value::Number(unit.map(|u| *u as f64).unwrap_or(f64::NAN)))
}

fn find_units(haystack: &[u16], needle: &[u16], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    (from..haystack.len())
        .take_while(|i| i + needle.len() <= haystack.len())
        .find(|&i| haystack[i..i + needle.len()] == *needle)
}

fn string_index_of(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let search = string_arg(engine, args, 0)?.units();
    let from = relative_index(engine, args.get(1), units.len(), 0)?;
    let found = find_units(&units, &search, from).map(|i| i as f64);
    Ok(Value::Number(found.unwrap_or(-1.0)))
}

fn string_last_index_of(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let search = string_arg(engine, args, 0)?.units();
    let found = (0..=units.len())
        .rev()
        .filter(|i| i + search.len() <= units.len())
        .find(|&i| units[i..i + search.len()] == *search)
        .map(|i| i as f64);
    Ok(Value::Number(found.unwrap_or(-1.0)))
}

fn string_slice(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let start = relative_index(engine, args.first(), units.len(), 0)?;
    let end = relative_index(engine, args.get(1), units.len(), units.len())?;
    let slice = if start < end { &units[start..end] } else { &[][..] };
    Ok(Value::String(JsString::from_units(slice)))
}

fn string_substring(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let len = units.len() as f64;
    let clamp = |n: f64| to_integer(n).max(0.0).min(len) as usize;
    let start = clamp(number_arg(engine, args, 0)?);
    let end = match args.get(1) {
        None | Some(Value::Undefined) => units.len(),
        Some(value) => clamp(engine.to_number(value)?),
    };
    let (start, end) = if start <= end { (start, end) } else { (end, start) };
    Ok(Value::String(JsString::from_units(&units[start..end])))
}

fn string_substr(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let start = relative_index(engine, args.first(), units.len(), 0)?;
    let count = match args.get(1) {
        None | Some(Value::Undefined) => units.len() - start,
        Some(value) => {
            let n = to_integer(engine.to_number(value)?);
            n.max(0.0).min((units.len() - start) as f64) as usize
        }
    };
    Ok(Value::String(JsString::from_units(&units[start..start + count])))
}

fn string_to_upper_case(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let s = this_string(engine, this)?.to_rust_string();
    Ok(Value::string(&s.to_uppercase()))
}

fn string_to_lower_case(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let s = this_string(engine, this)?.to_rust_string();
    Ok(Value::string(&s.to_lowercase()))
}

fn is_js_whitespace(unit: u16) -> bool {
    unit == 0xFEFF || char::from_u32(unit as u32).map(char::is_whitespace).unwrap_or(false)
}

fn string_trim(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let units = this_string(engine, this)?.units();
    let start = units.iter().position(|u| !is_js_whitespace(*u)).unwrap_or(units.len());
    let end = units
        .iter()
        .rposition(|u| !is_js_whitespace(*u))
        .map(|i| i + 1)
        .unwrap_or(start);
    Ok(Value::String(JsString::from_units(&units[start..end.max(start)])))
}

fn string_split(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let s = this_string(engine, this)?;
    let limit = match arg(args, 1) {
        Value::Undefined => u32::MAX as usize,
        other => to_uint32(engine.to_number(&other)?) as usize,
    };
    let mut parts = Vec::new();
    match arg(args, 0) {
        Value::Undefined => parts.push(Value::String(s)),
        separator => {
            let units = s.units();
            let separator = engine.to_js_string(&separator)?.units();
            if separator.is_empty() {
                parts.extend(units.iter().map(|u| Value::String(JsString::from_units(&[*u]))));
            } else {
                let mut start = 0;
                while let Some(found) = find_units(&units, &separator, start) {
                    parts.push(Value::String(JsString::from_units(&units[start..found])));
                    start = found + separator.len();
                }
                parts.push(Value::String(JsString::from_units(&units[start..])));
            }
        }
    }
    parts.truncate(limit);
    Ok(Value::Object(engine.new_array(parts)?))
}

/// Replaces the first occurrence of a string pattern.
fn string_replace(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let s = this_string(engine, this)?;
    let units = s.units();
    let pattern = string_arg(engine, args, 0)?;
    let Some(found) = find_units(&units, &pattern.units(), 0) else {
        return Ok(Value::String(s));
    };
    let replacement = arg(args, 1);
    let replacement = if engine.is_callable_value(&replacement) {
        let result = engine.call(
            &replacement,
            Value::Undefined,
            vec![
                Value::String(pattern.clone()),
                Value::Number(found as f64),
                Value::String(s.clone()),
            ],
        )?;
        engine.to_js_string(&result)?
    } else {
        engine.to_js_string(&replacement)?
    };
    let mut out = units[..found].to_vec();
    out.extend(replacement.units());
    out.extend_from_slice(&units[found + pattern.unit_len()..]);
    Ok(Value::String(JsString::from_units(&out)))
}

fn string_concat(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut s = this_string(engine, this)?;
    for value in args {
        s = s.concat(&engine.to_js_string(value)?);
    }
    Ok(Value::String(s))
}

// Number

fn init_number(b: &mut Builder, object_prototype: ObjectId) -> ObjectId {
    let proto = b.object(ObjectKind::Number(0.0), object_prototype);
    let ctor = b.constructor("Number", 1, number_constructor, proto);
    let constant = PropertyFlags::empty();
    b.define(ctor, "MAX_VALUE", Value::Number(f64::MAX), constant);
    b.define(ctor, "MIN_VALUE", Value::Number(5e-324), constant);
    b.define(ctor, "NaN", Value::Number(f64::NAN), constant);
    b.define(ctor, "POSITIVE_INFINITY", Value::Number(f64::INFINITY), constant);
    b.define(ctor, "NEGATIVE_INFINITY", Value::Number(f64::NEG_INFINITY), constant);
    b.method(proto, "toString", 1, number_to_string_method);
    b.method(proto, "toFixed", 1, number_to_fixed);
    b.method(proto, "valueOf", 0, number_value_of);
    proto
}

fn number_constructor(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let n = if args.is_empty() {
        0.0
    } else {
        number_arg(engine, args, 0)?
    };
    if let Some(id) = constructing(engine, this, engine.realm.number_prototype) {
        engine.obj_mut(id)?.kind = ObjectKind::Number(n);
        return Ok(Value::Object(id));
    }
    Ok(Value::Number(n))
}

fn this_number(engine: &mut Engine, this: &Value) -> JsResult<f64> {
    match this {
        Value::Number(n) => return Ok(*n),
        Value::Object(id) => {
            if let ObjectKind::Number(n) = engine.obj(*id)?.kind {
                return Ok(n);
            }
        }
        _ => {}
    }
    Err(engine.throw_error(ErrorKind::Type, "not a number"))
}

fn number_to_string_method(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let n = this_number(engine, this)?;
    let radix = match arg(args, 0) {
        Value::Undefined => 10.0,
        other => to_integer(engine.to_number(&other)?),
    };
    if !(2.0..=36.0).contains(&radix) {
        return Err(engine.throw_error(ErrorKind::Range, "invalid radix"));
    }
    Ok(Value::string(&number_to_radix_string(n, radix as u32)))
}

fn number_to_fixed(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let n = this_number(engine, this)?;
    let digits = to_integer(number_arg(engine, args, 0)?);
    if !(0.0..=20.0).contains(&digits) {
        return Err(engine.throw_error(ErrorKind::Range, "invalid number of digits"));
    }
    if !n.is_finite() || fabs(n) >= 1e21 {
        return Ok(Value::string(&number_to_string(n)));
    }
    // Avoid "-0.00".
    let n = if n == 0.0 { 0.0 } else { n };
    Ok(Value::string(&format!("{:.*}", digits as usize, n)))
}

fn number_value_of(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    Ok(Value::Number(this_number(engine, this)?))
}

// Boolean

fn init_boolean(b: &mut Builder, object_prototype: ObjectId) -> ObjectId {
    let proto = b.object(ObjectKind::Boolean(false), object_prototype);
    b.constructor("Boolean", 1, boolean_constructor, proto);
    b.method(proto, "toString", 0, boolean_to_string);
    b.method(proto, "valueOf", 0, boolean_value_of);
    proto
}

fn boolean_constructor(engine: &mut Engine, this: &Value, args: &[Value]) -> JsResult<Value> {
    let value = arg(args, 0).to_boolean();
    if let Some(id) = constructing(engine, this, engine.realm.boolean_prototype) {
        engine.obj_mut(id)?.kind = ObjectKind::Boolean(value);
        return Ok(Value::Object(id));
    }
    Ok(Value::Boolean(value))
}

fn this_boolean(engine: &mut Engine, this: &Value) -> JsResult<bool> {
    match this {
        Value::Boolean(b) => return Ok(*b),
        Value::Object(id) => {
            if let ObjectKind::Boolean(b) = engine.obj(*id)?.kind {
                return Ok(b);
            }
        }
        _ => {}
    }
    Err(engine.throw_error(ErrorKind::Type, "not a boolean"))
}

fn boolean_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    let b = this_boolean(engine, this)?;
    Ok(Value::String(primitive_to_string(&Value::Boolean(b))))
}

fn boolean_value_of(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    Ok(Value::Boolean(this_boolean(engine, this)?))
}

// Math

fn init_math(b: &mut Builder, object_prototype: ObjectId) {
    let math = b.object(ObjectKind::Ordinary, object_prototype);
    let global = b.global;
    b.define(global, "Math", Value::Object(math), PropertyFlags::HIDDEN);
    let constant = PropertyFlags::empty();
    for (name, value) in [
        ("PI", core::f64::consts::PI),
        ("E", core::f64::consts::E),
        ("LN2", core::f64::consts::LN_2),
        ("LN10", core::f64::consts::LN_10),
        ("LOG2E", core::f64::consts::LOG2_E),
        ("LOG10E", core::f64::consts::LOG10_E),
        ("SQRT2", core::f64::consts::SQRT_2),
        ("SQRT1_2", core::f64::consts::FRAC_1_SQRT_2),
    ] {
        b.define(math, name, Value::Number(value), constant);
    }
    b.method(math, "abs", 1, math_abs);
    b.method(math, "floor", 1, math_floor);
    b.method(math, "ceil", 1, math_ceil);
    b.method(math, "round", 1, math_round);
    b.method(math, "sqrt", 1, math_sqrt);
    b.method(math, "pow", 2, math_pow);
    b.method(math, "min", 2, math_min);
    b.method(math, "max", 2, math_max);
    b.method(math, "sin", 1, math_sin);
    b.method(math, "cos", 1, math_cos);
    b.method(math, "tan", 1, math_tan);
    b.method(math, "asin", 1, math_asin);
    b.method(math, "acos", 1, math_acos);
    b.method(math, "atan", 1, math_atan);
    b.method(math, "atan2", 2, math_atan2);
    b.method(math, "log", 1, math_log);
    b.method(math, "exp", 1, math_exp);
    b.method(math, "random", 0, math_random);
}

fn unary_math(engine: &mut Engine, args: &[Value], f: fn(f64) -> f64) -> JsResult<Value> {
    Ok(Value::Number(f(number_arg(engine, args, 0)?)))
}

fn math_abs(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, fabs)
}

fn math_floor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, floor)
}

fn math_ceil(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::ceil)
}

fn math_round(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, |x| if x.is_finite() { floor(x + 0.5) } else { x })
}

fn math_sqrt(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::sqrt)
}

fn math_sin(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::sin)
}

fn math_cos(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::cos)
}

fn math_tan(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::tan)
}

fn math_asin(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::asin)
}

fn math_acos(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::acos)
}

fn math_atan(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::atan)
}

fn math_log(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::log)
}

fn math_exp(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    unary_math(engine, args, libm::exp)
}

fn math_atan2(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let y = number_arg(engine, args, 0)?;
    let x = number_arg(engine, args, 1)?;
    Ok(Value::Number(libm::atan2(y, x)))
}

fn math_pow(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let base = number_arg(engine, args, 0)?;
    let exponent = number_arg(engine, args, 1)?;
    if exponent.is_nan() {
        return Ok(Value::Number(f64::NAN));
    }
    Ok(Value::Number(libm::pow(base, exponent)))
}

fn math_min(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut result = f64::INFINITY;
    for value in args {
        let n = engine.to_number(value)?;
        if n.is_nan() || result.is_nan() {
            result = f64::NAN;
        } else if n < result {
            result = n;
        }
    }
    Ok(Value::Number(result))
}

fn math_max(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let mut result = f64::NEG_INFINITY;
    for value in args {
        let n = engine.to_number(value)?;
        if n.is_nan() || result.is_nan() {
            result = f64::NAN;
        } else if n > result {
            result = n;
        }
    }
    Ok(Value::Number(result))
}

/// xorshift64; not suitable for anything security related.
fn math_random(engine: &mut Engine, _this: &Value, _args: &[Value]) -> JsResult<Value> {
    let mut x = engine.rng_state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    engine.rng_state = x;
    Ok(Value::Number((x >> 11) as f64 / (1u64 << 53) as f64))
}

// JSON

fn init_json(b: &mut Builder, object_prototype: ObjectId) {
    let json = b.object(ObjectKind::Ordinary, object_prototype);
    let global = b.global;
    b.define(global, "JSON", Value::Object(json), PropertyFlags::HIDDEN);
    b.method(json, "stringify", 3, json::stringify);
    b.method(json, "parse", 2, json::parse);
}

// Errors

fn init_errors(b: &mut Builder, object_prototype: ObjectId) -> Vec<ObjectId> {
    let base = b.object(ObjectKind::Error, object_prototype);
    b.method(base, "toString", 0, error_to_string);
    let mut prototypes = Vec::with_capacity(ErrorKind::ALL.len());
    for kind in ErrorKind::ALL {
        let proto = if kind == ErrorKind::Error {
            base
        } else {
            b.object(ObjectKind::Error, base)
        };
        b.define(proto, "name", Value::string(kind.name()), PropertyFlags::HIDDEN);
        b.define(proto, "message", Value::string(""), PropertyFlags::HIDDEN);
        let constructor: Option<BuiltinFn> = match kind {
            ErrorKind::Error => Some(error_constructor),
            ErrorKind::Eval => Some(eval_error_constructor),
            ErrorKind::Range => Some(range_error_constructor),
            ErrorKind::Reference => Some(reference_error_constructor),
            ErrorKind::Syntax => Some(syntax_error_constructor),
            ErrorKind::Type => Some(type_error_constructor),
            ErrorKind::Uri => Some(uri_error_constructor),
            _ => None,
        };
        if let Some(constructor) = constructor {
            b.constructor(kind.name(), 1, constructor, proto);
        }
        prototypes.push(proto);
    }
    prototypes
}

fn construct_error(engine: &mut Engine, kind: ErrorKind, args: &[Value]) -> JsResult<Value> {
    let message = match arg(args, 0) {
        Value::Undefined => None,
        other => Some(engine.to_js_string(&other)?.to_rust_string()),
    };
    Ok(Value::Object(engine.make_error(kind, message.as_deref())?))
}

fn error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Error, args)
}

fn eval_error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Eval, args)
}

fn range_error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Range, args)
}

fn reference_error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Reference, args)
}

fn syntax_error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Syntax, args)
}

fn type_error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Type, args)
}

fn uri_error_constructor(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    construct_error(engine, ErrorKind::Uri, args)
}

fn error_to_string(engine: &mut Engine, this: &Value, _args: &[Value]) -> JsResult<Value> {
    if !matches!(this, Value::Object(_)) {
        return Err(engine.throw_error(ErrorKind::Type, "not an object"));
    }
    let name = match engine.get_named(this, "name")? {
        Value::Undefined => JsString::new("Error"),
        other => engine.to_js_string(&other)?,
    };
    let message = match engine.get_named(this, "message")? {
        Value::Undefined => JsString::empty(),
        other => engine.to_js_string(&other)?,
    };
    if name.is_empty() {
        return Ok(Value::String(message));
    }
    if message.is_empty() {
        return Ok(Value::String(name));
    }
    Ok(Value::String(name.concat(&JsString::new(": ")).concat(&message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CompileFlags;
    use alloc::string::ToString;

    fn eval_to_string(source: &str) -> String {
        let mut engine = Engine::new();
        engine.push_string(source);
        engine.push_string("builtin.js");
        engine.compile(CompileFlags::EVAL).unwrap();
        let ok = engine.pcall(0).is_ok();
        let text = engine.safe_to_string(-1);
        assert!(ok, "{} threw {}", source, text);
        text
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(eval_to_string("[1, 2, 3].map(function (x) { return x * 2 }).join('-')"), "2-4-6");
        assert_eq!(eval_to_string("[5, 1, 10].sort().join()"), "1,10,5");
        assert_eq!(
            eval_to_string("[5, 1, 10].sort(function (a, b) { return a - b }).join()"),
            "1,5,10"
        );
        assert_eq!(eval_to_string("[1, 2, 3, 4].filter(function (x) { return x % 2 }).length"), "2");
        assert_eq!(
            eval_to_string("[1, 2, 3].reduce(function (a, b) { return a + b })"),
            "6"
        );
        assert_eq!(eval_to_string("var a = [1, 2, 3, 4]; a.splice(1, 2, 'x'); a.join()"), "1,x,4");
        assert_eq!(eval_to_string("[1].concat([2, 3], 4).join()"), "1,2,3,4");
        assert_eq!(eval_to_string("[1, 2, 3].slice(-2).join()"), "2,3");
        assert_eq!(eval_to_string("[1, [2, 3]].toString()"), "1,2,3");
    }

    #[test]
    fn test_reduce_over_concat_in_nested_calls() {
        let source = "function sum(list) { return list.reduce(function (a, b) { return a + b }, 0) }
                      function grow(list, n) { return n == 0 ? list : grow(list.concat([n]), n - 1) }
                      sum(grow([], 20))";
        assert_eq!(eval_to_string(source), "210");
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(eval_to_string("'a,b,,c'.split(',').length"), "4");
        assert_eq!(eval_to_string("'Hello'.toUpperCase()"), "HELLO");
        assert_eq!(eval_to_string("'  pad  '.trim()"), "pad");
        assert_eq!(eval_to_string("'abcdef'.substring(4, 1)"), "bcd");
        assert_eq!(eval_to_string("'abcdef'.substr(-3, 2)"), "de");
        assert_eq!(eval_to_string("'abcabc'.lastIndexOf('b')"), "4");
        assert_eq!(eval_to_string("'x-y'.replace('-', '+')"), "x+y");
        assert_eq!(eval_to_string("String.fromCharCode(104, 105)"), "hi");
        assert_eq!(eval_to_string("'abc'.charCodeAt(1)"), "98");
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(eval_to_string("(255).toString(16)"), "ff");
        assert_eq!(eval_to_string("(1.005).toFixed(1)"), "1.0");
        assert_eq!(eval_to_string("(-0).toFixed(2)"), "0.00");
        assert_eq!(eval_to_string("parseInt('0x1F')"), "31");
        assert_eq!(eval_to_string("parseInt('12px', 10)"), "12");
        assert_eq!(eval_to_string("parseFloat('3.5e2xyz')"), "350");
        assert_eq!(eval_to_string("Math.pow(2, 10)"), "1024");
        assert_eq!(eval_to_string("Math.max(1, 7, 3)"), "7");
    }

    #[test]
    fn test_bound_functions() {
        assert_eq!(
            eval_to_string("function add(a, b) { return a + b } add.bind(null, 40)(2)"),
            "42"
        );
        assert_eq!(
            eval_to_string(
                "function P(x) { this.x = x } var B = P.bind(null, 7); var p = new B(); p.x + ':' + (p instanceof P)"
            ),
            "7:true"
        );
    }

    #[test]
    fn test_error_constructors() {
        assert_eq!(eval_to_string("new RangeError('too far').toString()"), "RangeError: too far");
        assert_eq!(eval_to_string("String(new TypeError())"), "TypeError");
        assert_eq!(eval_to_string("new Error('x') instanceof Error"), "true");
        assert_eq!(eval_to_string("new SyntaxError('x') instanceof Error"), "true");
        assert_eq!(eval_to_string("Object.prototype.toString.call([])"), "[object Array]");
    }

    #[test]
    fn test_primitive_wrappers() {
        assert_eq!(eval_to_string("typeof new Number(5)"), "object");
        assert_eq!(eval_to_string("new Number(5) + 1"), "6");
        assert_eq!(eval_to_string("new String('ab').length"), "2");
        assert_eq!(eval_to_string("typeof String(5)"), "string");
    }

    #[test]
    fn test_require_is_defined_by_default() {
        let mut engine = Engine::new();
        assert!(engine.get_global_string("require").unwrap());
        assert!(engine.is_callable(-1));
        assert_eq!(ErrorKind::Type.name().to_string(), "TypeError");
    }
}
