//! Stack-oriented embedding API.
//!
//! Embedders talk to the engine through a value stack. Indices are relative
//! to the current call frame: non-negative indices count from the bottom,
//! negative ones from the top (`-1` is the top value). Fallible primitives
//! return [`EngineResult`]; a recoverable failure leaves the thrown value on
//! top of the stack, a fatal one latches the engine and invokes the fatal
//! handler exactly once.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::builtin::{self, Realm};
use crate::error::{EngineResult, ErrorKind, Failure, FatalError, Fault, JsResult};
use crate::gc::{GcStats, Heap, Roots};
use crate::object::{
    Callable, CodeKind, EnumState, JsObject, NativeFunction, ObjectId, ObjectKind, PropertyKey,
    Scope, ScopeId,
};
use crate::parser;
use crate::string::JsString;
use crate::value::{Type, Value};

/// Identity of a heap object, stable while the object is alive.
pub type HeapPtr = ObjectId;

/// Callback invoked when the engine enters the fatal state.
pub type FatalHandler = Box<dyn FnMut(&FatalError)>;

bitflags::bitflags! {
    /// Options for [`Engine::compile`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompileFlags: u32 {
        /// Compile as eval code: calling it yields the completion value.
        const EVAL = 1 << 0;
        /// Source is a single function expression; yields that function.
        const FUNCTION = 1 << 1;
    }
}

bitflags::bitflags! {
    /// Options for [`Engine::push_enumerator`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnumFlags: u32 {
        const INCLUDE_NONENUMERABLE = 1 << 0;
        const OWN_PROPERTIES_ONLY = 1 << 1;
        const ARRAY_INDICES_ONLY = 1 << 2;
        const SORT_ARRAY_INDICES = 1 << 3;
        const INCLUDE_INTERNAL = 1 << 4;
    }
}

/// Engine limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Nested function calls before a RangeError.
    pub max_call_depth: usize,
    /// Nested statement and expression evaluations, summed over all active
    /// calls, before a RangeError.
    pub max_nesting_depth: usize,
    /// Allocations between automatic collections.
    pub gc_threshold: usize,
    /// Live object limit (builtins included); `None` is unlimited.
    pub max_objects: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_call_depth: 100,
            max_nesting_depth: 1024,
            gc_threshold: 4096,
            max_objects: None,
        }
    }
}

impl EngineConfig {
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_gc_threshold(mut self, threshold: usize) -> Self {
        self.gc_threshold = threshold;
        self
    }

    pub fn with_max_objects(mut self, limit: usize) -> Self {
        self.max_objects = Some(limit);
        self
    }
}

/// Call frame of a native function.
pub(crate) struct Frame {
    pub bottom: usize,
    pub this: Value,
}

/// Running script code.
pub(crate) struct Activation {
    pub this: Value,
    pub scope: ScopeId,
    pub name: JsString,
    pub filename: Rc<str>,
    pub line: usize,
    /// Completion value of program and eval code.
    pub completion: Value,
}

/// An engine instance.
pub struct Engine {
    pub(crate) heap: Heap,
    pub(crate) realm: Realm,
    pub(crate) global_scope: ScopeId,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) activations: Vec<Activation>,
    pub(crate) call_depth: usize,
    pub(crate) nesting: usize,
    pub(crate) config: EngineConfig,
    pub(crate) rng_state: u64,
    /// Set while an AllocError is being raised, which may dip into the reserve.
    pub(crate) raising_alloc_error: bool,
    fatal_handler: Option<FatalHandler>,
    fatal: Option<FatalError>,
    gc_pending: bool,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let mut heap = Heap::new();
        let global_scope = heap.alloc_scope(Scope::global());
        let realm = builtin::init(&mut heap);
        log::debug!(
            "[KPIO JS] engine created with {} builtin objects",
            heap.object_count()
        );
        Engine {
            heap,
            realm,
            global_scope,
            stack: Vec::new(),
            frames: Vec::new(),
            activations: Vec::new(),
            call_depth: 0,
            nesting: 0,
            config,
            rng_state: 0x2545_F491_4F6C_DD1D,
            raising_alloc_error: false,
            fatal_handler: None,
            fatal: None,
            gc_pending: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Install the fatal handler. It runs at most once per engine.
    pub fn set_fatal_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&FatalError) + 'static,
    {
        self.fatal_handler = Some(Box::new(handler));
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// Enter the fatal state. Every later fallible primitive fails with the
    /// same fatal error.
    pub fn fatal<S: Into<String>>(&mut self, kind: ErrorKind, message: S) -> Failure {
        self.latch(FatalError::new(kind, message))
    }

    pub(crate) fn latch(&mut self, err: FatalError) -> Failure {
        if let Some(existing) = &self.fatal {
            return Failure::Fatal(existing.clone());
        }
        log::error!("[KPIO JS] {}", err);
        self.fatal = Some(err.clone());
        if let Some(mut handler) = self.fatal_handler.take() {
            handler(&err);
        }
        Failure::Fatal(err)
    }

    fn check_alive(&self) -> EngineResult<()> {
        match &self.fatal {
            Some(err) => Err(Failure::Fatal(err.clone())),
            None => Ok(()),
        }
    }

    /// Convert an interpreter fault into an API failure, leaving a thrown
    /// value on the stack.
    pub(crate) fn fail(&mut self, fault: Fault) -> Failure {
        match fault {
            Fault::Throw(value) => {
                self.stack.push(value);
                Failure::Error
            }
            Fault::Fatal(err) => self.latch(err),
        }
    }

    fn settle<T>(&mut self, result: JsResult<T>) -> EngineResult<T> {
        result.map_err(|fault| self.fail(fault))
    }

    /// Push an error object of `kind` and report it as thrown.
    pub fn throw<S: AsRef<str>>(&mut self, kind: ErrorKind, message: S) -> Failure {
        let fault = self.throw_error(kind, message.as_ref());
        self.fail(fault)
    }

    fn api_error(&mut self, message: &str) -> Failure {
        self.throw(ErrorKind::Api, message)
    }

    // Stack manipulation

    fn frame_bottom(&self) -> usize {
        self.frames.last().map(|f| f.bottom).unwrap_or(0)
    }

    /// Number of values in the current frame.
    pub fn get_top(&self) -> usize {
        self.stack.len() - self.frame_bottom()
    }

    /// Absolute stack position of a frame-relative index.
    fn position(&self, idx: i32) -> Option<usize> {
        let bottom = self.frame_bottom();
        let len = self.stack.len();
        let pos = if idx < 0 {
            len.checked_sub(idx.unsigned_abs() as usize)?
        } else {
            bottom + idx as usize
        };
        if pos < bottom || pos >= len {
            None
        } else {
            Some(pos)
        }
    }

    fn require(&mut self, idx: i32) -> EngineResult<usize> {
        match self.position(idx) {
            Some(pos) => Ok(pos),
            None => Err(self.api_error(&alloc::format!("invalid stack index {}", idx))),
        }
    }

    /// Normalize a relative index to a non-negative frame index.
    pub fn normalize_index(&self, idx: i32) -> Option<i32> {
        self.position(idx).map(|pos| (pos - self.frame_bottom()) as i32)
    }

    pub fn is_valid_index(&self, idx: i32) -> bool {
        self.position(idx).is_some()
    }

    pub(crate) fn value_at(&self, idx: i32) -> Option<&Value> {
        self.position(idx).map(|pos| &self.stack[pos])
    }

    /// Grow with undefined or shrink the current frame to `top` values.
    pub fn set_top(&mut self, top: usize) {
        let bottom = self.frame_bottom();
        self.stack.resize(bottom + top, Value::Undefined);
    }

    pub fn pop(&mut self) -> EngineResult<()> {
        self.pop_n(1)
    }

    pub fn pop_n(&mut self, count: usize) -> EngineResult<()> {
        if count > self.get_top() {
            return Err(self.api_error("stack underflow"));
        }
        let len = self.stack.len();
        self.stack.truncate(len - count);
        Ok(())
    }

    /// Push a copy of the value at `idx`.
    pub fn dup(&mut self, idx: i32) -> EngineResult<()> {
        let pos = self.require(idx)?;
        let value = self.stack[pos].clone();
        self.stack.push(value);
        Ok(())
    }

    /// Remove the value at `idx`, shifting values above it down.
    pub fn remove(&mut self, idx: i32) -> EngineResult<()> {
        let pos = self.require(idx)?;
        self.stack.remove(pos);
        Ok(())
    }

    /// Move the top value to `idx`, shifting values up.
    pub fn insert(&mut self, idx: i32) -> EngineResult<()> {
        let pos = self.require(idx)?;
        if let Some(value) = self.stack.pop() {
            self.stack.insert(pos, value);
        }
        Ok(())
    }

    // Pushing values

    pub fn push_undefined(&mut self) {
        self.stack.push(Value::Undefined);
    }

    pub fn push_null(&mut self) {
        self.stack.push(Value::Null);
    }

    pub fn push_boolean(&mut self, value: bool) {
        self.stack.push(Value::Boolean(value));
    }

    pub fn push_number(&mut self, value: f64) {
        self.stack.push(Value::Number(value));
    }

    /// Push a Rust string, re-encoding it for the engine.
    pub fn push_string(&mut self, value: &str) {
        self.stack.push(Value::String(JsString::new(value)));
    }

    /// Push raw engine string bytes (modified UTF-8, or an internal key).
    pub fn push_lstring(&mut self, bytes: &[u8]) {
        self.stack.push(Value::String(JsString::from_bytes(bytes)));
    }

    pub fn push_pointer(&mut self, ptr: usize) {
        self.stack.push(Value::Pointer(ptr));
    }

    pub fn push_buffer(&mut self, bytes: &[u8]) {
        self.stack
            .push(Value::Buffer(Rc::new(RefCell::new(bytes.to_vec()))));
    }

    pub fn push_object(&mut self) -> EngineResult<()> {
        let result = self.new_object();
        let id = self.settle(result)?;
        self.stack.push(Value::Object(id));
        Ok(())
    }

    pub fn push_array(&mut self) -> EngineResult<()> {
        let result = self.new_array(Vec::new());
        let id = self.settle(result)?;
        self.stack.push(Value::Object(id));
        Ok(())
    }

    pub fn push_global_object(&mut self) {
        self.stack.push(Value::Object(self.realm.global));
    }

    /// Push the `this` binding of the running native function.
    pub fn push_this(&mut self) {
        let this = self
            .frames
            .last()
            .map(|f| f.this.clone())
            .unwrap_or(Value::Undefined);
        self.stack.push(this);
    }

    /// Push a function implemented by the embedder. With `Some(n)` the
    /// frame always holds exactly `n` arguments.
    pub fn push_native_function<F>(&mut self, func: F, nargs: Option<usize>) -> EngineResult<()>
    where
        F: Fn(&mut Engine) -> EngineResult<usize> + 'static,
    {
        let callable = Callable::Native(NativeFunction {
            func: Rc::new(func),
            nargs,
        });
        let length = nargs.unwrap_or(0);
        let result = self.new_function(callable, "", length);
        let id = self.settle(result)?;
        self.stack.push(Value::Object(id));
        Ok(())
    }

    /// Push a new Error object of `kind`.
    pub fn push_error_object(&mut self, kind: ErrorKind, message: &str) -> EngineResult<()> {
        let result = self.make_error(kind, Some(message));
        let id = self.settle(result)?;
        self.stack.push(Value::Object(id));
        Ok(())
    }

    /// Push a live heap object by identity.
    pub fn push_heapptr(&mut self, ptr: HeapPtr) -> EngineResult<()> {
        if self.heap.get(ptr).is_none() {
            return Err(self.api_error("stale heap pointer"));
        }
        self.stack.push(Value::Object(ptr));
        Ok(())
    }

    // Reading values

    pub fn get_type(&self, idx: i32) -> Type {
        self.value_at(idx).map(Value::type_tag).unwrap_or(Type::None)
    }

    pub fn is_array(&self, idx: i32) -> bool {
        match self.value_at(idx) {
            Some(Value::Object(id)) => self.heap.get(*id).map(|o| o.is_array()).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_callable(&self, idx: i32) -> bool {
        self.value_at(idx)
            .map(|v| self.is_callable_value(v))
            .unwrap_or(false)
    }

    pub fn get_boolean(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), Some(Value::Boolean(true)))
    }

    /// Number at `idx`, NaN for non-numbers.
    pub fn get_number(&self, idx: i32) -> f64 {
        match self.value_at(idx) {
            Some(Value::Number(n)) => *n,
            _ => f64::NAN,
        }
    }

    /// Raw engine bytes of the string at `idx`.
    pub fn get_lstring(&self, idx: i32) -> Option<Vec<u8>> {
        match self.value_at(idx) {
            Some(Value::String(s)) => Some(s.as_bytes().to_vec()),
            _ => None,
        }
    }

    /// Lossy Rust view of the string at `idx`.
    pub fn get_string(&self, idx: i32) -> Option<String> {
        match self.value_at(idx) {
            Some(Value::String(s)) => Some(s.to_rust_string()),
            _ => None,
        }
    }

    pub fn get_pointer(&self, idx: i32) -> Option<usize> {
        match self.value_at(idx) {
            Some(Value::Pointer(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn get_buffer(&self, idx: i32) -> Option<Vec<u8>> {
        match self.value_at(idx) {
            Some(Value::Buffer(buf)) => Some(buf.borrow().clone()),
            _ => None,
        }
    }

    /// Array length, string length in code units, or buffer size.
    pub fn get_length(&self, idx: i32) -> usize {
        match self.value_at(idx) {
            Some(Value::String(s)) => s.unit_len(),
            Some(Value::Buffer(buf)) => buf.borrow().len(),
            Some(Value::Object(id)) => self
                .heap
                .get(*id)
                .map(|o| o.array_length() as usize)
                .unwrap_or(0),
            _ => 0,
        }
    }

    pub fn get_heapptr(&self, idx: i32) -> Option<HeapPtr> {
        self.value_at(idx).and_then(Value::as_object)
    }

    /// Coerce the value at `idx` to a string in place.
    pub fn to_string(&mut self, idx: i32) -> EngineResult<()> {
        self.check_alive()?;
        let pos = self.require(idx)?;
        let value = self.stack[pos].clone();
        let result = self.to_js_string(&value);
        let s = self.settle(result)?;
        self.stack[pos] = Value::String(s);
        Ok(())
    }

    /// String form of the value at `idx` for diagnostics. Never throws.
    pub fn safe_to_string(&mut self, idx: i32) -> String {
        let Some(value) = self.value_at(idx).cloned() else {
            return String::from("undefined");
        };
        if self.is_fatal() {
            return String::from("(fatal)");
        }
        match self.to_js_string(&value) {
            Ok(s) => s.to_rust_string(),
            Err(Fault::Fatal(err)) => {
                self.latch(err);
                String::from("(fatal)")
            }
            Err(Fault::Throw(_)) => String::from("Error"),
        }
    }

    // Properties

    fn property_base(&mut self, obj_idx: i32) -> EngineResult<Value> {
        self.check_alive()?;
        let pos = self.require(obj_idx)?;
        Ok(self.stack[pos].clone())
    }

    fn pop_value(&mut self) -> EngineResult<Value> {
        if self.get_top() == 0 {
            return Err(self.api_error("stack underflow"));
        }
        Ok(self.stack.pop().unwrap_or(Value::Undefined))
    }

    /// Replace the key on top with `obj[key]`; reports whether it existed.
    pub fn get_prop(&mut self, obj_idx: i32) -> EngineResult<bool> {
        let base = self.property_base(obj_idx)?;
        let key = self.pop_value()?;
        let result = self.get_prop_value(&base, &key);
        let (value, found) = self.settle(result)?;
        self.stack.push(value);
        Ok(found)
    }

    fn get_prop_value(&mut self, base: &Value, key: &Value) -> JsResult<(Value, bool)> {
        let key = self.to_property_key(key)?;
        let found = self.has_value_property(base, &key)?;
        let value = self.get(base, &key)?;
        Ok((value, found))
    }

    pub fn get_prop_string(&mut self, obj_idx: i32, key: &str) -> EngineResult<bool> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_string(key);
        self.get_prop(obj_idx)
    }

    pub fn get_prop_lstring(&mut self, obj_idx: i32, key: &[u8]) -> EngineResult<bool> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_lstring(key);
        self.get_prop(obj_idx)
    }

    pub fn get_prop_index(&mut self, obj_idx: i32, index: u32) -> EngineResult<bool> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_number(index as f64);
        self.get_prop(obj_idx)
    }

    /// `obj[key] = value` with key and value on top; both are popped.
    pub fn put_prop(&mut self, obj_idx: i32) -> EngineResult<()> {
        let base = self.property_base(obj_idx)?;
        if self.get_top() < 2 {
            return Err(self.api_error("stack underflow"));
        }
        let value = self.pop_value()?;
        let key = self.pop_value()?;
        let result = self
            .to_property_key(&key)
            .and_then(|key| self.put(&base, key, value));
        self.settle(result)
    }

    /// `obj[key] = value` with the value on top.
    pub fn put_prop_string(&mut self, obj_idx: i32, key: &str) -> EngineResult<()> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_string(key);
        self.insert(-2)?;
        self.put_prop(obj_idx)
    }

    pub fn put_prop_lstring(&mut self, obj_idx: i32, key: &[u8]) -> EngineResult<()> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_lstring(key);
        self.insert(-2)?;
        self.put_prop(obj_idx)
    }

    pub fn put_prop_index(&mut self, obj_idx: i32, index: u32) -> EngineResult<()> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_number(index as f64);
        self.insert(-2)?;
        self.put_prop(obj_idx)
    }

    /// Delete `obj[key]` with the key on top.
    pub fn del_prop(&mut self, obj_idx: i32) -> EngineResult<bool> {
        let base = self.property_base(obj_idx)?;
        let key = self.pop_value()?;
        let result = self
            .to_property_key(&key)
            .and_then(|key| self.delete_value_property(&base, &key));
        self.settle(result)
    }

    pub fn del_prop_string(&mut self, obj_idx: i32, key: &str) -> EngineResult<bool> {
        let obj_idx = self.absolute_for_push(obj_idx)?;
        self.push_string(key);
        self.del_prop(obj_idx)
    }

    pub fn has_prop_string(&mut self, obj_idx: i32, key: &str) -> EngineResult<bool> {
        let base = self.property_base(obj_idx)?;
        let key = PropertyKey::from(key);
        let result = self.has_value_property(&base, &key);
        self.settle(result)
    }

    pub fn get_global_string(&mut self, name: &str) -> EngineResult<bool> {
        self.push_global_object();
        let found = self.get_prop_string(-1, name);
        let found = found?;
        self.remove(-2)?;
        Ok(found)
    }

    /// Set a global from the value on top.
    pub fn put_global_string(&mut self, name: &str) -> EngineResult<()> {
        self.push_global_object();
        self.insert(-2)?;
        self.put_prop_string(-2, name)?;
        self.pop()
    }

    /// Negative indices shift when pushing; pin them first.
    fn absolute_for_push(&mut self, idx: i32) -> EngineResult<i32> {
        self.check_alive()?;
        let pos = self.require(idx)?;
        Ok((pos - self.frame_bottom()) as i32)
    }

    // Enumeration

    /// Push an enumerator over the object at `obj_idx`.
    pub fn push_enumerator(&mut self, obj_idx: i32, flags: EnumFlags) -> EngineResult<()> {
        let base = self.property_base(obj_idx)?;
        let result = self.enumeration_keys(&base, flags);
        let keys = self.settle(result)?;
        let state = EnumState {
            target: base,
            keys,
            position: 0,
        };
        let result = self.alloc(JsObject::new(ObjectKind::Enumerator(state), None));
        let id = self.settle(result)?;
        self.stack.push(Value::Object(id));
        Ok(())
    }

    pub(crate) fn enumeration_keys(&mut self, base: &Value, flags: EnumFlags) -> JsResult<Vec<PropertyKey>> {
        let Value::Object(start) = base else {
            return Ok(Vec::new());
        };
        let include_hidden = flags.contains(EnumFlags::INCLUDE_NONENUMERABLE);
        let include_internal = flags.contains(EnumFlags::INCLUDE_INTERNAL);
        let mut keys: Vec<PropertyKey> = Vec::new();
        let mut current = Some(*start);
        while let Some(id) = current {
            let obj = self.obj(id)?;
            for key in obj.own_keys(include_hidden, include_internal) {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            if flags.contains(EnumFlags::OWN_PROPERTIES_ONLY) {
                break;
            }
            current = obj.prototype;
        }
        if flags.contains(EnumFlags::ARRAY_INDICES_ONLY) {
            keys.retain(|k| matches!(k, PropertyKey::Index(_)));
        }
        if flags.contains(EnumFlags::SORT_ARRAY_INDICES) {
            let mut indices: Vec<PropertyKey> = keys
                .iter()
                .filter(|k| matches!(k, PropertyKey::Index(_)))
                .cloned()
                .collect();
            indices.sort_by_key(|k| match k {
                PropertyKey::Index(i) => *i,
                _ => 0,
            });
            keys.retain(|k| !matches!(k, PropertyKey::Index(_)));
            indices.extend(keys);
            keys = indices;
        }
        Ok(keys)
    }

    /// Advance the enumerator at `enum_idx`. On success pushes the key and,
    /// with `get_value`, the value.
    pub fn next(&mut self, enum_idx: i32, get_value: bool) -> EngineResult<bool> {
        let handle = self.property_base(enum_idx)?;
        let result = self.enumerator_step(&handle);
        let step = self.settle(result)?;
        let Some((target, key)) = step else {
            return Ok(false);
        };
        self.stack.push(Value::String(key.to_js_string()));
        if get_value {
            let result = self.get(&target, &key);
            let value = self.settle(result)?;
            self.stack.push(value);
        }
        Ok(true)
    }

    fn enumerator_step(&mut self, handle: &Value) -> JsResult<Option<(Value, PropertyKey)>> {
        let Some(id) = handle.as_object() else {
            return Err(self.throw_error(ErrorKind::Type, "not an enumerator"));
        };
        loop {
            let step = {
                let obj = self.obj_mut(id)?;
                match &mut obj.kind {
                    ObjectKind::Enumerator(state) => match state.keys.get(state.position).cloned() {
                        Some(key) => {
                            state.position += 1;
                            Some(Some((state.target.clone(), key)))
                        }
                        None => Some(None),
                    },
                    _ => None,
                }
            };
            let Some(step) = step else {
                return Err(self.throw_error(ErrorKind::Type, "not an enumerator"));
            };
            let Some((target, key)) = step else {
                return Ok(None);
            };
            // Keys deleted during enumeration are skipped.
            if self.has_value_property(&target, &key)? {
                return Ok(Some((target, key)));
            }
        }
    }

    // Compilation and calls

    /// Compile the source below the filename on top of the stack; both are
    /// replaced by the compiled function.
    pub fn compile(&mut self, flags: CompileFlags) -> EngineResult<()> {
        self.check_alive()?;
        if self.get_top() < 2 {
            return Err(self.api_error("compile needs source and filename"));
        }
        let filename = self.pop_value()?;
        let source = self.pop_value()?;
        let (Value::String(source), Value::String(filename)) = (source, filename) else {
            return Err(self.api_error("source and filename must be strings"));
        };
        let source = source.to_rust_string();
        let filename: Rc<str> = Rc::from(filename.to_rust_string().as_str());
        log::trace!("[KPIO JS] compiling {} ({} bytes)", filename, source.len());

        let result = if flags.contains(CompileFlags::FUNCTION) {
            match parser::parse_function(&source) {
                Ok(node) => self.create_closure(node, self.global_scope, filename, CodeKind::Function),
                Err(err) => Err(self.syntax_error(&err)),
            }
        } else {
            let kind = if flags.contains(CompileFlags::EVAL) {
                CodeKind::Eval
            } else {
                CodeKind::Program
            };
            match parser::parse_program(&source) {
                Ok(node) => {
                    self.create_closure(Rc::new(node), self.global_scope, filename, kind)
                }
                Err(err) => Err(self.syntax_error(&err)),
            }
        };
        let id = self.settle(result)?;
        self.stack.push(Value::Object(id));
        Ok(())
    }

    /// Call the function below `nargs` arguments with an undefined `this`.
    pub fn pcall(&mut self, nargs: usize) -> EngineResult<()> {
        self.check_alive()?;
        if self.get_top() < nargs + 1 {
            return Err(self.api_error("not enough values for call"));
        }
        let args = self.stack.split_off(self.stack.len() - nargs);
        let func = self.pop_value()?;
        let result = self.call(&func, Value::Undefined, args);
        self.finish_call(result)
    }

    /// Call with stack layout `[func, this, args...]`.
    pub fn pcall_method(&mut self, nargs: usize) -> EngineResult<()> {
        self.check_alive()?;
        if self.get_top() < nargs + 2 {
            return Err(self.api_error("not enough values for call"));
        }
        let args = self.stack.split_off(self.stack.len() - nargs);
        let this = self.pop_value()?;
        let func = self.pop_value()?;
        let result = self.call(&func, this, args);
        self.finish_call(result)
    }

    /// Call `obj[key](args...)` with `this` bound to `obj`; stack layout
    /// `[... key, args...]`, object at `obj_idx`.
    pub fn pcall_prop(&mut self, obj_idx: i32, nargs: usize) -> EngineResult<()> {
        let base = self.property_base(obj_idx)?;
        if self.get_top() < nargs + 1 {
            return Err(self.api_error("not enough values for call"));
        }
        let args = self.stack.split_off(self.stack.len() - nargs);
        let key = self.pop_value()?;
        let result = self.call_property(base, &key, args);
        self.finish_call(result)
    }

    fn call_property(&mut self, base: Value, key: &Value, args: Vec<Value>) -> JsResult<Value> {
        let key = self.to_property_key(key)?;
        let func = self.get(&base, &key)?;
        self.call(&func, base, args)
    }

    fn finish_call(&mut self, result: JsResult<Value>) -> EngineResult<()> {
        let outcome = match result {
            Ok(value) => {
                self.stack.push(value);
                Ok(())
            }
            Err(fault) => Err(self.fail(fault)),
        };
        if !matches!(outcome, Err(Failure::Fatal(_))) {
            self.maybe_collect();
        }
        outcome
    }

    // Finalization and collection

    /// Set the finalizer of the object at `idx` to the function on top.
    pub fn set_finalizer(&mut self, idx: i32) -> EngineResult<()> {
        let target = self.property_base(idx)?;
        let finalizer = self.pop_value()?;
        let Some(id) = target.as_object() else {
            return Err(self.throw(ErrorKind::Type, "finalizer target is not an object"));
        };
        let result = self.obj_mut(id).map(|obj| {
            obj.finalizer = if finalizer.is_nullish() {
                None
            } else {
                Some(finalizer)
            };
        });
        self.settle(result)
    }

    /// Run a full collection and pending finalizers. Inside a running call
    /// the collection is deferred to the next safe point.
    pub fn gc(&mut self) -> usize {
        if self.is_fatal() {
            return 0;
        }
        if self.call_depth > 0 {
            self.gc_pending = true;
            return 0;
        }
        self.collect()
    }

    pub fn heap_stats(&self) -> GcStats {
        self.heap.stats()
    }

    fn maybe_collect(&mut self) {
        if self.call_depth > 0 || self.is_fatal() {
            return;
        }
        if self.gc_pending || self.heap.allocations_since_gc() >= self.config.gc_threshold {
            self.gc_pending = false;
            self.collect();
        }
    }

    fn collect(&mut self) -> usize {
        let roots = self.roots();
        let collection = self.heap.collect(&roots);
        log::debug!(
            "[KPIO JS] gc: freed {} objects, {} pending finalizers",
            collection.freed,
            collection.finalize.len()
        );
        for id in collection.finalize {
            self.run_finalizer(id);
        }
        collection.freed
    }

    fn roots(&self) -> Roots {
        let mut values = self.stack.clone();
        values.extend(self.frames.iter().map(|f| f.this.clone()));
        values.extend(self.activations.iter().map(|a| a.this.clone()));
        values.extend(self.activations.iter().map(|a| a.completion.clone()));
        let mut scopes = alloc::vec![self.global_scope];
        scopes.extend(self.activations.iter().map(|a| a.scope));
        Roots {
            values,
            objects: self.realm.roots(),
            scopes,
        }
    }

    fn run_finalizer(&mut self, id: ObjectId) {
        if self.is_fatal() {
            return;
        }
        let Some(finalizer) = self.heap.get(id).and_then(|obj| obj.finalizer.clone()) else {
            return;
        };
        let depth = self.stack.len();
        match self.call(&finalizer, Value::Undefined, alloc::vec![Value::Object(id)]) {
            Ok(_) => {}
            Err(Fault::Throw(value)) => {
                self.stack.push(value);
                let message = self.safe_to_string(-1);
                log::warn!("[KPIO JS] finalizer failed: {}", message);
            }
            Err(Fault::Fatal(err)) => {
                self.latch(err);
            }
        }
        self.stack.truncate(depth);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use core::cell::Cell;

    fn compile_eval(engine: &mut Engine, source: &str) {
        engine.push_string(source);
        engine.push_string("api.js");
        engine.compile(CompileFlags::EVAL).unwrap();
    }

    #[test]
    fn test_stack_indices() {
        let mut engine = Engine::new();
        engine.push_number(1.0);
        engine.push_string("two");
        engine.push_null();
        assert_eq!(engine.get_top(), 3);
        assert_eq!(engine.normalize_index(-1), Some(2));
        assert_eq!(engine.get_type(-2), Type::String);
        assert_eq!(engine.get_type(5), Type::None);
        engine.remove(0).unwrap();
        assert_eq!(engine.get_string(0).as_deref(), Some("two"));
        engine.set_top(0);
        assert_eq!(engine.get_top(), 0);
        assert!(engine.pop().is_err());
        // The api error itself sits on the stack.
        assert_eq!(engine.get_top(), 1);
    }

    #[test]
    fn test_properties_and_globals() {
        let mut engine = Engine::new();
        engine.push_object().unwrap();
        engine.push_number(42.0);
        engine.put_prop_string(-2, "answer").unwrap();
        assert!(engine.get_prop_string(-1, "answer").unwrap());
        assert_eq!(engine.get_number(-1), 42.0);
        engine.pop().unwrap();
        assert!(!engine.get_prop_string(-1, "missing").unwrap());
        assert_eq!(engine.get_type(-1), Type::Undefined);
        engine.pop().unwrap();
        engine.put_global_string("config").unwrap();
        assert_eq!(engine.get_top(), 0);

        compile_eval(&mut engine, "config.answer + 1");
        engine.pcall(0).unwrap();
        assert_eq!(engine.get_number(-1), 43.0);
    }

    #[test]
    fn test_enumerator_skips_internal_keys() {
        let mut engine = Engine::new();
        engine.push_object().unwrap();
        engine.push_number(1.0);
        engine.put_prop_string(-2, "a").unwrap();
        engine.push_pointer(7);
        engine.put_prop_lstring(-2, b"\xFFsecret").unwrap();
        engine
            .push_enumerator(-1, EnumFlags::OWN_PROPERTIES_ONLY)
            .unwrap();
        let mut keys = Vec::new();
        while engine.next(-1, true).unwrap() {
            keys.push(engine.get_string(-2).unwrap_or_default());
            engine.pop_n(2).unwrap();
        }
        assert_eq!(keys, ["a"]);

        engine.pop().unwrap();
        assert!(engine.get_prop_lstring(-1, b"\xFFsecret").unwrap());
        assert_eq!(engine.get_pointer(-1), Some(7));
    }

    #[test]
    fn test_pcall_failure_leaves_error() {
        let mut engine = Engine::new();
        compile_eval(&mut engine, "null.x");
        assert_eq!(engine.pcall(0), Err(Failure::Error));
        assert_eq!(engine.get_top(), 1);
        assert_eq!(engine.safe_to_string(-1), "TypeError: invalid base value");
        engine.pop().unwrap();

        engine.push_string("var = ;");
        engine.push_string("bad.js");
        assert_eq!(engine.compile(CompileFlags::empty()), Err(Failure::Error));
        assert!(engine.safe_to_string(-1).starts_with("SyntaxError: parse error"));
    }

    #[test]
    fn test_native_function_arguments() {
        let mut engine = Engine::new();
        engine
            .push_native_function(
                |engine| {
                    let a = engine.get_number(0);
                    let b = engine.get_number(1);
                    assert_eq!(engine.get_top(), 2);
                    engine.push_number(a * b);
                    Ok(1)
                },
                Some(2),
            )
            .unwrap();
        engine.put_global_string("mul").unwrap();
        compile_eval(&mut engine, "mul(6, 7, 8)");
        engine.pcall(0).unwrap();
        assert_eq!(engine.get_number(-1), 42.0);
    }

    #[test]
    fn test_native_function_throw() {
        let mut engine = Engine::new();
        engine
            .push_native_function(|engine| Err(engine.throw(ErrorKind::Range, "nope")), None)
            .unwrap();
        engine.put_global_string("fail").unwrap();
        compile_eval(&mut engine, "try { fail() } catch (e) { e.name + '/' + e.message }");
        engine.pcall(0).unwrap();
        assert_eq!(engine.get_string(-1).as_deref(), Some("RangeError/nope"));
    }

    #[test]
    fn test_finalizer_runs_once_after_unreachable() {
        let runs = Rc::new(Cell::new(0));
        let mut engine = Engine::new();
        engine.push_object().unwrap();
        let counter = runs.clone();
        engine
            .push_native_function(
                move |_| {
                    counter.set(counter.get() + 1);
                    Ok(0)
                },
                Some(1),
            )
            .unwrap();
        engine.set_finalizer(-2).unwrap();
        engine.gc();
        assert_eq!(runs.get(), 0);
        engine.pop().unwrap();
        engine.gc();
        engine.gc();
        engine.gc();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_fatal_latches_and_calls_handler_once() {
        let calls = Rc::new(Cell::new(0));
        let mut engine = Engine::new();
        let seen = calls.clone();
        engine.set_fatal_handler(move |err| {
            assert_eq!(err.kind, ErrorKind::Internal);
            seen.set(seen.get() + 1);
        });
        let failure = engine.fatal(ErrorKind::Internal, "broken");
        assert!(matches!(failure, Failure::Fatal(_)));
        engine.fatal(ErrorKind::Internal, "again");
        assert_eq!(calls.get(), 1);
        assert!(engine.is_fatal());
        assert!(matches!(engine.push_object(), Err(Failure::Fatal(_))));
        assert_eq!(
            engine.get_global_string("Math").unwrap_err().to_string(),
            "fatal InternalError: broken"
        );
    }
}
