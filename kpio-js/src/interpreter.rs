//! Tree-walking interpreter.
//!
//! Script code runs directly off the AST. Every function call pushes an
//! activation that carries `this`, the scope chain head and the location
//! used for error stack traces.

use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use libm::{fmod, trunc};

use crate::api::{Activation, EnumFlags, Engine};
use crate::ast::*;
use crate::error::{ErrorKind, Failure, FatalError, Fault, JsResult, ParseError};
use crate::object::{
    Callable, CodeKind, JsObject, NativeFunction, ObjectId, ObjectKind, PropertyFlags, PropertyKey,
    PutOutcome, Scope, ScopeId, ScriptFunction,
};
use crate::string::JsString;
use crate::value::{number_to_string, to_int32, to_uint32, Value};

/// Objects that may still be allocated past `max_objects` to report the
/// AllocError itself.
const ALLOC_RESERVE: usize = 16;

/// Frames listed in an error's `stack`.
const MAX_TRACE_FRAMES: usize = 10;

/// Statement completion.
#[derive(Debug)]
pub(crate) enum Completion {
    Normal,
    Return(Value),
    Break,
    Continue,
}

/// Assignment target.
enum Reference {
    Binding(JsString),
    Property(Value, PropertyKey),
}

/// String form of a primitive.
pub(crate) fn primitive_to_string(value: &Value) -> JsString {
    match value {
        Value::Undefined => JsString::new("undefined"),
        Value::Null => JsString::new("null"),
        Value::Boolean(true) => JsString::new("true"),
        Value::Boolean(false) => JsString::new("false"),
        Value::Number(n) => JsString::new(&number_to_string(*n)),
        Value::String(s) => s.clone(),
        Value::Buffer(buf) => JsString::new(&format!("[buffer {}]", buf.borrow().len())),
        Value::Pointer(p) => JsString::new(&format!("{:#x}", p)),
        Value::Object(_) => JsString::new("[object Object]"),
    }
}

/// `a < b` on primitives; `None` when either side is NaN.
fn less_than(a: &Value, b: &Value) -> Option<bool> {
    if let (Value::String(a), Value::String(b)) = (a, b) {
        return Some(a.units() < b.units());
    }
    let (x, y) = (a.primitive_to_number(), b.primitive_to_number());
    if x.is_nan() || y.is_nan() {
        None
    } else {
        Some(x < y)
    }
}

impl Engine {
    // Heap access

    pub(crate) fn obj(&self, id: ObjectId) -> JsResult<&JsObject> {
        self.heap.get(id).ok_or_else(stale_handle)
    }

    pub(crate) fn obj_mut(&mut self, id: ObjectId) -> JsResult<&mut JsObject> {
        self.heap.get_mut(id).ok_or_else(stale_handle)
    }

    fn scope_mut(&mut self, id: ScopeId) -> JsResult<&mut Scope> {
        self.heap.scope_mut(id).ok_or_else(stale_handle)
    }

    /// Allocate an object, enforcing the configured object limit.
    pub(crate) fn alloc(&mut self, obj: JsObject) -> JsResult<ObjectId> {
        if let Some(max) = self.config.max_objects {
            let live = self.heap.object_count();
            if live >= max + ALLOC_RESERVE {
                return Err(Fault::Fatal(FatalError::new(ErrorKind::Alloc, "out of memory")));
            }
            if live >= max && !self.raising_alloc_error {
                self.raising_alloc_error = true;
                let fault = self.throw_error(ErrorKind::Alloc, "alloc failed");
                self.raising_alloc_error = false;
                return Err(fault);
            }
        }
        Ok(self.heap.alloc(obj))
    }

    pub(crate) fn new_object(&mut self) -> JsResult<ObjectId> {
        let proto = self.realm.object_prototype;
        self.alloc(JsObject::ordinary(Some(proto)))
    }

    pub(crate) fn new_array(&mut self, values: Vec<Value>) -> JsResult<ObjectId> {
        let proto = self.realm.array_prototype;
        self.alloc(JsObject::array(proto, values))
    }

    /// Create a function object with `name` and `length` set.
    pub(crate) fn new_function(
        &mut self,
        callable: Callable,
        name: &str,
        length: usize,
    ) -> JsResult<ObjectId> {
        let proto = self.realm.function_prototype;
        let mut obj = JsObject::function(proto, callable);
        obj.define(
            PropertyKey::from("length"),
            Value::Number(length as f64),
            PropertyFlags::empty(),
        );
        obj.define(PropertyKey::from("name"), Value::string(name), PropertyFlags::empty());
        self.alloc(obj)
    }

    /// Wrap a function node in a closure over `scope`.
    pub(crate) fn create_closure(
        &mut self,
        code: Rc<FunctionNode>,
        scope: ScopeId,
        filename: Rc<str>,
        kind: CodeKind,
    ) -> JsResult<ObjectId> {
        let name = code.name.as_ref().map(JsString::to_rust_string).unwrap_or_default();
        let length = code.params.len();
        let callable = Callable::Script(ScriptFunction {
            code,
            scope,
            filename,
            kind,
        });
        let func = self.new_function(callable, &name, length)?;
        if kind == CodeKind::Function {
            let proto = self.new_object()?;
            self.obj_mut(proto)?.define(
                PropertyKey::from("constructor"),
                Value::Object(func),
                PropertyFlags::HIDDEN,
            );
            self.obj_mut(func)?.define(
                PropertyKey::from("prototype"),
                Value::Object(proto),
                PropertyFlags::WRITABLE,
            );
        }
        Ok(func)
    }

    /// Convert a primitive to its wrapper object; objects pass through.
    pub(crate) fn to_object(&mut self, value: &Value) -> JsResult<ObjectId> {
        let (kind, proto) = match value {
            Value::Object(id) => return Ok(*id),
            Value::Undefined | Value::Null => {
                return Err(self.throw_error(ErrorKind::Type, "invalid base value"))
            }
            Value::Boolean(b) => (ObjectKind::Boolean(*b), self.realm.boolean_prototype),
            Value::Number(n) => (ObjectKind::Number(*n), self.realm.number_prototype),
            Value::String(s) => (ObjectKind::String(s.clone()), self.realm.string_prototype),
            Value::Buffer(_) | Value::Pointer(_) => {
                (ObjectKind::Ordinary, self.realm.object_prototype)
            }
        };
        self.alloc(JsObject::new(kind, Some(proto)))
    }

    // Errors

    /// Create an error object of `kind` carrying the current location.
    pub(crate) fn make_error(&mut self, kind: ErrorKind, message: Option<&str>) -> JsResult<ObjectId> {
        let proto = self.realm.error_prototypes[kind.index()];
        let id = self.alloc(JsObject::new(ObjectKind::Error, Some(proto)))?;
        let header = match message {
            Some(m) if !m.is_empty() => format!("{}: {}", kind.name(), m),
            _ => String::from(kind.name()),
        };
        let stack = self.stack_trace(&header);
        let (filename, line) = self
            .activations
            .last()
            .map(|a| (a.filename.clone(), a.line))
            .unwrap_or_else(|| (Rc::from(""), 0));
        let obj = self.obj_mut(id)?;
        if let Some(message) = message {
            obj.define(PropertyKey::from("message"), Value::string(message), PropertyFlags::HIDDEN);
        }
        obj.define(PropertyKey::from("stack"), Value::string(&stack), PropertyFlags::HIDDEN);
        obj.define(PropertyKey::from("fileName"), Value::string(&filename), PropertyFlags::HIDDEN);
        obj.define(
            PropertyKey::from("lineNumber"),
            Value::Number(line as f64),
            PropertyFlags::HIDDEN,
        );
        Ok(id)
    }

    /// Build a thrown error, degrading to the allocation fault if the error
    /// object itself cannot be created.
    pub(crate) fn throw_error(&mut self, kind: ErrorKind, message: &str) -> Fault {
        match self.make_error(kind, Some(message)) {
            Ok(id) => Fault::Throw(Value::Object(id)),
            Err(fault) => fault,
        }
    }

    pub(crate) fn syntax_error(&mut self, err: &ParseError) -> Fault {
        self.throw_error(ErrorKind::Syntax, &format!("{}", err))
    }

    fn stack_trace(&self, header: &str) -> String {
        let mut out = String::from(header);
        for activation in self.activations.iter().rev().take(MAX_TRACE_FRAMES) {
            out.push_str(&format!(
                "\n    at {} ({}:{})",
                activation.name, activation.filename, activation.line
            ));
        }
        out
    }

    // Conversions

    /// ToPrimitive; `prefer_string` selects the string hint.
    pub(crate) fn to_primitive(&mut self, value: &Value, prefer_string: bool) -> JsResult<Value> {
        let Value::Object(id) = value else {
            return Ok(value.clone());
        };
        match &self.obj(*id)?.kind {
            ObjectKind::Boolean(b) if !prefer_string => return Ok(Value::Boolean(*b)),
            ObjectKind::Number(n) if !prefer_string => return Ok(Value::Number(*n)),
            ObjectKind::String(s) => return Ok(Value::String(s.clone())),
            _ => {}
        }
        let order = if prefer_string {
            ["toString", "valueOf"]
        } else {
            ["valueOf", "toString"]
        };
        for name in order {
            let method = self.get(value, &PropertyKey::from(name))?;
            if self.is_callable_value(&method) {
                let result = self.call(&method, value.clone(), Vec::new())?;
                if !matches!(result, Value::Object(_)) {
                    return Ok(result);
                }
            }
        }
        Err(self.throw_error(ErrorKind::Type, "coercion to primitive failed"))
    }

    pub(crate) fn to_js_string(&mut self, value: &Value) -> JsResult<JsString> {
        match value {
            Value::Object(_) => {
                let primitive = self.to_primitive(value, true)?;
                Ok(primitive_to_string(&primitive))
            }
            other => Ok(primitive_to_string(other)),
        }
    }

    pub(crate) fn to_number(&mut self, value: &Value) -> JsResult<f64> {
        match value {
            Value::Object(_) => Ok(self.to_primitive(value, false)?.primitive_to_number()),
            other => Ok(other.primitive_to_number()),
        }
    }

    pub(crate) fn to_property_key(&mut self, value: &Value) -> JsResult<PropertyKey> {
        match value {
            Value::Number(n) if *n >= 0.0 && *n < u32::MAX as f64 && trunc(*n) == *n => {
                Ok(PropertyKey::Index(*n as u32))
            }
            Value::String(s) => Ok(PropertyKey::from_string(s.clone())),
            other => {
                let s = self.to_js_string(other)?;
                Ok(PropertyKey::from_string(s))
            }
        }
    }

    pub(crate) fn is_callable_value(&self, value: &Value) -> bool {
        match value {
            Value::Object(id) => self.heap.get(*id).map(JsObject::is_callable).unwrap_or(false),
            _ => false,
        }
    }

    pub(crate) fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Buffer(_) => "buffer",
            Value::Pointer(_) => "pointer",
            Value::Object(_) if self.is_callable_value(value) => "function",
            Value::Object(_) => "object",
        }
    }

    // Property access

    /// Find `key` along the prototype chain starting at `start`.
    pub(crate) fn lookup(&self, start: ObjectId, key: &PropertyKey) -> JsResult<Option<Value>> {
        let mut current = Some(start);
        while let Some(id) = current {
            let obj = self.obj(id)?;
            if let Some(value) = obj.get_own(key) {
                return Ok(Some(value));
            }
            current = obj.prototype;
        }
        Ok(None)
    }

    /// Value-level own properties of primitives, and the prototype to
    /// continue the lookup from.
    fn primitive_property(&mut self, base: &Value, key: &PropertyKey) -> JsResult<Result<Value, ObjectId>> {
        let proto = match base {
            Value::Undefined | Value::Null => {
                return Err(self.throw_error(ErrorKind::Type, "invalid base value"))
            }
            Value::Object(id) => *id,
            Value::String(s) => {
                if key.is_named("length") {
                    return Ok(Ok(Value::Number(s.unit_len() as f64)));
                }
                if let PropertyKey::Index(i) = key {
                    let units = s.units();
                    if let Some(unit) = units.get(*i as usize) {
                        return Ok(Ok(Value::String(JsString::from_units(&[*unit]))));
                    }
                }
                self.realm.string_prototype
            }
            Value::Buffer(buf) => {
                if key.is_named("length") {
                    return Ok(Ok(Value::Number(buf.borrow().len() as f64)));
                }
                if let PropertyKey::Index(i) = key {
                    if let Some(byte) = buf.borrow().get(*i as usize) {
                        return Ok(Ok(Value::Number(*byte as f64)));
                    }
                }
                self.realm.object_prototype
            }
            Value::Number(_) => self.realm.number_prototype,
            Value::Boolean(_) => self.realm.boolean_prototype,
            Value::Pointer(_) => self.realm.object_prototype,
        };
        Ok(Err(proto))
    }

    /// `base[key]`.
    pub(crate) fn get(&mut self, base: &Value, key: &PropertyKey) -> JsResult<Value> {
        match self.primitive_property(base, key)? {
            Ok(value) => Ok(value),
            Err(start) => Ok(self.lookup(start, key)?.unwrap_or(Value::Undefined)),
        }
    }

    /// `key in base`, without the object check of the `in` operator.
    pub(crate) fn has_value_property(&mut self, base: &Value, key: &PropertyKey) -> JsResult<bool> {
        match self.primitive_property(base, key)? {
            Ok(_) => Ok(true),
            Err(start) => Ok(self.lookup(start, key)?.is_some()),
        }
    }

    /// `base[key] = value`. Writes to primitives are discarded.
    pub(crate) fn put(&mut self, base: &Value, key: PropertyKey, value: Value) -> JsResult<()> {
        match base {
            Value::Undefined | Value::Null => {
                Err(self.throw_error(ErrorKind::Type, "invalid base value"))
            }
            Value::Object(id) => {
                let value = if key.is_named("length") && self.obj(*id)?.is_array() {
                    Value::Number(self.to_number(&value)?)
                } else {
                    value
                };
                match self.obj_mut(*id)?.put(key, value) {
                    PutOutcome::Stored | PutOutcome::ReadOnly => Ok(()),
                    PutOutcome::OutOfRange => {
                        Err(self.throw_error(ErrorKind::Range, "invalid array length"))
                    }
                }
            }
            Value::Buffer(buf) => {
                if let PropertyKey::Index(i) = key {
                    let byte = to_uint32(self.to_number(&value)?) as u8;
                    if let Some(slot) = buf.borrow_mut().get_mut(i as usize) {
                        *slot = byte;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn delete_value_property(&mut self, base: &Value, key: &PropertyKey) -> JsResult<bool> {
        match base {
            Value::Undefined | Value::Null => {
                Err(self.throw_error(ErrorKind::Type, "invalid base value"))
            }
            Value::Object(id) => Ok(self.obj_mut(*id)?.delete(key)),
            _ => Ok(true),
        }
    }

    pub(crate) fn get_named(&mut self, base: &Value, name: &str) -> JsResult<Value> {
        self.get(base, &PropertyKey::from(name))
    }

    pub(crate) fn put_named(&mut self, base: &Value, name: &str, value: Value) -> JsResult<()> {
        self.put(base, PropertyKey::from(name), value)
    }

    // Calls

    /// Call `func` with an explicit `this`.
    pub(crate) fn call(&mut self, func: &Value, this: Value, args: Vec<Value>) -> JsResult<Value> {
        let callable = match func {
            Value::Object(id) => self.obj(*id)?.callable.clone(),
            _ => None,
        };
        let Some(callable) = callable else {
            return Err(self.throw_error(ErrorKind::Type, "not callable"));
        };
        if self.call_depth >= self.config.max_call_depth {
            return Err(self.throw_error(ErrorKind::Range, "callstack limit"));
        }
        self.call_depth += 1;
        let result = match callable {
            Callable::Builtin(builtin) => (builtin.func)(self, &this, &args),
            Callable::Native(native) => self.call_native(native, this, args),
            Callable::Script(script) => self.call_script(script, this, args),
            Callable::Bound(bound) => {
                let mut full = bound.args;
                full.extend(args);
                self.call(&Value::Object(bound.target), bound.this, full)
            }
        };
        self.call_depth -= 1;
        result
    }

    /// `new func(...args)`.
    pub(crate) fn construct(&mut self, func: &Value, args: Vec<Value>) -> JsResult<Value> {
        let callable = match func {
            Value::Object(id) => self.obj(*id)?.callable.clone(),
            _ => None,
        };
        let Some(callable) = callable else {
            return Err(self.throw_error(ErrorKind::Type, "not constructable"));
        };
        if let Callable::Bound(bound) = callable {
            let mut full = bound.args;
            full.extend(args);
            return self.construct(&Value::Object(bound.target), full);
        }
        let proto = match self.get_named(func, "prototype")? {
            Value::Object(proto) => proto,
            _ => self.realm.object_prototype,
        };
        let obj = self.alloc(JsObject::ordinary(Some(proto)))?;
        let result = self.call(func, Value::Object(obj), args)?;
        match result {
            Value::Object(_) => Ok(result),
            _ => Ok(Value::Object(obj)),
        }
    }

    /// Run an embedder function in a fresh stack frame.
    fn call_native(&mut self, native: NativeFunction, this: Value, mut args: Vec<Value>) -> JsResult<Value> {
        let bottom = self.stack.len();
        if let Some(nargs) = native.nargs {
            args.resize(nargs, Value::Undefined);
        }
        self.stack.extend(args);
        self.frames.push(crate::api::Frame { bottom, this });
        let result = (native.func)(self);
        self.frames.pop();
        let outcome = match result {
            Ok(count) => {
                if count > 0 && self.stack.len() > bottom {
                    Ok(self.stack.pop().unwrap_or_default())
                } else {
                    Ok(Value::Undefined)
                }
            }
            Err(Failure::Error) => {
                if self.stack.len() > bottom {
                    Err(Fault::Throw(self.stack.pop().unwrap_or_default()))
                } else {
                    Err(self.throw_error(ErrorKind::Internal, "native function failed without a value"))
                }
            }
            Err(Failure::Fatal(err)) => Err(Fault::Fatal(err)),
        };
        self.stack.truncate(bottom);
        outcome
    }

    fn call_script(&mut self, func: ScriptFunction, this: Value, args: Vec<Value>) -> JsResult<Value> {
        if func.kind != CodeKind::Function {
            return self.run_global_code(func);
        }
        let code = func.code.clone();
        let scope = self.heap.alloc_scope(Scope::new(func.scope));
        let arguments = if code.uses_arguments {
            let proto = self.realm.object_prototype;
            let mut obj = JsObject::new(ObjectKind::Arguments, Some(proto));
            obj.elements_mut().extend(args.iter().cloned().map(Some));
            Some(self.alloc(obj)?)
        } else {
            None
        };
        {
            let bindings = &mut self.scope_mut(scope)?.bindings;
            if let Some(arguments) = arguments {
                bindings.insert(JsString::new("arguments"), Value::Object(arguments));
            }
            for (i, name) in code.params.iter().enumerate() {
                bindings.insert(name.clone(), args.get(i).cloned().unwrap_or_default());
            }
            for name in &code.vars {
                bindings.entry(name.clone()).or_insert(Value::Undefined);
            }
        }
        for decl in &code.functions {
            let closure =
                self.create_closure(decl.clone(), scope, func.filename.clone(), CodeKind::Function)?;
            if let Some(name) = &decl.name {
                self.scope_mut(scope)?
                    .bindings
                    .insert(name.clone(), Value::Object(closure));
            }
        }

        // Sloppy mode: a missing `this` is the global object.
        let this = if this.is_nullish() {
            Value::Object(self.realm.global)
        } else {
            this
        };
        self.activations.push(Activation {
            this,
            scope,
            name: code.name.clone().unwrap_or_else(|| JsString::new("anon")),
            filename: func.filename.clone(),
            line: code.line,
            completion: Value::Undefined,
        });
        let result = self.execute_block(&code.body);
        self.activations.pop();
        match result? {
            Completion::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    /// Run program or eval code against the global object.
    fn run_global_code(&mut self, func: ScriptFunction) -> JsResult<Value> {
        let code = func.code.clone();
        let global = self.realm.global;
        for name in &code.vars {
            let key = PropertyKey::from_string(name.clone());
            let obj = self.obj_mut(global)?;
            if !obj.has_own(&key) {
                obj.define(key, Value::Undefined, PropertyFlags::WRITABLE | PropertyFlags::ENUMERABLE);
            }
        }
        for decl in &code.functions {
            let closure = self.create_closure(
                decl.clone(),
                self.global_scope,
                func.filename.clone(),
                CodeKind::Function,
            )?;
            if let Some(name) = &decl.name {
                self.obj_mut(global)?.define(
                    PropertyKey::from_string(name.clone()),
                    Value::Object(closure),
                    PropertyFlags::WRITABLE | PropertyFlags::ENUMERABLE,
                );
            }
        }
        let name = match func.kind {
            CodeKind::Eval => "eval",
            _ => "global",
        };
        self.activations.push(Activation {
            this: Value::Object(global),
            scope: self.global_scope,
            name: JsString::new(name),
            filename: func.filename.clone(),
            line: 1,
            completion: Value::Undefined,
        });
        let result = self.execute_block(&code.body);
        let completion = self
            .activations
            .pop()
            .map(|a| a.completion)
            .unwrap_or_default();
        result?;
        match func.kind {
            CodeKind::Eval => Ok(completion),
            _ => Ok(Value::Undefined),
        }
    }

    // Scopes

    fn current_scope(&self) -> ScopeId {
        self.activations
            .last()
            .map(|a| a.scope)
            .unwrap_or(self.global_scope)
    }

    fn set_current_scope(&mut self, scope: ScopeId) {
        if let Some(activation) = self.activations.last_mut() {
            activation.scope = scope;
        }
    }

    fn current_this(&self) -> Value {
        self.activations
            .last()
            .map(|a| a.this.clone())
            .unwrap_or(Value::Object(self.realm.global))
    }

    fn current_filename(&self) -> Rc<str> {
        self.activations
            .last()
            .map(|a| a.filename.clone())
            .unwrap_or_else(|| Rc::from(""))
    }

    /// Look up an identifier along the scope chain.
    fn resolve(&mut self, name: &JsString) -> JsResult<Option<Value>> {
        let mut current = Some(self.current_scope());
        while let Some(id) = current {
            let scope = self.heap.scope(id).ok_or_else(stale_handle)?;
            if scope.global {
                let key = PropertyKey::from_string(name.clone());
                return self.lookup(self.realm.global, &key);
            }
            if let Some(value) = scope.bindings.get(name) {
                return Ok(Some(value.clone()));
            }
            current = scope.parent;
        }
        Ok(None)
    }

    fn resolve_or_throw(&mut self, name: &JsString) -> JsResult<Value> {
        match self.resolve(name)? {
            Some(value) => Ok(value),
            None => Err(self.throw_error(
                ErrorKind::Reference,
                &format!("identifier '{}' undefined", name),
            )),
        }
    }

    /// Assign to the nearest binding; unresolved names become globals.
    fn assign_binding(&mut self, name: &JsString, value: Value) -> JsResult<()> {
        let mut current = Some(self.current_scope());
        while let Some(id) = current {
            let scope = self.scope_mut(id)?;
            if scope.global {
                break;
            }
            if let Some(slot) = scope.bindings.get_mut(name) {
                *slot = value;
                return Ok(());
            }
            current = scope.parent;
        }
        let global = Value::Object(self.realm.global);
        self.put(&global, PropertyKey::from_string(name.clone()), value)
    }

    fn delete_binding(&mut self, name: &JsString) -> JsResult<bool> {
        let mut current = Some(self.current_scope());
        while let Some(id) = current {
            let scope = self.heap.scope(id).ok_or_else(stale_handle)?;
            if scope.global {
                break;
            }
            if scope.bindings.contains_key(name) {
                return Ok(false);
            }
            current = scope.parent;
        }
        let global = self.realm.global;
        Ok(self.obj_mut(global)?.delete(&PropertyKey::from_string(name.clone())))
    }

    // Statements

    pub(crate) fn execute_block(&mut self, stmts: &[Stmt]) -> JsResult<Completion> {
        for stmt in stmts {
            let completion = self.execute_statement(stmt)?;
            if !matches!(completion, Completion::Normal) {
                return Ok(completion);
            }
        }
        Ok(Completion::Normal)
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> JsResult<Completion> {
        self.enter_nesting()?;
        let completion = self.execute_statement_kind(stmt);
        self.nesting -= 1;
        completion
    }

    fn enter_nesting(&mut self) -> JsResult<()> {
        if self.nesting >= self.config.max_nesting_depth {
            return Err(self.throw_error(ErrorKind::Range, "nesting too deep"));
        }
        self.nesting += 1;
        Ok(())
    }

    fn execute_statement_kind(&mut self, stmt: &Stmt) -> JsResult<Completion> {
        if let Some(activation) = self.activations.last_mut() {
            activation.line = stmt.line;
        }
        match &stmt.kind {
            StmtKind::Empty | StmtKind::FunctionDecl => Ok(Completion::Normal),
            StmtKind::Expr(expr) => {
                let value = self.evaluate(expr)?;
                if let Some(activation) = self.activations.last_mut() {
                    activation.completion = value;
                }
                Ok(Completion::Normal)
            }
            StmtKind::Var(decls) => {
                self.execute_declarations(decls)?;
                Ok(Completion::Normal)
            }
            StmtKind::Block(body) => self.execute_block(body),
            StmtKind::If(test, consequent, alternate) => {
                if self.evaluate(test)?.to_boolean() {
                    self.execute_statement(consequent)
                } else if let Some(alternate) = alternate {
                    self.execute_statement(alternate)
                } else {
                    Ok(Completion::Normal)
                }
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.execute_for(init.as_ref(), test.as_ref(), update.as_ref(), body),
            StmtKind::ForIn {
                target,
                object,
                body,
            } => self.execute_for_in(target, object, body),
            StmtKind::While(test, body) => {
                while self.evaluate(test)?.to_boolean() {
                    match self.execute_statement(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::DoWhile(body, test) => {
                loop {
                    match self.execute_statement(body)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.evaluate(test)?.to_boolean() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            StmtKind::Break => Ok(Completion::Break),
            StmtKind::Continue => Ok(Completion::Continue),
            StmtKind::Return(arg) => {
                let value = match arg {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            StmtKind::Throw(arg) => {
                let value = self.evaluate(arg)?;
                Err(Fault::Throw(value))
            }
            StmtKind::Try {
                block,
                catch,
                finally,
            } => self.execute_try(block, catch.as_ref(), finally.as_deref()),
            StmtKind::Switch(discriminant, cases) => self.execute_switch(discriminant, cases),
        }
    }

    fn execute_declarations(&mut self, decls: &Declarations) -> JsResult<()> {
        for (name, init) in decls {
            if let Some(init) = init {
                let value = self.evaluate(init)?;
                self.assign_binding(name, value)?;
            }
        }
        Ok(())
    }

    fn execute_for(
        &mut self,
        init: Option<&ForInit>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
    ) -> JsResult<Completion> {
        match init {
            Some(ForInit::Var(decls)) => self.execute_declarations(decls)?,
            Some(ForInit::Expr(expr)) => {
                self.evaluate(expr)?;
            }
            None => {}
        }
        loop {
            if let Some(test) = test {
                if !self.evaluate(test)?.to_boolean() {
                    break;
                }
            }
            match self.execute_statement(body)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
            if let Some(update) = update {
                self.evaluate(update)?;
            }
        }
        Ok(Completion::Normal)
    }

    fn execute_for_in(&mut self, target: &ForInTarget, object: &Expr, body: &Stmt) -> JsResult<Completion> {
        let object = self.evaluate(object)?;
        let keys = match &object {
            Value::Object(_) => self.enumeration_keys(&object, EnumFlags::empty())?,
            Value::String(s) => (0..s.unit_len() as u32).map(PropertyKey::Index).collect(),
            _ => Vec::new(),
        };
        for key in keys {
            if !self.has_value_property(&object, &key)? {
                continue;
            }
            let name = Value::String(key.to_js_string());
            match target {
                ForInTarget::Var(binding) => self.assign_binding(binding, name)?,
                ForInTarget::Expr(expr) => {
                    let reference = self.evaluate_reference(expr)?;
                    self.put_reference(&reference, name)?;
                }
            }
            match self.execute_statement(body)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn execute_try(
        &mut self,
        block: &[Stmt],
        catch: Option<&(JsString, Vec<Stmt>)>,
        finally: Option<&[Stmt]>,
    ) -> JsResult<Completion> {
        let mut result = self.execute_block(block);
        let thrown = match &result {
            Err(Fault::Throw(value)) if catch.is_some() => Some(value.clone()),
            _ => None,
        };
        if let (Some(value), Some((param, body))) = (thrown, catch) {
            result = self.execute_catch(param, body, value);
        }
        if let Some(finally) = finally {
            // Fatal faults unwind without running handlers.
            if matches!(result, Err(Fault::Fatal(_))) {
                return result;
            }
            match self.execute_block(finally)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        result
    }

    fn execute_catch(&mut self, param: &JsString, body: &[Stmt], value: Value) -> JsResult<Completion> {
        let parent = self.current_scope();
        let scope = self.heap.alloc_scope(Scope::new(parent));
        self.scope_mut(scope)?.bindings.insert(param.clone(), value);
        self.set_current_scope(scope);
        let result = self.execute_block(body);
        self.set_current_scope(parent);
        result
    }

    fn execute_switch(&mut self, discriminant: &Expr, cases: &[Case]) -> JsResult<Completion> {
        let value = self.evaluate(discriminant)?;
        let mut start = None;
        for (i, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                if value.strict_equals(&self.evaluate(test)?) {
                    start = Some(i);
                    break;
                }
            }
        }
        let Some(start) = start.or_else(|| cases.iter().position(|c| c.test.is_none())) else {
            return Ok(Completion::Normal);
        };
        for case in &cases[start..] {
            match self.execute_block(&case.body)? {
                Completion::Normal => {}
                Completion::Break => break,
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    // Expressions

    pub(crate) fn evaluate(&mut self, expr: &Expr) -> JsResult<Value> {
        self.enter_nesting()?;
        let value = self.evaluate_expr(expr);
        self.nesting -= 1;
        value
    }

    fn evaluate_expr(&mut self, expr: &Expr) -> JsResult<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::This => Ok(self.current_this()),
            Expr::Ident(name) => self.resolve_or_throw(name),
            Expr::Array(elements) => self.evaluate_array(elements),
            Expr::Object(props) => self.evaluate_object(props),
            Expr::Function(node) => self.evaluate_function(node),
            Expr::Unary(op, arg) => self.evaluate_unary(*op, arg),
            Expr::Update {
                increment,
                prefix,
                target,
            } => self.evaluate_update(*increment, *prefix, target),
            Expr::Binary(op, left, right) => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary(*op, &left, &right)
            }
            Expr::Logical(op, left, right) => {
                let left = self.evaluate(left)?;
                match (op, left.to_boolean()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expr::Assign(op, target, value) => self.evaluate_assignment(*op, target, value),
            Expr::Conditional(test, consequent, alternate) => {
                if self.evaluate(test)?.to_boolean() {
                    self.evaluate(consequent)
                } else {
                    self.evaluate(alternate)
                }
            }
            Expr::Member(object, name) => {
                let base = self.evaluate(object)?;
                self.get(&base, &PropertyKey::from_string(name.clone()))
            }
            Expr::Index(object, index) => {
                let base = self.evaluate(object)?;
                let key = self.evaluate(index)?;
                let key = self.to_property_key(&key)?;
                self.get(&base, &key)
            }
            Expr::Call(callee, args) => self.evaluate_call(callee, args),
            Expr::New(callee, args) => {
                let func = self.evaluate(callee)?;
                let args = self.evaluate_arguments(args)?;
                self.construct(&func, args)
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.evaluate(expr)?;
                }
                Ok(last)
            }
        }
    }

    fn evaluate_array(&mut self, elements: &[Option<Expr>]) -> JsResult<Value> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            values.push(match element {
                Some(expr) => Some(self.evaluate(expr)?),
                None => None,
            });
        }
        let id = self.new_array(Vec::new())?;
        *self.obj_mut(id)?.elements_mut() = values;
        Ok(Value::Object(id))
    }

    fn evaluate_object(&mut self, props: &[(JsString, Expr)]) -> JsResult<Value> {
        let id = self.new_object()?;
        for (name, expr) in props {
            let value = self.evaluate(expr)?;
            self.obj_mut(id)?.define(
                PropertyKey::from_string(name.clone()),
                value,
                PropertyFlags::DEFAULT,
            );
        }
        Ok(Value::Object(id))
    }

    /// Function expressions see their own name in a private scope.
    fn evaluate_function(&mut self, node: &Rc<FunctionNode>) -> JsResult<Value> {
        let filename = self.current_filename();
        let mut scope = self.current_scope();
        if node.name.is_some() {
            scope = self.heap.alloc_scope(Scope::new(scope));
        }
        let id = self.create_closure(node.clone(), scope, filename, CodeKind::Function)?;
        if let Some(name) = &node.name {
            self.scope_mut(scope)?
                .bindings
                .insert(name.clone(), Value::Object(id));
        }
        Ok(Value::Object(id))
    }

    fn evaluate_arguments(&mut self, args: &[Expr]) -> JsResult<Vec<Value>> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate(arg)?);
        }
        Ok(values)
    }

    fn evaluate_call(&mut self, callee: &Expr, args: &[Expr]) -> JsResult<Value> {
        let (func, this) = match callee {
            Expr::Member(object, name) => {
                let base = self.evaluate(object)?;
                let func = self.get(&base, &PropertyKey::from_string(name.clone()))?;
                (func, base)
            }
            Expr::Index(object, index) => {
                let base = self.evaluate(object)?;
                let key = self.evaluate(index)?;
                let key = self.to_property_key(&key)?;
                let func = self.get(&base, &key)?;
                (func, base)
            }
            other => (self.evaluate(other)?, Value::Undefined),
        };
        let args = self.evaluate_arguments(args)?;
        self.call(&func, this, args)
    }

    fn evaluate_reference(&mut self, expr: &Expr) -> JsResult<Reference> {
        match expr {
            Expr::Ident(name) => Ok(Reference::Binding(name.clone())),
            Expr::Member(object, name) => {
                let base = self.evaluate(object)?;
                Ok(Reference::Property(base, PropertyKey::from_string(name.clone())))
            }
            Expr::Index(object, index) => {
                let base = self.evaluate(object)?;
                let key = self.evaluate(index)?;
                let key = self.to_property_key(&key)?;
                Ok(Reference::Property(base, key))
            }
            _ => Err(self.throw_error(ErrorKind::Reference, "invalid assignment target")),
        }
    }

    fn get_reference(&mut self, reference: &Reference) -> JsResult<Value> {
        match reference {
            Reference::Binding(name) => self.resolve_or_throw(name),
            Reference::Property(base, key) => self.get(base, key),
        }
    }

    fn put_reference(&mut self, reference: &Reference, value: Value) -> JsResult<()> {
        match reference {
            Reference::Binding(name) => self.assign_binding(name, value),
            Reference::Property(base, key) => self.put(base, key.clone(), value),
        }
    }

    fn evaluate_assignment(&mut self, op: Option<BinaryOp>, target: &Expr, value: &Expr) -> JsResult<Value> {
        let reference = self.evaluate_reference(target)?;
        let result = match op {
            None => self.evaluate(value)?,
            Some(op) => {
                let current = self.get_reference(&reference)?;
                let rhs = self.evaluate(value)?;
                self.binary(op, &current, &rhs)?
            }
        };
        self.put_reference(&reference, result.clone())?;
        Ok(result)
    }

    fn evaluate_update(&mut self, increment: bool, prefix: bool, target: &Expr) -> JsResult<Value> {
        let reference = self.evaluate_reference(target)?;
        let old = self.get_reference(&reference)?;
        let old = self.to_number(&old)?;
        let new = if increment { old + 1.0 } else { old - 1.0 };
        self.put_reference(&reference, Value::Number(new))?;
        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn evaluate_unary(&mut self, op: UnaryOp, arg: &Expr) -> JsResult<Value> {
        match op {
            UnaryOp::TypeOf => {
                let value = match arg {
                    Expr::Ident(name) => self.resolve(name)?.unwrap_or_default(),
                    other => self.evaluate(other)?,
                };
                Ok(Value::string(self.type_of(&value)))
            }
            UnaryOp::Delete => match arg {
                Expr::Ident(name) => Ok(Value::Boolean(self.delete_binding(name)?)),
                Expr::Member(..) | Expr::Index(..) => match self.evaluate_reference(arg)? {
                    Reference::Property(base, key) => {
                        Ok(Value::Boolean(self.delete_value_property(&base, &key)?))
                    }
                    Reference::Binding(_) => Ok(Value::Boolean(false)),
                },
                other => {
                    self.evaluate(other)?;
                    Ok(Value::Boolean(true))
                }
            },
            UnaryOp::Void => {
                self.evaluate(arg)?;
                Ok(Value::Undefined)
            }
            UnaryOp::Not => Ok(Value::Boolean(!self.evaluate(arg)?.to_boolean())),
            UnaryOp::Minus => {
                let value = self.evaluate(arg)?;
                Ok(Value::Number(-self.to_number(&value)?))
            }
            UnaryOp::Plus => {
                let value = self.evaluate(arg)?;
                Ok(Value::Number(self.to_number(&value)?))
            }
            UnaryOp::BitNot => {
                let value = self.evaluate(arg)?;
                Ok(Value::Number(!to_int32(self.to_number(&value)?) as f64))
            }
        }
    }

    /// Apply a binary operator to evaluated operands.
    pub(crate) fn binary(&mut self, op: BinaryOp, left: &Value, right: &Value) -> JsResult<Value> {
        let result = match op {
            BinaryOp::Add => return self.add(left, right),
            BinaryOp::Sub => self.to_number(left)? - self.to_number(right)?,
            BinaryOp::Mul => self.to_number(left)? * self.to_number(right)?,
            BinaryOp::Div => self.to_number(left)? / self.to_number(right)?,
            BinaryOp::Mod => fmod(self.to_number(left)?, self.to_number(right)?),
            BinaryOp::Less | BinaryOp::Greater | BinaryOp::LessEqual | BinaryOp::GreaterEqual => {
                let l = self.to_primitive(left, false)?;
                let r = self.to_primitive(right, false)?;
                let outcome = match op {
                    BinaryOp::Less => less_than(&l, &r) == Some(true),
                    BinaryOp::Greater => less_than(&r, &l) == Some(true),
                    BinaryOp::LessEqual => less_than(&r, &l) == Some(false),
                    _ => less_than(&l, &r) == Some(false),
                };
                return Ok(Value::Boolean(outcome));
            }
            BinaryOp::Equal => return Ok(Value::Boolean(self.loose_equals(left, right)?)),
            BinaryOp::NotEqual => return Ok(Value::Boolean(!self.loose_equals(left, right)?)),
            BinaryOp::StrictEqual => return Ok(Value::Boolean(left.strict_equals(right))),
            BinaryOp::StrictNotEqual => return Ok(Value::Boolean(!left.strict_equals(right))),
            BinaryOp::BitAnd => {
                (to_int32(self.to_number(left)?) & to_int32(self.to_number(right)?)) as f64
            }
            BinaryOp::BitOr => {
                (to_int32(self.to_number(left)?) | to_int32(self.to_number(right)?)) as f64
            }
            BinaryOp::BitXor => {
                (to_int32(self.to_number(left)?) ^ to_int32(self.to_number(right)?)) as f64
            }
            BinaryOp::Shl => {
                let l = to_int32(self.to_number(left)?);
                let r = to_uint32(self.to_number(right)?) & 31;
                l.wrapping_shl(r) as f64
            }
            BinaryOp::Shr => {
                let l = to_int32(self.to_number(left)?);
                let r = to_uint32(self.to_number(right)?) & 31;
                (l >> r) as f64
            }
            BinaryOp::UShr => {
                let l = to_uint32(self.to_number(left)?);
                let r = to_uint32(self.to_number(right)?) & 31;
                (l >> r) as f64
            }
            BinaryOp::In => {
                if !matches!(right, Value::Object(_)) {
                    return Err(self.throw_error(ErrorKind::Type, "invalid 'in' rval"));
                }
                let key = self.to_property_key(left)?;
                return Ok(Value::Boolean(self.has_value_property(right, &key)?));
            }
            BinaryOp::InstanceOf => return Ok(Value::Boolean(self.instance_of(left, right)?)),
        };
        Ok(Value::Number(result))
    }

    fn add(&mut self, left: &Value, right: &Value) -> JsResult<Value> {
        let l = self.to_primitive(left, false)?;
        let r = self.to_primitive(right, false)?;
        if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
            let l = primitive_to_string(&l);
            let r = primitive_to_string(&r);
            return Ok(Value::String(l.concat(&r)));
        }
        Ok(Value::Number(l.primitive_to_number() + r.primitive_to_number()))
    }

    /// Abstract equality (`==`).
    pub(crate) fn loose_equals(&mut self, a: &Value, b: &Value) -> JsResult<bool> {
        match (a, b) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => Ok(true),
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => Ok(false),
            (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
                Ok(a.primitive_to_number() == b.primitive_to_number())
            }
            (Value::Boolean(_), _) => {
                let a = Value::Number(a.primitive_to_number());
                self.loose_equals(&a, b)
            }
            (_, Value::Boolean(_)) => {
                let b = Value::Number(b.primitive_to_number());
                self.loose_equals(a, &b)
            }
            (Value::Object(_), Value::Number(_) | Value::String(_)) => {
                let a = self.to_primitive(a, false)?;
                self.loose_equals(&a, b)
            }
            (Value::Number(_) | Value::String(_), Value::Object(_)) => {
                let b = self.to_primitive(b, false)?;
                self.loose_equals(a, &b)
            }
            _ => Ok(a.strict_equals(b)),
        }
    }

    fn instance_of(&mut self, value: &Value, constructor: &Value) -> JsResult<bool> {
        let Some(mut func) = constructor.as_object().filter(|_| self.is_callable_value(constructor)) else {
            return Err(self.throw_error(ErrorKind::Type, "invalid instanceof rval"));
        };
        while let Some(Callable::Bound(bound)) = &self.obj(func)?.callable {
            func = bound.target;
        }
        let Value::Object(mut current) = value else {
            return Ok(false);
        };
        let Value::Object(proto) = self.get_named(&Value::Object(func), "prototype")? else {
            return Err(self.throw_error(ErrorKind::Type, "invalid instanceof rval"));
        };
        while let Some(next) = self.obj(current)?.prototype {
            if next == proto {
                return Ok(true);
            }
            current = next;
        }
        Ok(false)
    }
}

fn stale_handle() -> Fault {
    Fault::Fatal(FatalError::new(ErrorKind::Internal, "stale heap handle"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CompileFlags, EngineConfig};

    fn eval(engine: &mut Engine, source: &str) -> Result<Value, Value> {
        engine.push_string(source);
        engine.push_string("test.js");
        engine.compile(CompileFlags::EVAL).map_err(|_| engine.stack.pop().unwrap_or_default())?;
        match engine.pcall(0) {
            Ok(()) => Ok(engine.stack.pop().unwrap_or_default()),
            Err(_) => Err(engine.stack.pop().unwrap_or_default()),
        }
    }

    fn eval_number(source: &str) -> f64 {
        let mut engine = Engine::new();
        match eval(&mut engine, source) {
            Ok(Value::Number(n)) => n,
            other => panic!("{} produced {:?}", source, other),
        }
    }

    fn eval_string(source: &str) -> String {
        let mut engine = Engine::new();
        match eval(&mut engine, source) {
            Ok(Value::String(s)) => s.to_rust_string(),
            other => panic!("{} produced {:?}", source, other),
        }
    }

    fn error_message(engine: &mut Engine, thrown: Value) -> String {
        match engine.get(&thrown, &PropertyKey::from("message")) {
            Ok(Value::String(s)) => s.to_rust_string(),
            other => panic!("no message: {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(eval_number("1 + 2 * 3"), 7.0);
        assert_eq!(eval_number("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_number("7 % 4"), 3.0);
        assert_eq!(eval_number("-7 >> 1"), -4.0);
        assert_eq!(eval_number("-1 >>> 28"), 15.0);
        assert_eq!(eval_number("1 << 33"), 2.0);
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(eval_string("'a' + 1 + 2"), "a12");
        assert_eq!(eval_string("1 + 2 + 'a'"), "3a");
        assert_eq!(eval_string("'x' + null + undefined"), "xnullundefined");
    }

    #[test]
    fn test_equality() {
        let mut engine = Engine::new();
        for (source, expected) in [
            ("1 == '1'", true),
            ("null == undefined", true),
            ("null == 0", false),
            ("true == 1", true),
            ("NaN == NaN", false),
            ("1 === '1'", false),
        ] {
            match eval(&mut engine, source) {
                Ok(Value::Boolean(b)) => assert_eq!(b, expected, "{}", source),
                other => panic!("{} produced {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_closures_and_hoisting() {
        assert_eq!(
            eval_number(
                "function counter() { var n = 0; return function () { return ++n; }; }
                 var c = counter(); c(); c(); c()"
            ),
            3.0
        );
        assert_eq!(eval_number("f(); function f() { return 5 }"), 5.0);
        assert_eq!(eval_string("typeof hoisted; var hoisted = 1; typeof undefinedName"), "undefined");
    }

    #[test]
    fn test_named_function_expression_recursion() {
        assert_eq!(
            eval_number("var fact = function f(n) { return n <= 1 ? 1 : n * f(n - 1) }; fact(5)"),
            120.0
        );
    }

    #[test]
    fn test_this_binding() {
        assert_eq!(eval_number("var o = { v: 4, get: function () { return this.v } }; o.get()"), 4.0);
        assert_eq!(eval_number("var v = 9; (function () { return this.v })()"), 9.0);
    }

    #[test]
    fn test_undefined_identifier() {
        let mut engine = Engine::new();
        let thrown = eval(&mut engine, "foo").unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "identifier 'foo' undefined");
    }

    #[test]
    fn test_invalid_base_value() {
        let mut engine = Engine::new();
        let thrown = eval(&mut engine, "var x; x.y").unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "invalid base value");
    }

    #[test]
    fn test_try_catch_finally() {
        assert_eq!(
            eval_number("var log = 0; try { throw 2 } catch (e) { log += e } finally { log += 10 } log"),
            12.0
        );
        assert_eq!(
            eval_number("function f() { try { return 1 } finally { return 2 } } f()"),
            2.0
        );
        assert_eq!(eval_string("try { null.x } catch (e) { e.name }"), "TypeError");
    }

    #[test]
    fn test_loops_and_switch() {
        assert_eq!(
            eval_number("var s = 0; for (var i = 0; i < 10; i++) { if (i == 5) break; if (i % 2) continue; s += i } s"),
            6.0
        );
        assert_eq!(
            eval_number("var n = 0; do { n++ } while (n < 3); n"),
            3.0
        );
        assert_eq!(
            eval_string("var r = ''; switch (2) { case 1: r += 'a'; case 2: r += 'b'; case 3: r += 'c'; break; default: r += 'd' } r"),
            "bc"
        );
    }

    #[test]
    fn test_for_in_enumerates_own_and_inherited() {
        assert_eq!(
            eval_string(
                "function P() { this.a = 1 } P.prototype.b = 2;
                 var keys = ''; for (var k in new P()) keys += k; keys"
            ),
            "ab"
        );
    }

    #[test]
    fn test_instanceof_and_in() {
        let mut engine = Engine::new();
        assert!(matches!(
            eval(&mut engine, "function A() {} new A() instanceof A"),
            Ok(Value::Boolean(true))
        ));
        assert!(matches!(
            eval(&mut engine, "'x' in { x: 1 }"),
            Ok(Value::Boolean(true))
        ));
        let thrown = eval(&mut engine, "1 instanceof 2").unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "invalid instanceof rval");
    }

    #[test]
    fn test_call_depth_limit() {
        let mut engine = Engine::with_config(EngineConfig::default().with_max_call_depth(20));
        let thrown = eval(&mut engine, "function r() { return r() } r()").unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "callstack limit");
        assert!(!engine.is_fatal());
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        let mut engine = Engine::new();
        let source = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        let thrown = eval(&mut engine, &source).unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "nesting too deep (line 1)");

        let source = format!("1{}", "+1".repeat(20000));
        let thrown = eval(&mut engine, &source).unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "nesting too deep (line 1)");
        assert!(!engine.is_fatal());
        assert!(matches!(eval(&mut engine, "1 + 1"), Ok(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn test_nesting_limit_spans_calls() {
        let config = EngineConfig::default().with_max_nesting_depth(32);
        let mut engine = Engine::with_config(config);
        let nested = format!("{}1{}", "-(".repeat(40), ")".repeat(40));
        let thrown = eval(&mut engine, &nested).unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "nesting too deep");

        assert!(matches!(
            eval(&mut engine, "function f(n) { return n ? 1 + f(n - 1) : 0 } f(3)"),
            Ok(Value::Number(n)) if n == 3.0
        ));
        let thrown = eval(&mut engine, "f(50)").unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "nesting too deep");
        assert_eq!(engine.nesting, 0);
        assert!(matches!(eval(&mut engine, "f(2)"), Ok(Value::Number(n)) if n == 2.0));
    }

    #[test]
    fn test_error_stack_names_location() {
        let mut engine = Engine::new();
        let source = "function boom() {\n  throw new Error('bad');\n}\nboom();";
        let thrown = eval(&mut engine, source).unwrap_err();
        let stack = match engine.get(&thrown, &PropertyKey::from("stack")) {
            Ok(Value::String(s)) => s.to_rust_string(),
            other => panic!("no stack: {:?}", other),
        };
        assert!(stack.starts_with("Error: bad"), "{}", stack);
        assert!(stack.contains("at boom (test.js:2)"), "{}", stack);
        assert!(stack.contains("at eval (test.js:4)"), "{}", stack);
    }

    #[test]
    fn test_object_limit_raises_then_goes_fatal() {
        let config = EngineConfig::default().with_gc_threshold(usize::MAX);
        let builtins = Engine::with_config(config.clone()).heap.object_count();

        let mut engine = Engine::with_config(config.clone().with_max_objects(builtins + 50));
        let thrown = eval(&mut engine, "var a = []; for (var i = 0; i < 100; i++) a.push({}); 1")
            .unwrap_err();
        assert_eq!(error_message(&mut engine, thrown), "alloc failed");
        assert!(!engine.is_fatal());

        // Swallowing every AllocError eventually exhausts the reserve.
        let mut engine = Engine::with_config(config.with_max_objects(builtins + 50));
        let fatal = eval(&mut engine, "var a = []; for (;;) { try { a.push({}) } catch (e) {} }");
        assert!(fatal.is_err());
        assert!(engine.is_fatal());
    }
}
