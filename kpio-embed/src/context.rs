//! The embedding context: one engine, its bridge state and the public
//! operations.

use core::cell::{Cell, RefCell};
use std::rc::Rc;

use hashbrown::HashMap;
use kpio_js::{CompileFlags, Engine, EngineResult, Type};

use crate::bridge;
use crate::codec;
use crate::config::ContextConfig;
use crate::error::{Error, InternalErrorKind, Result};
use crate::foreign;
use crate::path::{self, IntoPropertyPath};
use crate::refs::ForeignReferenceTable;
use crate::value::HostValue;

/// Internal key carrying the pending host error id on a thrown error object.
pub(crate) const HOST_ERROR_KEY: &[u8] = b"\xFFhost_error";

/// Globals removed from every fresh context.
const REMOVED_GLOBALS: &[&str] = &["require"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Fatal,
}

/// State shared between a context and the native functions it installs.
pub(crate) struct Shared {
    pub config: ContextConfig,
    pub refs: RefCell<ForeignReferenceTable>,
    /// Host errors thrown through the engine, awaiting translation.
    pending: RefCell<HashMap<usize, Error>>,
    next_error: Cell<usize>,
    state: Cell<State>,
}

impl Shared {
    pub fn new(config: ContextConfig) -> Self {
        Shared {
            config,
            refs: RefCell::new(ForeignReferenceTable::new()),
            pending: RefCell::new(HashMap::new()),
            next_error: Cell::new(1),
            state: Cell::new(State::Active),
        }
    }

    /// Enter the terminal fatal state.
    pub fn latch(&self) {
        if self.state.replace(State::Fatal) == State::Active {
            log::error!("[KPIO EMBED] context latched into the fatal state");
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.state.get() == State::Fatal
    }

    pub fn store_host_error(&self, error: Error) -> usize {
        let id = self.next_error.get();
        self.next_error.set(id.wrapping_add(1));
        self.pending.borrow_mut().insert(id, error);
        id
    }

    pub fn discard_host_error(&self, id: usize) {
        self.pending.borrow_mut().remove(&id);
    }

    /// The host error attached to the error object at `idx`, if any.
    pub fn take_host_error(&self, engine: &mut Engine, idx: i32) -> Option<Error> {
        let top = engine.get_top();
        let id = match engine.get_prop_lstring(idx, HOST_ERROR_KEY) {
            Ok(true) if engine.get_type(-1) == Type::Pointer => engine.get_pointer(-1),
            _ => None,
        };
        engine.set_top(top);
        self.pending.borrow_mut().remove(&id?)
    }

    fn clear_pending(&self) {
        self.pending.borrow_mut().clear();
    }
}

/// Restores the empty stack when an operation ends, however it ends.
struct StackGuard<'a> {
    engine: &'a mut Engine,
    shared: &'a Shared,
}

impl<'a> StackGuard<'a> {
    fn new(engine: &'a mut Engine, shared: &'a Shared) -> Self {
        StackGuard { engine, shared }
    }

    fn check<T>(&mut self, result: EngineResult<T>) -> Result<T> {
        bridge::check(self.engine, self.shared, result)
    }

    fn push_source(&mut self, source: &str, filename: &str) {
        self.engine.push_lstring(&codec::encode(source));
        self.engine.push_lstring(&codec::encode(filename));
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        if !self.shared.is_fatal() {
            self.engine.set_top(0);
        }
        self.shared.clear_pending();
    }
}

/// A sandboxed script context.
///
/// Every operation leaves the engine stack empty. Once the engine reports a
/// fatal condition the context refuses all further work.
pub struct Context {
    // Dropped before `shared` so finalizers never outlive the table.
    engine: Engine,
    shared: Rc<Shared>,
}

impl Context {
    pub fn new() -> Result<Self> {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context, failing if the engine cannot be prepared (for
    /// example when `max_objects` leaves no room for the `Host` namespace).
    pub fn with_config(config: ContextConfig) -> Result<Self> {
        let mut engine = Engine::with_config(config.engine.clone());
        let shared = Rc::new(Shared::new(config));

        let handler_state = shared.clone();
        engine.set_fatal_handler(move |err| {
            log::error!("[KPIO EMBED] fatal engine error: {}", err);
            handler_state.latch();
        });

        let mut context = Context { engine, shared };
        if let Err(err) = context.setup() {
            log::warn!("[KPIO EMBED] context setup failed: {}", err);
            return Err(err);
        }
        log::debug!(
            "[KPIO EMBED] context ready (foreign bridge {})",
            if context.shared.config.enable_foreign_bridge { "on" } else { "off" }
        );
        Ok(context)
    }

    fn setup(&mut self) -> Result<()> {
        let shared = self.shared.clone();
        let mut guard = StackGuard::new(&mut self.engine, &shared);
        guard.engine.push_global_object();
        for name in REMOVED_GLOBALS {
            let result = guard.engine.del_prop_string(-1, name);
            guard.check(result)?;
        }
        if shared.config.enable_foreign_bridge {
            foreign::install(guard.engine, &shared)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &ContextConfig {
        &self.shared.config
    }

    pub fn is_fatal(&self) -> bool {
        self.shared.is_fatal()
    }

    /// Active with an empty engine stack.
    pub fn is_valid(&self) -> bool {
        !self.is_fatal() && self.engine.get_top() == 0
    }

    /// Host objects currently referenced from the engine.
    pub fn live_references(&self) -> usize {
        self.shared.refs.borrow().len()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_fatal() {
            log::warn!("[KPIO EMBED] operation refused: context is fatal");
            return Err(Error::Internal {
                kind: InternalErrorKind::Fatal,
                message: "context is in a fatal state".to_string(),
            });
        }
        Ok(())
    }

    /// Evaluate `source` and return its completion value.
    pub fn eval(&mut self, source: &str) -> Result<HostValue> {
        let filename = self.shared.config.default_filename.clone();
        self.eval_with_filename(source, &filename)
    }

    pub fn eval_with_filename(&mut self, source: &str, filename: &str) -> Result<HostValue> {
        self.ensure_active()?;
        let mut guard = StackGuard::new(&mut self.engine, &self.shared);
        guard.push_source(source, filename);
        let result = guard.engine.compile(CompileFlags::EVAL);
        guard.check(result)?;
        let result = guard.engine.pcall(0);
        guard.check(result)?;
        bridge::pull(guard.engine, guard.shared, -1)
    }

    /// Run `source` as a program, discarding its completion value.
    pub fn exec(&mut self, source: &str) -> Result<()> {
        let filename = self.shared.config.default_filename.clone();
        self.exec_with_filename(source, &filename)
    }

    pub fn exec_with_filename(&mut self, source: &str, filename: &str) -> Result<()> {
        self.ensure_active()?;
        let mut guard = StackGuard::new(&mut self.engine, &self.shared);
        guard.push_source(source, filename);
        let result = guard.engine.compile(CompileFlags::empty());
        guard.check(result)?;
        let result = guard.engine.pcall(0);
        guard.check(result)?;
        Ok(())
    }

    /// Read a global, or a property nested below one.
    pub fn get_property<P: IntoPropertyPath>(&mut self, path: P) -> Result<HostValue> {
        self.ensure_active()?;
        let path = path.into_property_path()?;
        let mut guard = StackGuard::new(&mut self.engine, &self.shared);
        path::resolve(guard.engine, guard.shared, &path)?;
        bridge::pull(guard.engine, guard.shared, -1)
    }

    /// Call the function at `path` with its parent object as `this`.
    pub fn call_property<P: IntoPropertyPath>(
        &mut self,
        path: P,
        args: &[HostValue],
    ) -> Result<HostValue> {
        self.ensure_active()?;
        let path = path.into_property_path()?;
        let mut guard = StackGuard::new(&mut self.engine, &self.shared);
        path::call(guard.engine, guard.shared, &path, args)?;
        bridge::pull(guard.engine, guard.shared, -1)
    }

    /// Install a global function backed by `callback`.
    ///
    /// Arguments are pulled into host values; an error returned by the
    /// callback is thrown into the engine and comes back unchanged if it
    /// escapes the surrounding operation.
    pub fn define_function<F>(&mut self, name: &str, callback: F) -> Result<()>
    where
        F: Fn(Vec<HostValue>) -> Result<HostValue> + 'static,
    {
        self.ensure_active()?;
        let shared = self.shared.clone();
        let native = move |engine: &mut Engine| {
            let mut args = Vec::with_capacity(engine.get_top());
            for idx in 0..engine.get_top() {
                match bridge::pull(engine, &shared, idx as i32) {
                    Ok(value) => args.push(value),
                    Err(err) => return Err(foreign::raise(engine, &shared, err)),
                }
            }
            let outcome = callback(args).and_then(|value| bridge::push(engine, &shared, &value));
            match outcome {
                Ok(()) => Ok(1),
                Err(err) => Err(foreign::raise(engine, &shared, err)),
            }
        };

        let mut guard = StackGuard::new(&mut self.engine, &self.shared);
        guard.engine.push_global_object();
        let result = guard.engine.push_native_function(native, None);
        guard.check(result)?;
        let result = guard.engine.put_prop_lstring(-2, &codec::encode(name));
        guard.check(result)?;
        log::debug!("[KPIO EMBED] defined function {}", name);
        Ok(())
    }

    /// Run a full engine collection, finalizers included.
    pub fn gc(&mut self) -> usize {
        if self.is_fatal() {
            return 0;
        }
        self.engine.gc()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::debug!(
            "[KPIO EMBED] dropping context with {} live references",
            self.shared.refs.borrow().len()
        );
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("fatal", &self.is_fatal())
            .field("live_references", &self.live_references())
            .finish()
    }
}
