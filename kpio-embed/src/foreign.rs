//! Host objects passed to script code by reference.
//!
//! A bridged object becomes an empty engine object carrying its [`RefId`]
//! under an internal key. Script code cannot see the key; it reaches the
//! host object through the `Host` namespace. The wrapper's finalizer unlinks
//! the reference once the engine has dropped every path to it.

use std::rc::Rc;

use kpio_js::{Engine, EngineResult, ErrorKind, Failure, Type};

use crate::bridge;
use crate::codec;
use crate::context::{Shared, HOST_ERROR_KEY};
use crate::error::{Error, Result};
use crate::refs::RefId;
use crate::value::{HostObject, HostValue};

/// Internal key holding the reference id of a wrapper object.
pub(crate) const FOREIGN_KEY: &[u8] = b"\xFFforeign";

/// Internal key holding the generation half of the reference id.
const GENERATION_KEY: &[u8] = b"\xFFforeign_generation";

/// Internal global key holding the shared wrapper finalizer.
const FINALIZER_KEY: &[u8] = b"\xFFforeign_finalizer";

/// Install the `Host` namespace and the wrapper finalizer. The global
/// object must sit on top of the stack.
pub(crate) fn install(engine: &mut Engine, shared: &Rc<Shared>) -> Result<()> {
    let result = install_globals(engine, shared);
    bridge::check(engine, shared, result)?;
    log::debug!("[KPIO EMBED] foreign bridge installed");
    Ok(())
}

fn install_globals(engine: &mut Engine, shared: &Rc<Shared>) -> EngineResult<()> {
    engine.push_object()?;

    let state = shared.clone();
    engine.push_native_function(move |engine| send(engine, &state), Some(3))?;
    engine.put_prop_string(-2, "send")?;

    let state = shared.clone();
    engine.push_native_function(move |engine| is_object(engine, &state), Some(1))?;
    engine.put_prop_string(-2, "isObject")?;

    engine.put_prop_string(-2, "Host")?;

    let state = shared.clone();
    engine.push_native_function(move |engine| finalize(engine, &state), Some(1))?;
    engine.put_prop_lstring(-2, FINALIZER_KEY)
}

/// Push a wrapper for `object`, linking a new reference.
pub(crate) fn push_wrapper(
    engine: &mut Engine,
    shared: &Shared,
    object: Rc<dyn HostObject>,
) -> Result<()> {
    let type_name = object.type_name().to_string();
    let id = shared.refs.borrow_mut().insert(object);
    let result = wrap(engine, id);
    if result.is_err() {
        shared.refs.borrow_mut().unlink(id);
    } else {
        log::trace!("[KPIO EMBED] wrapped {} as {:?}", type_name, id);
    }
    bridge::check(engine, shared, result)
}

fn wrap(engine: &mut Engine, id: RefId) -> EngineResult<()> {
    let (index, generation) = id.to_parts();
    engine.push_object()?;
    engine.push_pointer(index);
    engine.put_prop_lstring(-2, FOREIGN_KEY)?;
    engine.push_pointer(generation);
    engine.put_prop_lstring(-2, GENERATION_KEY)?;
    engine.push_global_object();
    engine.get_prop_lstring(-1, FINALIZER_KEY)?;
    engine.remove(-2)?;
    engine.set_finalizer(-2)
}

/// The live host object behind the wrapper at `idx`.
pub(crate) fn resolve(
    engine: &mut Engine,
    shared: &Shared,
    idx: i32,
) -> Result<Option<Rc<dyn HostObject>>> {
    let result = lookup(engine, shared, idx);
    bridge::check(engine, shared, result)
}

fn wrapped_id(engine: &mut Engine, idx: i32) -> EngineResult<Option<RefId>> {
    if engine.get_type(idx) != Type::Object {
        return Ok(None);
    }
    let Some(idx) = engine.normalize_index(idx) else {
        return Ok(None);
    };
    let top = engine.get_top();
    engine.get_prop_lstring(idx, FOREIGN_KEY)?;
    engine.get_prop_lstring(idx, GENERATION_KEY)?;
    let id = match (engine.get_pointer(-2), engine.get_pointer(-1)) {
        (Some(index), Some(generation)) => RefId::from_parts(index, generation),
        _ => None,
    };
    engine.set_top(top);
    Ok(id)
}

fn lookup(
    engine: &mut Engine,
    shared: &Shared,
    idx: i32,
) -> EngineResult<Option<Rc<dyn HostObject>>> {
    let id = wrapped_id(engine, idx)?;
    Ok(id.and_then(|id| shared.refs.borrow().get(id)))
}

/// Throw `error` into the engine. The original error is kept aside and
/// handed back if the throw escapes to the host.
pub(crate) fn raise(engine: &mut Engine, shared: &Shared, error: Error) -> Failure {
    if engine.is_fatal() {
        return engine.fatal(ErrorKind::Internal, error.to_string());
    }
    let (kind, message) = match error.script_kind() {
        Some(kind) => (
            ErrorKind::from_name(kind.name()).unwrap_or(ErrorKind::Error),
            error.message().to_string(),
        ),
        None => (ErrorKind::Uncaught, error.to_string()),
    };
    let id = shared.store_host_error(error);
    if let Err(failure) = engine.push_error_object(kind, &message) {
        shared.discard_host_error(id);
        return failure;
    }
    engine.push_pointer(id);
    match engine.put_prop_lstring(-2, HOST_ERROR_KEY) {
        Ok(()) => Failure::Error,
        Err(failure) => {
            shared.discard_host_error(id);
            failure
        }
    }
}

/// `Host.send(target, method, args)`
fn send(engine: &mut Engine, shared: &Shared) -> EngineResult<usize> {
    let Some(target) = lookup(engine, shared, 0)? else {
        return Err(engine.throw(ErrorKind::Type, "invalid foreign object"));
    };
    let method = match engine.get_lstring(1).map(|bytes| codec::decode(&bytes)) {
        Some(Ok(method)) => method,
        _ => return Err(engine.throw(ErrorKind::Type, "method name must be a string")),
    };
    if !engine.is_array(2) {
        return Err(engine.throw(ErrorKind::Type, "arguments must be an array"));
    }
    let args = match bridge::pull(engine, shared, 2) {
        Ok(HostValue::Sequence(args)) => args,
        Ok(_) => return Err(engine.throw(ErrorKind::Type, "arguments must be an array")),
        Err(err) => return Err(raise(engine, shared, err)),
    };
    log::trace!("[KPIO EMBED] send {} to {}", method, target.type_name());
    let outcome = target
        .send(&method, args)
        .and_then(|value| bridge::push(engine, shared, &value));
    match outcome {
        Ok(()) => Ok(1),
        Err(err) => Err(raise(engine, shared, err)),
    }
}

/// `Host.isObject(value)`
fn is_object(engine: &mut Engine, shared: &Shared) -> EngineResult<usize> {
    let live = lookup(engine, shared, 0)?.is_some();
    engine.push_boolean(live);
    Ok(1)
}

fn finalize(engine: &mut Engine, shared: &Shared) -> EngineResult<usize> {
    if let Some(id) = wrapped_id(engine, 0)? {
        shared.refs.borrow_mut().unlink(id);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use core::cell::Cell;

    #[derive(Debug, Default)]
    struct Counter {
        hits: Cell<i64>,
    }

    impl HostObject for Counter {
        fn type_name(&self) -> &str {
            "Counter"
        }

        fn send(&self, method: &str, args: Vec<HostValue>) -> Result<HostValue> {
            match method {
                "hit" => {
                    let step = args.first().and_then(HostValue::as_f64).unwrap_or(1.0) as i64;
                    self.hits.set(self.hits.get() + step);
                    Ok(HostValue::Integer(self.hits.get()))
                }
                _ => Err(Error::no_method(self.type_name(), method)),
            }
        }
    }

    fn setup() -> (Engine, Rc<Shared>) {
        let config = ContextConfig::default().with_foreign_bridge(true);
        let mut engine = Engine::with_config(config.engine.clone());
        let shared = Rc::new(Shared::new(config));
        engine.push_global_object();
        install(&mut engine, &shared).unwrap();
        engine.set_top(0);
        (engine, shared)
    }

    #[test]
    fn test_wrapper_resolves_to_same_object() {
        let (mut engine, shared) = setup();
        let counter: Rc<dyn HostObject> = Rc::new(Counter::default());
        push_wrapper(&mut engine, &shared, counter.clone()).unwrap();
        assert_eq!(engine.get_top(), 1);
        let resolved = resolve(&mut engine, &shared, -1).unwrap().unwrap();
        assert!(Rc::ptr_eq(&resolved, &counter));
        assert_eq!(shared.refs.borrow().len(), 1);
    }

    #[test]
    fn test_plain_objects_do_not_resolve() {
        let (mut engine, shared) = setup();
        engine.push_object().unwrap();
        engine.push_number(1.0);
        assert!(resolve(&mut engine, &shared, 0).unwrap().is_none());
        assert!(resolve(&mut engine, &shared, 1).unwrap().is_none());
        assert_eq!(engine.get_top(), 2);
    }

    #[test]
    fn test_stale_wrapper_misses_reused_slot() {
        let (mut engine, shared) = setup();
        let first: Rc<dyn HostObject> = Rc::new(Counter::default());
        let second: Rc<dyn HostObject> = Rc::new(Counter::default());
        push_wrapper(&mut engine, &shared, first).unwrap();
        let stale = wrapped_id(&mut engine, -1).unwrap().unwrap();
        assert!(shared.refs.borrow_mut().unlink(stale));

        push_wrapper(&mut engine, &shared, second.clone()).unwrap();
        let fresh = wrapped_id(&mut engine, -1).unwrap().unwrap();
        assert_eq!(fresh.to_parts().0, stale.to_parts().0);
        assert!(resolve(&mut engine, &shared, 0).unwrap().is_none());
        let resolved = resolve(&mut engine, &shared, 1).unwrap().unwrap();
        assert!(Rc::ptr_eq(&resolved, &second));
        assert_eq!(engine.get_top(), 2);
    }

    #[test]
    fn test_finalizer_unlinks_reference() {
        let (mut engine, shared) = setup();
        let counter: Rc<dyn HostObject> = Rc::new(Counter::default());
        push_wrapper(&mut engine, &shared, counter.clone()).unwrap();
        engine.set_top(0);
        engine.gc();
        engine.gc();
        assert!(shared.refs.borrow().is_empty());
        assert_eq!(Rc::strong_count(&counter), 1);
    }

    #[test]
    fn test_raise_keeps_original_error() {
        let (mut engine, shared) = setup();
        let failure = raise(&mut engine, &shared, Error::no_method("Counter", "x"));
        assert_eq!(failure, Failure::Error);
        assert_eq!(engine.get_top(), 1);
        assert_eq!(
            shared.take_host_error(&mut engine, -1),
            Some(Error::no_method("Counter", "x"))
        );
    }
}
