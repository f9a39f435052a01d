//! Host error taxonomy and translation of engine failures.

use core::fmt;

use kpio_js::{Engine, ErrorKind, Failure};

use crate::codec;
use crate::context::Shared;

/// Script error classes, mirroring the engine's script-visible errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptErrorKind {
    /// Generic `Error`, also used for unknown error names and thrown
    /// non-error values.
    Error,
    Eval,
    Range,
    Reference,
    Syntax,
    Type,
    Uri,
}

impl ScriptErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ScriptErrorKind::Error => "Error",
            ScriptErrorKind::Eval => "EvalError",
            ScriptErrorKind::Range => "RangeError",
            ScriptErrorKind::Reference => "ReferenceError",
            ScriptErrorKind::Syntax => "SyntaxError",
            ScriptErrorKind::Type => "TypeError",
            ScriptErrorKind::Uri => "URIError",
        }
    }
}

/// Engine-internal fault classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalErrorKind {
    Unimplemented,
    Unsupported,
    Internal,
    Alloc,
    Assertion,
    Api,
    Uncaught,
    /// The engine hit an unrecoverable condition; the context is latched.
    Fatal,
}

impl InternalErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            InternalErrorKind::Unimplemented => "UnimplementedError",
            InternalErrorKind::Unsupported => "UnsupportedError",
            InternalErrorKind::Internal => "InternalError",
            InternalErrorKind::Alloc => "AllocError",
            InternalErrorKind::Assertion => "AssertionError",
            InternalErrorKind::Api => "APIError",
            InternalErrorKind::Uncaught => "UncaughtError",
            InternalErrorKind::Fatal => "FatalError",
        }
    }
}

/// Errors reported by a [`Context`](crate::Context).
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Script code threw, or failed to compile.
    Script {
        kind: ScriptErrorKind,
        message: String,
    },
    /// The engine reported an internal fault.
    Internal {
        kind: InternalErrorKind,
        message: String,
    },
    /// A host value has no engine representation.
    Type(String),
    /// Invalid input to the embedding API.
    Argument(String),
    /// A bridged host object does not implement a method.
    NoMethod { receiver: String, method: String },
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub fn no_method(receiver: &str, method: &str) -> Self {
        Error::NoMethod {
            receiver: receiver.to_string(),
            method: method.to_string(),
        }
    }

    pub(crate) fn fatal<S: Into<String>>(message: S) -> Self {
        Error::Internal {
            kind: InternalErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Message text, as supplied by the engine for script and internal errors.
    pub fn message(&self) -> &str {
        match self {
            Error::Script { message, .. } | Error::Internal { message, .. } => message,
            Error::Type(message) | Error::Argument(message) => message,
            Error::NoMethod { method, .. } => method,
        }
    }

    pub fn script_kind(&self) -> Option<ScriptErrorKind> {
        match self {
            Error::Script { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn internal_kind(&self) -> Option<InternalErrorKind> {
        match self {
            Error::Internal { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.internal_kind() == Some(InternalErrorKind::Fatal)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Script { kind, message } => write!(f, "{}: {}", kind.name(), message),
            Error::Internal { kind, message } => write!(f, "{}: {}", kind.name(), message),
            Error::Type(message) | Error::Argument(message) => f.write_str(message),
            Error::NoMethod { receiver, method } => {
                write!(f, "undefined method `{}' for {}", method, receiver)
            }
        }
    }
}

impl std::error::Error for Error {}

/// Map an engine error kind onto the host taxonomy.
pub(crate) fn classify(kind: ErrorKind, message: String) -> Error {
    let internal = |kind| Error::Internal { kind, message: message.clone() };
    let script = |kind| Error::Script { kind, message: message.clone() };
    match kind {
        ErrorKind::Unimplemented => internal(InternalErrorKind::Unimplemented),
        ErrorKind::Unsupported => internal(InternalErrorKind::Unsupported),
        ErrorKind::Internal => internal(InternalErrorKind::Internal),
        ErrorKind::Alloc => internal(InternalErrorKind::Alloc),
        ErrorKind::Assertion => internal(InternalErrorKind::Assertion),
        ErrorKind::Api => internal(InternalErrorKind::Api),
        ErrorKind::Uncaught => internal(InternalErrorKind::Uncaught),
        ErrorKind::Error => script(ScriptErrorKind::Error),
        ErrorKind::Eval => script(ScriptErrorKind::Eval),
        ErrorKind::Range => script(ScriptErrorKind::Range),
        ErrorKind::Reference => script(ScriptErrorKind::Reference),
        ErrorKind::Syntax => script(ScriptErrorKind::Syntax),
        ErrorKind::Type => script(ScriptErrorKind::Type),
        ErrorKind::Uri => script(ScriptErrorKind::Uri),
    }
}

/// Turn a failed engine primitive into a host error.
///
/// A recoverable failure reads the thrown value on top of the stack; the
/// caller's stack guard discards it afterwards.
pub(crate) fn translate(engine: &mut Engine, shared: &Shared, failure: Failure) -> Error {
    match failure {
        Failure::Fatal(err) => {
            shared.latch();
            Error::fatal(err.to_string())
        }
        Failure::Error => translate_thrown(engine, shared),
    }
}

fn translate_thrown(engine: &mut Engine, shared: &Shared) -> Error {
    if engine.get_type(-1) != kpio_js::Type::Object {
        let message = engine.safe_to_string(-1);
        return Error::Script {
            kind: ScriptErrorKind::Error,
            message,
        };
    }
    if let Some(original) = shared.take_host_error(engine, -1) {
        return original;
    }
    let name = string_property(engine, "name");
    let message = string_property(engine, "message").unwrap_or_else(|| engine.safe_to_string(-1));
    match name.as_deref().and_then(ErrorKind::from_name) {
        Some(kind) => classify(kind, message),
        None => Error::Script {
            kind: ScriptErrorKind::Error,
            message,
        },
    }
}

/// String-valued property of the object on top, leaving the stack as is.
fn string_property(engine: &mut Engine, key: &str) -> Option<String> {
    let top = engine.get_top();
    let value = match engine.get_prop_string(-1, key) {
        Ok(_) => engine.get_lstring(-1).map(|bytes| {
            codec::decode(&bytes).unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned())
        }),
        Err(_) => None,
    };
    engine.set_top(top);
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kinds_map_to_families() {
        for kind in ErrorKind::ALL {
            let error = classify(kind, "m".to_string());
            assert_eq!(kind.is_internal(), error.internal_kind().is_some(), "{:?}", kind);
            assert_eq!(error.message(), "m");
        }
        assert_eq!(
            classify(ErrorKind::Uri, "bad".to_string()).script_kind(),
            Some(ScriptErrorKind::Uri)
        );
    }

    #[test]
    fn test_display() {
        let error = classify(ErrorKind::Reference, "identifier 'x' undefined".to_string());
        assert_eq!(error.to_string(), "ReferenceError: identifier 'x' undefined");
        assert_eq!(
            Error::no_method("Counter", "explode").to_string(),
            "undefined method `explode' for Counter"
        );
        assert!(Error::fatal("gone").is_fatal());
    }
}
