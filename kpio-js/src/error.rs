//! Engine error kinds and failure signalling.
//!
//! Errors inside the engine are ordinary script values (Error objects). This
//! module only names their kinds and describes how a call into the engine
//! can fail: recoverably, with the thrown value left on the value stack, or
//! fatally, after which the engine refuses further work.

use alloc::string::String;
use core::fmt;

use crate::value::Value;

/// Error kinds known to the engine.
///
/// The numeric codes follow the classic embeddable engine numbering so
/// embedders can map them without string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unimplemented,
    Unsupported,
    Internal,
    Alloc,
    Assertion,
    Api,
    Uncaught,
    Error,
    Eval,
    Range,
    Reference,
    Syntax,
    Type,
    Uri,
}

impl ErrorKind {
    /// Every kind, internal kinds first.
    pub const ALL: [ErrorKind; 14] = [
        ErrorKind::Unimplemented,
        ErrorKind::Unsupported,
        ErrorKind::Internal,
        ErrorKind::Alloc,
        ErrorKind::Assertion,
        ErrorKind::Api,
        ErrorKind::Uncaught,
        ErrorKind::Error,
        ErrorKind::Eval,
        ErrorKind::Range,
        ErrorKind::Reference,
        ErrorKind::Syntax,
        ErrorKind::Type,
        ErrorKind::Uri,
    ];

    /// Numeric error code.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Unimplemented => 50,
            ErrorKind::Unsupported => 51,
            ErrorKind::Internal => 52,
            ErrorKind::Alloc => 53,
            ErrorKind::Assertion => 54,
            ErrorKind::Api => 55,
            ErrorKind::Uncaught => 56,
            ErrorKind::Error => 100,
            ErrorKind::Eval => 101,
            ErrorKind::Range => 102,
            ErrorKind::Reference => 103,
            ErrorKind::Syntax => 104,
            ErrorKind::Type => 105,
            ErrorKind::Uri => 106,
        }
    }

    /// Look up a kind by numeric code.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    /// The `name` carried by Error objects of this kind.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Unimplemented => "UnimplementedError",
            ErrorKind::Unsupported => "UnsupportedError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Alloc => "AllocError",
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::Api => "APIError",
            ErrorKind::Uncaught => "UncaughtError",
            ErrorKind::Error => "Error",
            ErrorKind::Eval => "EvalError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Uri => "URIError",
        }
    }

    /// Look up a kind by Error object name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Whether this kind reports an engine fault rather than a script error.
    pub fn is_internal(self) -> bool {
        self.code() < 100
    }

    pub(crate) fn index(self) -> usize {
        Self::ALL.iter().position(|kind| *kind == self).unwrap_or(0)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An unrecoverable engine condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FatalError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FatalError {
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        FatalError {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal {}: {}", self.kind, self.message)
    }
}

/// Why an engine primitive did not complete.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    /// A value was thrown. It sits on top of the value stack.
    Error,
    /// The engine hit an unrecoverable condition and is no longer usable.
    Fatal(FatalError),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Error => f.write_str("error thrown"),
            Failure::Fatal(err) => write!(f, "{}", err),
        }
    }
}

/// Result type of the public stack API.
pub type EngineResult<T> = Result<T, Failure>;

/// Syntax error produced by the lexer or parser.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: &'static str,
    pub line: usize,
}

impl ParseError {
    pub fn new(message: &'static str, line: usize) -> Self {
        ParseError { message, line }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

/// Abrupt completion inside the interpreter.
#[derive(Debug, Clone)]
pub(crate) enum Fault {
    Throw(Value),
    Fatal(FatalError),
}

pub(crate) type JsResult<T> = Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_code(kind.code()), Some(kind));
            assert_eq!(ErrorKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ErrorKind::from_code(7), None);
        assert_eq!(ErrorKind::from_name("FooError"), None);
    }

    #[test]
    fn test_internal_family() {
        assert!(ErrorKind::Api.is_internal());
        assert!(ErrorKind::Uncaught.is_internal());
        assert!(!ErrorKind::Error.is_internal());
        assert!(!ErrorKind::Uri.is_internal());
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new("parse error", 3);
        assert_eq!(alloc::format!("{}", err), "parse error (line 3)");
    }
}
