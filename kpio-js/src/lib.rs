//! KPIO JavaScript Engine
//!
//! A small embeddable ECMAScript (ES5 subset) interpreter. Embedders drive it
//! through a value stack, in the manner of classic embeddable engines.
//!
//! # Architecture
//!
//! The engine is organized into:
//!
//! - `lexer`: Tokenization of JavaScript source code
//! - `parser`: Parsing tokens into an Abstract Syntax Tree (AST)
//! - `ast`: AST node definitions
//! - `interpreter`: Tree-walking interpreter for execution
//! - `api`: The stack-oriented embedding API
//! - `value`: JavaScript value representation
//! - `string`: Engine strings (modified UTF-8 storage)
//! - `object`: Object and property handling
//! - `builtin`: Built-in objects and functions
//! - `json`: The `JSON` object
//! - `gc`: Simple mark-and-sweep garbage collector
//!
//! # Usage
//!
//! ```ignore
//! use kpio_js::{CompileFlags, Engine};
//!
//! let mut engine = Engine::new();
//! engine.push_string("1 + 2 * 3");
//! engine.push_string("input");
//! engine.compile(CompileFlags::EVAL)?;
//! engine.pcall(0)?;
//! assert_eq!(engine.get_number(-1), 7.0);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod api;
pub mod ast;
pub mod builtin;
pub mod error;
pub mod gc;
pub mod interpreter;
pub mod json;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod string;
pub mod token;
pub mod value;

pub use api::{CompileFlags, Engine, EngineConfig, EnumFlags, FatalHandler, HeapPtr};
pub use error::{EngineResult, ErrorKind, Failure, FatalError};
pub use gc::GcStats;
pub use string::{decode_units, encode_unit, JsString};
pub use value::{Type, Value};

/// JavaScript engine version.
pub const VERSION: &str = "0.1.0";

/// ECMAScript version supported.
pub const ECMA_VERSION: u32 = 5;
