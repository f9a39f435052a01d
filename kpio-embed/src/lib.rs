//! KPIO JavaScript embedding layer
//!
//! Runs untrusted script code inside a [`Context`] that owns one
//! `kpio_js::Engine`. Host values cross the boundary by conversion
//! ([`HostValue`]); host objects can optionally cross by reference and be
//! driven from script through the `Host` namespace.
//!
//! # Architecture
//!
//! - `context`: the [`Context`] and its operations
//! - `bridge`: host to engine value conversion and back
//! - `codec`: host UTF-8 to engine CESU-8 strings
//! - `refs`: live references to host objects held by the engine
//! - `foreign`: wrapper objects and the `Host` namespace
//! - `path`: nested property lookup from the global object
//! - `error`: host error taxonomy and engine failure translation
//!
//! # Usage
//!
//! ```ignore
//! use kpio_embed::{Context, HostValue};
//!
//! let mut ctx = Context::new()?;
//! ctx.exec("var x = 40 + 2")?;
//! assert_eq!(ctx.get_property("x")?, HostValue::Float(42.0));
//! assert_eq!(
//!     ctx.call_property(["Math", "pow"], &[2.into(), 10.into()])?,
//!     HostValue::Float(1024.0)
//! );
//! ```

mod bridge;
pub mod codec;
mod config;
mod context;
mod error;
mod foreign;
mod path;
mod refs;
mod value;

#[cfg(test)]
mod tests;

pub use config::{ContextConfig, DEFAULT_FILENAME, DEFAULT_MAX_DEPTH};
pub use context::Context;
pub use error::{Error, InternalErrorKind, Result, ScriptErrorKind};
pub use kpio_js::EngineConfig;
pub use path::{IntoPropertyPath, PropertyPath};
pub use refs::{ForeignReferenceTable, RefId};
pub use value::{HostObject, HostValue, MapKey};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
