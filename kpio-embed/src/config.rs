//! Context configuration.

use kpio_js::EngineConfig;

use crate::value::HostValue;

/// Filename reported for code run without one.
pub const DEFAULT_FILENAME: &str = "(eval)";

/// Nesting accepted when converting containers in either direction.
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Options fixed when a [`Context`](crate::Context) is created.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Value substituted for engine values without a host representation.
    pub complex_object: HostValue,
    /// Allow opaque host objects into the engine and install `Host`.
    pub enable_foreign_bridge: bool,
    pub default_filename: String,
    pub max_depth: usize,
    pub engine: EngineConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            complex_object: HostValue::Complex,
            enable_foreign_bridge: false,
            default_filename: DEFAULT_FILENAME.to_string(),
            max_depth: DEFAULT_MAX_DEPTH,
            engine: EngineConfig::default(),
        }
    }
}

impl ContextConfig {
    pub fn with_complex_object(mut self, sentinel: HostValue) -> Self {
        self.complex_object = sentinel;
        self
    }

    pub fn with_foreign_bridge(mut self, enabled: bool) -> Self {
        self.enable_foreign_bridge = enabled;
        self
    }

    pub fn with_default_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.default_filename = filename.into();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_engine_config(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }
}
