use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BufferError, Result};
use crate::json::{JsonReadBuffer, JsonWriteBuffer};
use crate::{ReadBuffer, WriteBuffer};

/// Format identifier of the built-in JSON buffer pair.
pub const JSON_FORMAT: &str = "json";

/// A matched read/write buffer pair for one wire format.
#[derive(Clone)]
pub struct BufferPair {
    pub reader: Arc<dyn ReadBuffer>,
    pub writer: Arc<dyn WriteBuffer>,
}

impl BufferPair {
    /// The built-in JSON pair.
    pub fn json() -> Self {
        Self {
            reader: Arc::new(JsonReadBuffer),
            writer: Arc::new(JsonWriteBuffer),
        }
    }

    pub fn format(&self) -> &'static str {
        self.writer.format()
    }
}

impl std::fmt::Debug for BufferPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPair")
            .field("format", &self.format())
            .finish()
    }
}

/// Constructor for a buffer pair.
pub type BufferFactory = Arc<dyn Fn() -> BufferPair + Send + Sync>;

/// Format-identifier-keyed registry of buffer constructors.
///
/// Requesting an unregistered format is an error; the registry never falls
/// back on its own. The channel constructor is the one place allowed to
/// catch that error and substitute JSON.
pub struct BufferRegistry {
    factories: HashMap<String, BufferFactory>,
}

impl BufferRegistry {
    /// Create a registry with the JSON pair pre-registered.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(JSON_FORMAT, Arc::new(BufferPair::json));
        registry
    }

    /// Register (or replace) a factory for a format identifier.
    pub fn register(&mut self, format: impl Into<String>, factory: BufferFactory) {
        self.factories.insert(format.into(), factory);
    }

    /// Construct the buffer pair for a format.
    pub fn create(&self, format: &str) -> Result<BufferPair> {
        match self.factories.get(format) {
            Some(factory) => Ok(factory()),
            None => Err(BufferError::UnknownFormat(format.to_string())),
        }
    }

    pub fn has_format(&self, format: &str) -> bool {
        self.factories.contains_key(format)
    }

    /// Registered format identifiers, sorted.
    pub fn formats(&self) -> Vec<String> {
        let mut formats: Vec<String> = self.factories.keys().cloned().collect();
        formats.sort_unstable();
        formats
    }
}

impl Default for BufferRegistry {
    fn default() -> Self {
        Self::new()
    }
}
