//! Storage behind the request loop.
//!
//! Values arrive already packed, so an engine stores bytes it never has to
//! interpret.
use std::collections::HashMap;

use thiserror::Error;

use crate::protocol::PackedValue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine full: {capacity} value(s) stored")]
    Full { capacity: usize },
}

pub trait Engine {
    /// Stores `value` under `key`, replacing any previous value.
    fn put(&mut self, key: String, value: PackedValue) -> Result<(), EngineError>;

    fn get(&self, key: &str) -> Option<PackedValue>;

    /// Number of stored values.
    fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    values: HashMap<String, PackedValue>,
    capacity: Option<usize>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that refuses new keys once `capacity` values are stored.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: HashMap::new(),
            capacity: Some(capacity),
        }
    }
}

impl Engine for MemoryEngine {
    fn put(&mut self, key: String, value: PackedValue) -> Result<(), EngineError> {
        if let Some(capacity) = self.capacity {
            if self.values.len() >= capacity && !self.values.contains_key(&key) {
                return Err(EngineError::Full { capacity });
            }
        }
        self.values.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Option<PackedValue> {
        self.values.get(key).cloned()
    }

    fn len(&self) -> usize {
        self.values.len()
    }
}
