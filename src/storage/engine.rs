use dashmap::DashMap;
use thiserror::Error;

use super::types::StoredValue;
use crate::ring::types::KeyHash;

#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    #[error("key not found")]
    NotFound,

    #[error("storage fault: {0}")]
    Fault(String),
}

/// Raw key-value map behind a node's persistence stage.
///
/// Implementations only store and fetch; timestamp comparison happens one level up.
pub trait PersistenceEngine: Send + Sync {
    fn put(&self, key: KeyHash, value: StoredValue) -> Result<(), EngineError>;

    fn get(&self, key: &KeyHash) -> Result<StoredValue, EngineError>;

    fn delete(&self, key: &KeyHash) -> Result<(), EngineError>;

    fn keys(&self) -> Vec<KeyHash>;

    fn len(&self) -> usize;
}

/// In-memory engine backed by a `DashMap`.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    data: DashMap<KeyHash, StoredValue>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceEngine for MemoryEngine {
    fn put(&self, key: KeyHash, value: StoredValue) -> Result<(), EngineError> {
        self.data.insert(key, value);
        Ok(())
    }

    fn get(&self, key: &KeyHash) -> Result<StoredValue, EngineError> {
        self.data
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound)
    }

    fn delete(&self, key: &KeyHash) -> Result<(), EngineError> {
        self.data
            .remove(key)
            .map(|_| ())
            .ok_or(EngineError::NotFound)
    }

    fn keys(&self) -> Vec<KeyHash> {
        self.data.iter().map(|entry| entry.key().clone()).collect()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}
