use super::engine::{EngineError, MemoryEngine, PersistenceEngine};
use super::types::StoredValue;
use crate::protocol::message::{Operation, Reply};
use crate::protocol::types::ErrorCode;
use crate::ring::types::{KeyHash, NodeHash};

/// Applies the last-write-wins rule on top of a [`PersistenceEngine`] and reports
/// outcomes as wire error codes.
pub struct PersistenceStage {
    engine: Box<dyn PersistenceEngine>,
}

impl Default for PersistenceStage {
    fn default() -> Self {
        Self::new(Box::new(MemoryEngine::new()))
    }
}

impl PersistenceStage {
    pub fn new(engine: Box<dyn PersistenceEngine>) -> Self {
        Self { engine }
    }

    /// Stores `value` unless an existing entry is at least as new.
    ///
    /// A stale put is dropped but still answers `Success`.
    pub fn put(&mut self, key: KeyHash, value: StoredValue) -> ErrorCode {
        let stored = match self.engine.get(&key) {
            Ok(existing) if value.timestamp <= existing.timestamp => {
                tracing::debug!(
                    "Ignoring stale put for {} ({} <= {})",
                    key,
                    value.timestamp,
                    existing.timestamp
                );
                Ok(())
            }
            Ok(_) | Err(EngineError::NotFound) => self.engine.put(key, value),
            Err(e) => Err(e),
        };

        match stored {
            Ok(()) => ErrorCode::Success,
            Err(e) => {
                tracing::error!("Put failed: {}", e);
                ErrorCode::Unclassified
            }
        }
    }

    pub fn get(&self, key: &KeyHash) -> Result<StoredValue, ErrorCode> {
        self.engine.get(key).map_err(|e| match e {
            EngineError::NotFound => ErrorCode::KeyNotFound,
            EngineError::Fault(reason) => {
                tracing::error!("Get failed: {}", reason);
                ErrorCode::Unclassified
            }
        })
    }

    pub fn delete(&mut self, key: &KeyHash) -> ErrorCode {
        match self.engine.delete(key) {
            Ok(()) => ErrorCode::Success,
            Err(EngineError::NotFound) => ErrorCode::KeyNotFound,
            Err(EngineError::Fault(reason)) => {
                tracing::error!("Delete failed: {}", reason);
                ErrorCode::Unclassified
            }
        }
    }

    pub fn keys(&self) -> Vec<KeyHash> {
        self.engine.keys()
    }

    pub fn len(&self) -> usize {
        self.engine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `operation` against local storage and builds the reply this replica
    /// contributes to the coordinator.
    pub fn execute(&mut self, operation: &Operation, node_hash: &NodeHash) -> Reply {
        match operation {
            Operation::Put {
                key,
                value,
                timestamp,
            } => {
                let stored = StoredValue::new(value.clone(), timestamp.clone());
                let code = self.put(key.clone(), stored);
                Reply::status(node_hash.clone(), code)
            }
            Operation::Get { key } => match self.get(key) {
                Ok(stored) => Reply {
                    value: Some(stored.value),
                    timestamp: Some(stored.timestamp),
                    ..Reply::status(node_hash.clone(), ErrorCode::Success)
                },
                Err(code) => Reply::status(node_hash.clone(), code),
            },
            Operation::Delete { key } => Reply::status(node_hash.clone(), self.delete(key)),
        }
    }
}
