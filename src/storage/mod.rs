//! Local Storage Module
//!
//! The node-local half of the key-value store: every replica keeps its share of the
//! keyspace here, keyed by `KeyHash`.
//!
//! ## Core Concepts
//! - **Last-write-wins**: a put only replaces an existing value when its timestamp is
//!   strictly newer. Stale puts are dropped but still acknowledged as successful.
//! - **Engine boundary**: `PersistenceEngine` is the raw map; `PersistenceStage` adds the
//!   timestamp rule and translates engine outcomes into wire error codes.

pub mod engine;
pub mod stage;
pub mod types;

#[cfg(test)]
mod tests;
