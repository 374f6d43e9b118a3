//! Consistent Hashing Module
//!
//! Maps keys onto the nodes responsible for them.
//!
//! ## Core Concepts
//! - **Identity**: Nodes and keys both live in the SHA-256 hex digest space, so a
//!   `KeyHash` can be compared directly against the `NodeHash` entries of the ring.
//! - **Placement**: A key is owned by the first node clockwise of it and replicated on
//!   the `num_replicas - 1` nodes that follow, wrapping past the end of the ring.

pub mod hash_ring;
pub mod types;
