//! Request Coordination Module
//!
//! Turns client submissions and peer messages into fan-out state machines and
//! folds their replies back into a single answer.
//!
//! ## Core Concepts
//! - **Coordinator**: one [`internal::InternalRequestCoordinator`] per operation that
//!   needs replies from other nodes. It is advanced by `process` calls on every tick,
//!   never blocks, and retries unresponsive replicas on its own.
//! - **Reconciliation**: writes answer with the majority error code, reads with the
//!   newest value (see [`reconcile`]).
//! - **Failure protocols**: announced departure on `shutdown`, unannounced failure
//!   when membership gives up on a peer, and probabilistic gossip of both.
//! - **External ordering**: each client connection gets its replies back in the
//!   order it sent requests, whatever order the fan-outs complete in.

pub mod context;
pub mod external;
pub mod internal;
pub mod reconcile;
pub mod stage;
pub mod types;
