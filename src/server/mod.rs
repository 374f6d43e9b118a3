//! Server Module
//!
//! Composition root for a node. Owns the four stages and the transport and drives
//! them from a single `process` tick:
//!
//! 1. transport events are routed to the external or internal stage,
//! 2. coordinators advance and finished client requests are queued for reply,
//! 3. ready replies are flushed and idle client connections closed,
//! 4. membership runs its probe schedule and failure detection.
//!
//! The tick never fails. Errors from individual events are logged and the next
//! event is handled.

pub mod node;
pub mod types;
