//! The bitmsg node core.
//!
//! Wires the protocol, crypto, and network layers to a set of
//! repository ports and drives the send/receive pipeline:
//!
//! - [`ports`] — the abstract interfaces the node consumes
//! - [`memory`] — in-memory port implementations for tests and
//!   embedding
//! - [`engine`] — the multi-threaded proof-of-work engine
//! - [`pow_service`] — the persistent proof-of-work queue
//! - [`dispatch`] — inbound object handling
//! - [`context`] — collaborator wiring and outbound operations
//! - [`node`] — the public facade

pub mod context;
pub mod dispatch;
pub mod engine;
pub mod memory;
pub mod node;
pub mod ports;
pub mod pow_service;
