//! Application layer
//!
//! Wires configuration into the running upgrade listener and owns the
//! process lifecycle (accept loop, shutdown signal).

mod runtime;

pub use runtime::Runtime;
