//! Synchronization primitives
//!
//! Interrupt-safe locking for state shared between the interrupt handler,
//! the deferred worker and application calls.

pub mod mutex;
pub mod verifiable;

pub use mutex::Mutex;
pub use verifiable::{LockToken, VerifiableGuard, VerifiableLock};
