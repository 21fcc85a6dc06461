//! Last-known state of a stack.
//!
//! The state store is the only thing that survives between invocations: plan
//! diffs against it and apply writes back to it after every entry.

mod lock;
mod storage;
mod types;

pub use lock::{LockCommand, LockHolder, StateLock, StateLockError};
pub use storage::StateStore;
pub use types::*;
