//! The Web SQL emulation core: a registry of SQLite-backed databases and
//! the transaction machinery that maps the asynchronous Web SQL API
//! (`openDatabase`, `transaction`, `executeSql`, `changeVersion`) onto
//! exclusive `rusqlite` connections.
//!
//! All methods on [`Bridge`] block on engine I/O; callers on an async
//! runtime are expected to run them through `spawn_blocking`. The one
//! async touchpoint is the per-transaction idle timer, which is armed as a
//! tokio task when a transaction begins, so [`Bridge::begin_transaction`]
//! must be called from within a tokio runtime.

mod error;
mod metadata;
mod registry;
mod rows;
mod transaction;

pub use error::BridgeError;
pub use registry::{BeginHook, Bridge, BridgeConfig};
pub use transaction::ExecOutcome;
