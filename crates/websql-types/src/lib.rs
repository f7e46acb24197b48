//! Wire-level types shared by the Web SQL bridge server.
//!
//! Everything a client sees on the HTTP or WebSocket side lives here: the
//! request/response bodies, the per-transaction message frames, and the two
//! error families of the Web SQL Database API. The engine-facing code never
//! appears in this crate.

mod error;
mod wire;

pub use error::{Failure, SqlError, UnknownError, WebKitException};
pub use wire::{
    AbortResp, BeginResp, ChangeVersionResp, CloseAllResp, CloseReq, CloseResp, CommitResp,
    DbVersionReq, DbVersionResp, ExecResp, OpenReq, OpenResp, Row, TransactionMsg, ok_frame,
};
