//! The per-transaction WebSocket conversation.
//!
//! One socket carries one session; a session may run several
//! begin/commit cycles against the `dbId` named in the upgrade URL. Frame
//! handling lives in [`Session`] so the protocol can be exercised without
//! a socket; the async shell here only shuttles frames and enforces the
//! disconnect rule (a live transaction is aborted when the peer goes
//! away).

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use websql_core::Bridge;
use websql_types::{
    AbortResp, BeginResp, ChangeVersionResp, CommitResp, ExecResp, Failure, SqlError,
    TransactionMsg, ok_frame,
};

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(rename = "dbId", default)]
    db_id: String,
}

pub async fn transaction(
    ws: WebSocketUpgrade,
    Query(query): Query<TransactionQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.bridge.clone(), query))
}

async fn handle_socket(mut socket: WebSocket, bridge: Bridge, query: TransactionQuery) {
    debug!("transaction session start");

    let Ok(db_id) = query.db_id.parse::<u32>() else {
        error!(db_id = %query.db_id, "cannot parse dbId in query");
        return;
    };

    let mut tx_id = 0u32;
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };
        let frame: TransactionMsg = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "unreadable transaction frame");
                break;
            }
        };

        let worker_bridge = bridge.clone();
        let current_tx = tx_id;
        let joined = tokio::task::spawn_blocking(move || {
            let mut session = Session {
                bridge: worker_bridge,
                db_id,
                tx_id: current_tx,
            };
            let step = session.handle(frame);
            (session.tx_id, step)
        })
        .await;

        let step = match joined {
            Ok((next_tx, step)) => {
                tx_id = next_tx;
                step
            }
            Err(error) => {
                error!(%error, "transaction worker join error");
                break;
            }
        };

        match step {
            Step::Reply(value) => {
                if socket.send(Message::Text(value.to_string().into())).await.is_err() {
                    break;
                }
            }
            Step::ReplyThenClose(value) => {
                let _ = socket.send(Message::Text(value.to_string().into())).await;
                break;
            }
            Step::Silent => {}
        }
    }

    if tx_id != 0 {
        debug!(tx_id, "websocket closed, aborting open transaction");
        let bridge = bridge.clone();
        let _ = tokio::task::spawn_blocking(move || {
            let mut session = Session {
                bridge,
                db_id,
                tx_id,
            };
            session.close();
        })
        .await;
    }
    debug!("transaction session end");
}

/// What the driver does with the reply for one inbound frame.
#[derive(Debug)]
enum Step {
    Reply(Value),
    ReplyThenClose(Value),
    Silent,
}

/// Protocol state for one socket: which transaction (if any) is live.
/// `tx_id == 0` means none.
struct Session {
    bridge: Bridge,
    db_id: u32,
    tx_id: u32,
}

impl Session {
    fn handle(&mut self, frame: TransactionMsg) -> Step {
        debug!(cmd = %frame.cmd, "transaction frame");
        match frame.cmd.as_str() {
            "begin" => self.begin(),
            "exec" => self.exec(frame),
            "commit" => self.commit(),
            "abort" => self.abort(),
            "changeVersion" => self.change_version(frame),
            other => {
                error!(cmd = other, "unknown command");
                Step::Silent
            }
        }
    }

    /// A second `begin` atop a live transaction is tolerated: the old one
    /// is aborted and a fresh one started.
    fn begin(&mut self) -> Step {
        if self.tx_id != 0 {
            error!(tx_id = self.tx_id, "begin before commit or abort");
            let _ = self.bridge.abort(self.tx_id);
            self.tx_id = 0;
        }
        match self.bridge.begin_transaction(self.db_id) {
            Ok(tx_id) => {
                self.tx_id = tx_id;
                Step::Reply(ok_frame(&BeginResp {}))
            }
            Err(error) => {
                debug!(%error, "failed to begin transaction");
                Step::ReplyThenClose(error.failure().frame())
            }
        }
    }

    fn exec(&mut self, frame: TransactionMsg) -> Step {
        if self.tx_id == 0 {
            error!("exec called but tx is nil");
            return Step::Reply(Failure::other("exec called but tx is nil").frame());
        }
        if frame.statement.is_empty() {
            debug!("transaction statement missing");
            return Step::Reply(Failure::Sql(SqlError::invalid_argument()).frame());
        }
        match self.bridge.exec(self.tx_id, &frame.statement, &frame.args) {
            Ok(outcome) => Step::Reply(ok_frame(&ExecResp {
                rows: outcome.rows,
                insert_id: outcome.insert_id,
                rows_affected: outcome.rows_affected,
            })),
            Err(error) => {
                debug!(%error, statement = %frame.statement, "exec failed");
                Step::Reply(error.failure().frame())
            }
        }
    }

    fn commit(&mut self) -> Step {
        if self.tx_id == 0 {
            error!("commit called but tx is nil");
            return Step::Reply(Failure::other("commit called but tx is nil").frame());
        }
        let tx_id = self.tx_id;
        self.tx_id = 0;
        match self.bridge.commit(tx_id) {
            Ok(()) => Step::Reply(ok_frame(&CommitResp {})),
            Err(error) => {
                debug!(%error, "commit failed");
                Step::Reply(error.failure().frame())
            }
        }
    }

    fn abort(&mut self) -> Step {
        if self.tx_id == 0 {
            error!("abort called but tx is nil");
            return Step::Reply(Failure::other("abort called but tx is nil").frame());
        }
        let tx_id = self.tx_id;
        self.tx_id = 0;
        match self.bridge.abort(tx_id) {
            Ok(()) => Step::Reply(ok_frame(&AbortResp {})),
            Err(error) => {
                debug!(%error, "abort failed");
                Step::Reply(error.failure().frame())
            }
        }
    }

    fn change_version(&mut self, frame: TransactionMsg) -> Step {
        if self.tx_id == 0 {
            error!("changeVersion called but tx is nil");
            return Step::Reply(Failure::other("changeVersion called but tx is nil").frame());
        }
        match self
            .bridge
            .change_version(self.tx_id, &frame.old_version, &frame.new_version)
        {
            Ok(()) => Step::Reply(ok_frame(&ChangeVersionResp {})),
            Err(error) => {
                debug!(
                    %error,
                    old = %frame.old_version,
                    new = %frame.new_version,
                    "change version failed"
                );
                Step::Reply(error.failure().frame())
            }
        }
    }

    /// Disconnect path: a transaction the peer never finished is rolled
    /// back rather than left to the idle timer.
    fn close(&mut self) {
        if self.tx_id != 0 {
            let _ = self.bridge.abort(self.tx_id);
            self.tx_id = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use websql_core::BridgeConfig;

    fn session_for(dir: &TempDir) -> Session {
        let bridge = Bridge::new(BridgeConfig::new(dir.path()));
        let (db_id, _) = bridge.open("ws", "", false).unwrap();
        Session {
            bridge,
            db_id,
            tx_id: 0,
        }
    }

    fn msg(cmd: &str) -> TransactionMsg {
        TransactionMsg {
            cmd: cmd.to_string(),
            ..TransactionMsg::default()
        }
    }

    fn exec_msg(statement: &str, args: Vec<Value>) -> TransactionMsg {
        TransactionMsg {
            cmd: "exec".to_string(),
            statement: statement.to_string(),
            args,
            ..TransactionMsg::default()
        }
    }

    fn reply(step: Step) -> Value {
        match step {
            Step::Reply(value) => value,
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn begin_exec_commit_conversation() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);

        let frame = reply(session.handle(msg("begin")));
        assert_eq!(frame, json!({"data": {}}));
        assert_ne!(session.tx_id, 0);

        let frame = reply(session.handle(exec_msg(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)",
            vec![],
        )));
        assert!(frame["data"].get("insertId").is_none());
        assert_eq!(frame["data"]["rowsAffected"], 0);

        let frame = reply(session.handle(exec_msg(
            "INSERT INTO t (id, name) VALUES (?, ?)",
            vec![json!(0), json!("hello")],
        )));
        assert_eq!(frame["data"]["insertId"], 0);
        assert_eq!(frame["data"]["rowsAffected"], 1);

        let frame = reply(session.handle(msg("commit")));
        assert_eq!(frame, json!({"data": {}}));
        assert_eq!(session.tx_id, 0);

        reply(session.handle(msg("begin")));
        let frame = reply(session.handle(exec_msg("SELECT * FROM t", vec![])));
        assert_eq!(frame["data"]["rows"], json!([{"id": 0, "name": "hello"}]));
        reply(session.handle(msg("commit")));
    }

    #[tokio::test]
    async fn commands_without_a_transaction_reply_errors() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);

        for cmd in ["exec", "commit", "abort", "changeVersion"] {
            let frame = reply(session.handle(msg(cmd)));
            assert_eq!(
                frame["error"]["message"],
                format!("{cmd} called but tx is nil")
            );
        }
    }

    #[tokio::test]
    async fn missing_statement_replies_invalid_argument() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);
        reply(session.handle(msg("begin")));

        let frame = reply(session.handle(msg("exec")));
        assert_eq!(frame["sqlerror"]["code"], 0);
        assert_eq!(
            frame["sqlerror"]["message"],
            "internal error(invalid argument)"
        );

        // The session keeps going.
        let frame = reply(session.handle(exec_msg("SELECT 1 AS one", vec![])));
        assert_eq!(frame["data"]["rows"][0]["one"], 1);
        reply(session.handle(msg("abort")));
    }

    #[tokio::test]
    async fn second_begin_aborts_the_previous_transaction() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);

        reply(session.handle(msg("begin")));
        reply(session.handle(exec_msg("CREATE TABLE t (x INTEGER)", vec![])));
        let first_tx = session.tx_id;

        reply(session.handle(msg("begin")));
        assert_ne!(session.tx_id, first_tx);

        // The first transaction was rolled back, so its table is gone.
        let frame = reply(session.handle(exec_msg(
            "SELECT name FROM sqlite_master WHERE name = 't'",
            vec![],
        )));
        assert_eq!(frame["data"]["rows"], json!([]));
        reply(session.handle(msg("commit")));
    }

    #[tokio::test]
    async fn begin_on_unknown_database_closes_the_session() {
        let dir = TempDir::new().unwrap();
        let bridge = Bridge::new(BridgeConfig::new(dir.path()));
        let mut session = Session {
            bridge,
            db_id: 777,
            tx_id: 0,
        };

        match session.handle(msg("begin")) {
            Step::ReplyThenClose(frame) => {
                assert_eq!(frame["sqlerror"]["code"], 0);
                assert_eq!(frame["sqlerror"]["message"], "internal error(db not found)");
            }
            other => panic!("expected reply-then-close, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disconnect_rolls_back_the_open_transaction() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);

        reply(session.handle(msg("begin")));
        reply(session.handle(exec_msg("CREATE TABLE t (x INTEGER)", vec![])));
        reply(session.handle(exec_msg("INSERT INTO t (x) VALUES (1)", vec![])));
        session.close();
        assert_eq!(session.tx_id, 0);

        reply(session.handle(msg("begin")));
        let frame = reply(session.handle(exec_msg(
            "SELECT name FROM sqlite_master WHERE name = 't'",
            vec![],
        )));
        assert_eq!(frame["data"]["rows"], json!([]));
        reply(session.handle(msg("commit")));
    }

    #[tokio::test]
    async fn change_version_over_the_wire() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);

        reply(session.handle(msg("begin")));
        let frame = reply(session.handle(TransactionMsg {
            cmd: "changeVersion".to_string(),
            old_version: "".to_string(),
            new_version: "2".to_string(),
            ..TransactionMsg::default()
        }));
        assert_eq!(frame, json!({"data": {}}));
        reply(session.handle(msg("commit")));

        reply(session.handle(msg("begin")));
        let frame = reply(session.handle(TransactionMsg {
            cmd: "changeVersion".to_string(),
            old_version: "1".to_string(),
            new_version: "3".to_string(),
            ..TransactionMsg::default()
        }));
        assert_eq!(frame["sqlerror"]["code"], 2);
        reply(session.handle(msg("abort")));
    }

    #[tokio::test]
    async fn unknown_commands_are_silently_dropped() {
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&dir);
        match session.handle(msg("vacuum")) {
            Step::Silent => {}
            other => panic!("expected silence, got {other:?}"),
        }
    }
}
