//! Transaction lifecycle: begin / exec / changeVersion / commit / abort,
//! plus the idle timer that reaps transactions the client forgot about.
//!
//! SQLite only exposes `last_insert_rowid` and `total_changes` as
//! connection-global state, while Web SQL wants them per statement. Two
//! tricks recover the per-statement view: the authorizer flags whether the
//! statement performed any INSERT (compound statements and triggers
//! included), and the affected-row count is the delta of `total_changes`
//! taken around the statement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::Connection;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};
use websql_types::{Row, SqlError};

use crate::registry::{Bridge, TransactionEntry};
use crate::{BridgeError, metadata, rows};

/// What one `executeSql` reports back.
#[derive(Debug)]
pub struct ExecOutcome {
    /// Present only when the statement performed an INSERT.
    pub insert_id: Option<i64>,
    pub rows_affected: i64,
    pub rows: Vec<Row>,
}

impl Bridge {
    /// Starts a transaction on `db_id` and returns its id. The begin hook
    /// runs first (its failure is logged, not fatal), then the engine
    /// `BEGIN`, then the authorizer is installed for INSERT detection.
    pub fn begin_transaction(&self, db_id: u32) -> Result<u32, BridgeError> {
        let conn_arc = self.lookup_db(db_id)?;
        let saw_insert = Arc::new(AtomicBool::new(false));

        {
            let conn = conn_arc.lock();
            if let Some(hook) = self.begin_hook() {
                if let Err(error) = hook(&conn) {
                    error!(db_id, %error, "begin hook failed");
                }
            }

            conn.execute_batch("BEGIN").map_err(|error| {
                debug!(db_id, %error, "begin failed");
                BridgeError::Sql(SqlError::unknown(error.to_string()))
            })?;

            let flag = Arc::clone(&saw_insert);
            conn.authorizer(Some(move |context: AuthContext<'_>| {
                if matches!(context.action, AuthAction::Insert { .. }) {
                    flag.store(true, Ordering::SeqCst);
                }
                Authorization::Allow
            }));
        }

        let tx_id = self.allocate_id();
        self.state().lock().transactions.insert(
            tx_id,
            TransactionEntry {
                conn: Arc::downgrade(&conn_arc),
                saw_insert,
            },
        );
        self.arm_idle_timer(tx_id);
        debug!(db_id, tx_id, "transaction started");
        Ok(tx_id)
    }

    /// Runs one statement inside the transaction. Everything goes through
    /// the query path so SELECT results are available; statements that
    /// produce no rows simply yield an empty row set.
    pub fn exec(
        &self,
        tx_id: u32,
        statement: &str,
        args: &[JsonValue],
    ) -> Result<ExecOutcome, BridgeError> {
        let (conn_arc, saw_insert) = self.lookup_tx(tx_id)?;
        saw_insert.store(false, Ordering::SeqCst);

        let conn = conn_arc.lock();
        let changes_before = total_changes(&conn)?;

        let params = rows::args_to_sql(args).map_err(BridgeError::Sql)?;
        let mut stmt = conn
            .prepare(statement)
            .map_err(|error| BridgeError::Sql(SqlError::syntax(error.to_string())))?;
        if stmt.parameter_count() != params.len() {
            return Err(BridgeError::Sql(SqlError::syntax(format!(
                "statement expects {} parameters, got {}",
                stmt.parameter_count(),
                params.len()
            ))));
        }
        for (index, value) in params.iter().enumerate() {
            stmt.raw_bind_parameter(index + 1, value)
                .map_err(|error| BridgeError::Sql(SqlError::syntax(error.to_string())))?;
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut data = Vec::new();
        let mut raw = stmt.raw_query();
        loop {
            match raw.next() {
                Ok(Some(row)) => data.push(rows::read_row(row, &columns)?),
                Ok(None) => break,
                Err(error) => {
                    debug!(tx_id, %error, "statement failed");
                    return Err(BridgeError::Sql(SqlError::syntax(error.to_string())));
                }
            }
        }
        drop(raw);
        drop(stmt);

        let changes_after = total_changes(&conn)?;
        let insert_id = saw_insert
            .load(Ordering::SeqCst)
            .then(|| conn.last_insert_rowid());
        debug!(tx_id, changes_before, changes_after, "statement executed");

        Ok(ExecOutcome {
            insert_id,
            rows_affected: changes_after - changes_before,
            rows: data,
        })
    }

    /// Version bump inside the transaction; fails with the VERSION error
    /// when the stored version does not match `old_version`.
    pub fn change_version(
        &self,
        tx_id: u32,
        old_version: &str,
        new_version: &str,
    ) -> Result<(), BridgeError> {
        let (conn_arc, _) = self.lookup_tx(tx_id)?;
        let conn = conn_arc.lock();

        let current = metadata::read_version(&conn).map_err(|error| {
            debug!(tx_id, %error, "cannot read version inside transaction");
            BridgeError::Sql(SqlError::unknown("tx missing (aborted?)"))
        })?;
        if current != old_version {
            return Err(BridgeError::Sql(SqlError::version(
                "current version of the database and `oldVersion` argument do not match",
            )));
        }
        metadata::write_version(&conn, new_version).map_err(|error| {
            debug!(tx_id, %error, "cannot write version inside transaction");
            BridgeError::Sql(SqlError::unknown("tx missing (aborted?)"))
        })
    }

    /// The entry is removed before `COMMIT` runs, so a concurrently firing
    /// idle timer finds nothing and cannot roll back mid-commit.
    pub fn commit(&self, tx_id: u32) -> Result<(), BridgeError> {
        let entry = self.take_tx(tx_id)?;
        let Some(conn) = entry.conn.upgrade() else {
            return Err(BridgeError::Sql(SqlError::database("database is closed")));
        };
        let conn = conn.lock();
        if let Err(error) = conn.execute_batch("COMMIT") {
            debug!(tx_id, %error, "commit failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK");
            return Err(BridgeError::Sql(SqlError::database(error.to_string())));
        }
        debug!(tx_id, "transaction committed");
        Ok(())
    }

    pub fn abort(&self, tx_id: u32) -> Result<(), BridgeError> {
        let entry = self.take_tx(tx_id)?;
        let Some(conn) = entry.conn.upgrade() else {
            return Err(BridgeError::Sql(SqlError::database("database is closed")));
        };
        let result = conn.lock().execute_batch("ROLLBACK").map_err(|error| {
            debug!(tx_id, %error, "rollback failed");
            BridgeError::Sql(SqlError::database(error.to_string()))
        });
        debug!(tx_id, "transaction aborted");
        result
    }

    /// Idle-timer entry point: removes the transaction if it is still
    /// registered and rolls it back. Returns whether anything was reaped;
    /// a transaction already completed by commit/abort is left alone.
    pub fn expire_transaction(&self, tx_id: u32) -> bool {
        let Some(entry) = self.state().lock().transactions.remove(&tx_id) else {
            return false;
        };
        if let Some(conn) = entry.conn.upgrade() {
            if let Err(error) = conn.lock().execute_batch("ROLLBACK") {
                debug!(tx_id, %error, "rollback on idle expiry failed");
            }
        }
        true
    }

    fn arm_idle_timer(&self, tx_id: u32) {
        let bridge = self.clone();
        let timeout = self.idle_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = tokio::task::spawn_blocking(move || bridge.expire_transaction(tx_id))
                .await
                .unwrap_or(false);
            if expired {
                warn!(tx_id, "transaction idle for too long, rolled back");
            }
        });
    }

    fn lookup_tx(
        &self,
        tx_id: u32,
    ) -> Result<(Arc<Mutex<Connection>>, Arc<AtomicBool>), BridgeError> {
        let state = self.state().lock();
        let entry = state
            .transactions
            .get(&tx_id)
            .ok_or_else(|| BridgeError::Sql(SqlError::unknown("tx missing (aborted?)")))?;
        let conn = entry
            .conn
            .upgrade()
            .ok_or_else(|| BridgeError::Sql(SqlError::unknown("tx missing (aborted?)")))?;
        Ok((conn, Arc::clone(&entry.saw_insert)))
    }

    fn take_tx(&self, tx_id: u32) -> Result<TransactionEntry, BridgeError> {
        self.state()
            .lock()
            .transactions
            .remove(&tx_id)
            .ok_or_else(|| BridgeError::Sql(SqlError::database("tx missing (aborted?)")))
    }
}

fn total_changes(conn: &Connection) -> Result<i64, BridgeError> {
    Ok(conn.query_row("SELECT total_changes()", [], |row| row.get(0))?)
}
