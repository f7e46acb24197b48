//! The process-wide registry: database handles, live transactions, and the
//! shared identifier allocator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use rusqlite::Connection;
use tracing::{debug, info, warn};
use websql_types::{SqlError, WebKitException};

use crate::BridgeError;
use crate::metadata;

/// Invoked with the database connection right before every transaction
/// `BEGIN`; hosts use it to apply per-transaction limits such as
/// `PRAGMA max_page_count`.
pub type BeginHook = Box<dyn Fn(&Connection) -> rusqlite::Result<()> + Send + Sync>;

pub struct BridgeConfig {
    /// Directory holding the backing `*.db` files. Created on startup.
    pub db_dir: PathBuf,
    /// How long an idle transaction survives before it is rolled back.
    pub idle_timeout: Duration,
    pub begin_hook: Option<BeginHook>,
}

impl BridgeConfig {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
            idle_timeout: Duration::from_secs(5 * 60),
            begin_hook: None,
        }
    }
}

pub(crate) struct DatabaseEntry {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

pub(crate) struct TransactionEntry {
    /// Resolved per operation; a transaction never keeps its database
    /// alive past `close`.
    pub(crate) conn: Weak<Mutex<Connection>>,
    /// Set by the authorizer when the current statement performs an INSERT.
    pub(crate) saw_insert: Arc<AtomicBool>,
}

#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) databases: HashMap<u32, DatabaseEntry>,
    pub(crate) transactions: HashMap<u32, TransactionEntry>,
}

struct BridgeInner {
    state: Mutex<Registries>,
    /// Shared by databases and transactions; an id is only meaningful
    /// within the registry it was issued for. Never returns 0, which is
    /// the "no transaction" sentinel on the WebSocket side.
    next_id: AtomicU32,
    db_dir: PathBuf,
    idle_timeout: Duration,
    begin_hook: Option<BeginHook>,
}

/// Handle to the registry; cheap to clone, shared across all HTTP and
/// WebSocket sessions.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        if let Err(error) = std::fs::create_dir_all(&config.db_dir) {
            warn!(db_dir = %config.db_dir.display(), %error, "cannot create database directory");
        }
        Self {
            inner: Arc::new(BridgeInner {
                state: Mutex::new(Registries::default()),
                next_id: AtomicU32::new(0),
                db_dir: config.db_dir,
                idle_timeout: config.idle_timeout,
                begin_hook: config.begin_hook,
            }),
        }
    }

    /// Opens (and creates if necessary) the database for `name`.
    /// Returns the issued id and whether the database was created fresh.
    ///
    /// A pre-existing database is rejected with `InvalidStateError` when a
    /// non-empty `version` does not match the stored version. A fresh
    /// database starts with version `""` when the caller has a creation
    /// callback (the callback is expected to set the version itself via
    /// changeVersion), otherwise with `version`.
    pub fn open(
        &self,
        name: &str,
        version: &str,
        has_creation_callback: bool,
    ) -> Result<(u32, bool), BridgeError> {
        debug!(name, version, has_creation_callback, "open database");

        let path = self.inner.db_dir.join(backing_file_name(name));
        let conn = Connection::open(&path)?;

        let exists = metadata::info_table_exists(&conn)?;
        debug!(exists, path = %path.display(), "database probed");

        if exists {
            if !version.is_empty() {
                let current = metadata::read_version(&conn)?;
                if current != version {
                    debug!(%current, requested = version, "version mismatch on open");
                    return Err(BridgeError::Exception(WebKitException::invalid_state(
                        format!(
                            "Failed to execute 'openDatabase' on 'Window': unable to open \
                             database, version mismatch, '{version}' does not match the \
                             currentVersion of '{current}'"
                        ),
                    )));
                }
            }
        } else {
            if let Err(error) = conn.execute_batch("PRAGMA auto_vacuum = full") {
                warn!(%error, "cannot set auto_vacuum=full");
            }
            metadata::create_info_table(&conn)?;
            let initial = if has_creation_callback { "" } else { version };
            metadata::write_version(&conn, initial)?;
        }

        let db_id = self.allocate_id();
        self.inner.state.lock().databases.insert(
            db_id,
            DatabaseEntry {
                conn: Arc::new(Mutex::new(conn)),
            },
        );
        Ok((db_id, !exists))
    }

    /// Closing twice (or closing an id that never existed) is an error the
    /// client can observe, matching the Web SQL shim's expectations.
    pub fn close(&self, db_id: u32) -> Result<(), BridgeError> {
        let removed = self.inner.state.lock().databases.remove(&db_id);
        debug!(db_id, found = removed.is_some(), "close database");
        match removed {
            Some(_) => Ok(()),
            None => Err(BridgeError::Sql(SqlError::database(
                "db missing (already closed?)",
            ))),
        }
    }

    /// Emergency teardown: rolls back every live transaction and drops
    /// every database handle. Used when the browser side crashes.
    pub fn close_all(&self) {
        info!("closing all connections");
        let mut state = self.inner.state.lock();
        close_all_locked(&mut state);
    }

    /// `close_all` plus removal of every `*.db` file in the directory.
    pub fn delete_all_databases(&self) {
        let mut state = self.inner.state.lock();
        close_all_locked(&mut state);

        let Ok(entries) = std::fs::read_dir(&self.inner.db_dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "db") {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed database file"),
                Err(error) => warn!(path = %path.display(), %error, "cannot remove database file"),
            }
        }
    }

    pub fn database_version(&self, db_id: u32) -> Result<String, BridgeError> {
        let conn = self.lookup_db(db_id)?;
        let conn = conn.lock();
        Ok(metadata::read_version(&conn)?)
    }

    pub(crate) fn allocate_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn state(&self) -> &Mutex<Registries> {
        &self.inner.state
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    pub(crate) fn begin_hook(&self) -> Option<&BeginHook> {
        self.inner.begin_hook.as_ref()
    }

    pub(crate) fn lookup_db(&self, db_id: u32) -> Result<Arc<Mutex<Connection>>, BridgeError> {
        self.inner
            .state
            .lock()
            .databases
            .get(&db_id)
            .map(|entry| Arc::clone(&entry.conn))
            .ok_or_else(|| BridgeError::Sql(SqlError::unknown("internal error(db not found)")))
    }
}

pub(crate) fn close_all_locked(state: &mut Registries) {
    for (tx_id, entry) in state.transactions.drain() {
        let Some(conn) = entry.conn.upgrade() else {
            continue;
        };
        if let Err(error) = conn.lock().execute_batch("ROLLBACK") {
            debug!(tx_id, %error, "rollback during close_all failed");
        }
    }
    state.databases.clear();
}

/// The percent-encoded prefix keeps filenames readable; the hex suffix is
/// what actually makes the mapping injective.
fn backing_file_name(name: &str) -> String {
    let escaped = utf8_percent_encode(name, NON_ALPHANUMERIC);
    format!("{escaped}_{}.db", hex::encode(name.as_bytes()))
}
