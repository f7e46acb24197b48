//! The reserved per-database version table.
//!
//! Every bridge-managed database carries `__pro_database_info` with exactly
//! one row (`id = 0`) holding the Web SQL version string. A database
//! without the table has never been opened by the bridge. The helpers take
//! a plain connection; inside a transaction the same connection carries the
//! transaction state, so they serve both cases.

use rusqlite::{Connection, OptionalExtension, params};

pub(crate) const DATABASE_INFO_TABLE: &str = "__pro_database_info";

pub(crate) fn info_table_exists(conn: &Connection) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = ?1 AND name = ?2",
            params!["table", DATABASE_INFO_TABLE],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn create_info_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE {DATABASE_INFO_TABLE} (
            id INTEGER PRIMARY KEY,
            version TEXT default \"\"
        )"
    ))
}

/// The stored version, or the empty string when the row is absent.
/// A non-text value in the column is an error.
pub(crate) fn read_version(conn: &Connection) -> rusqlite::Result<String> {
    let version: Option<String> = conn
        .query_row(
            &format!("SELECT version FROM {DATABASE_INFO_TABLE} WHERE id = 0"),
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(version.unwrap_or_default())
}

pub(crate) fn write_version(conn: &Connection, version: &str) -> rusqlite::Result<()> {
    conn.execute(
        &format!("REPLACE INTO {DATABASE_INFO_TABLE} ( id, version ) VALUES ( 0, ?1 )"),
        params![version],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_only_after_create() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!info_table_exists(&conn).unwrap());
        create_info_table(&conn).unwrap();
        assert!(info_table_exists(&conn).unwrap());
    }

    #[test]
    fn version_defaults_to_empty() {
        let conn = Connection::open_in_memory().unwrap();
        create_info_table(&conn).unwrap();
        assert_eq!(read_version(&conn).unwrap(), "");
    }

    #[test]
    fn write_then_read_round_trips() {
        let conn = Connection::open_in_memory().unwrap();
        create_info_table(&conn).unwrap();
        write_version(&conn, "1.0").unwrap();
        assert_eq!(read_version(&conn).unwrap(), "1.0");
        write_version(&conn, "2.0").unwrap();
        assert_eq!(read_version(&conn).unwrap(), "2.0");
    }

    #[test]
    fn non_text_version_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        create_info_table(&conn).unwrap();
        conn.execute(
            &format!("REPLACE INTO {DATABASE_INFO_TABLE} ( id, version ) VALUES ( 0, 42 )"),
            [],
        )
        .unwrap();
        assert!(read_version(&conn).is_err());
    }
}
