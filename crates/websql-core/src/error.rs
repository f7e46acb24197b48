use thiserror::Error;
use websql_types::{Failure, SqlError, UnknownError, WebKitException};

/// Everything the core can fail with. The two typed families carry their
/// wire shape already; `Engine` holds a raw `rusqlite` error that only
/// gets classified when a failure frame is built.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{0}")]
    Sql(SqlError),
    #[error("{0}")]
    Exception(WebKitException),
    #[error(transparent)]
    Engine(#[from] rusqlite::Error),
}

impl BridgeError {
    /// Wire classification. A raw engine "database or disk is full" becomes
    /// the QUOTA sql error; any other raw engine error is reported as an
    /// unknown error with the engine's message.
    pub fn failure(&self) -> Failure {
        match self {
            BridgeError::Sql(error) => Failure::Sql(error.clone()),
            BridgeError::Exception(exception) => Failure::Exception(exception.clone()),
            BridgeError::Engine(error) => match error {
                rusqlite::Error::SqliteFailure(cause, _)
                    if cause.code == rusqlite::ErrorCode::DiskFull =>
                {
                    Failure::Sql(SqlError::quota(error.to_string()))
                }
                _ => Failure::Other(UnknownError::new(error.to_string())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_database_maps_to_quota() {
        let engine = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            Some("database or disk is full".to_string()),
        );
        match BridgeError::Engine(engine).failure() {
            Failure::Sql(error) => assert_eq!(error.code, SqlError::QUOTA),
            other => panic!("expected sql error, got {other:?}"),
        }
    }

    #[test]
    fn other_engine_errors_stay_unknown() {
        let engine = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        match BridgeError::Engine(engine).failure() {
            Failure::Other(error) => {
                assert_eq!(error.name, "UnknownError");
                assert!(error.message.contains("locked"));
            }
            other => panic!("expected unknown error, got {other:?}"),
        }
    }

    #[test]
    fn typed_errors_pass_through() {
        let failure = BridgeError::Sql(SqlError::database("tx missing (aborted?)")).failure();
        assert_eq!(
            failure,
            Failure::Sql(SqlError::database("tx missing (aborted?)"))
        );
    }
}
