use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The `SQLError` of the Web SQL Database API: a numeric code plus a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlError {
    pub code: u8,
    pub message: String,
}

impl SqlError {
    pub const UNKNOWN: u8 = 0;
    pub const DATABASE: u8 = 1;
    pub const VERSION: u8 = 2;
    pub const TOO_LARGE: u8 = 3;
    pub const QUOTA: u8 = 4;
    pub const SYNTAX: u8 = 5;
    pub const CONSTRAINT: u8 = 6;
    pub const TIMEOUT: u8 = 7;

    pub fn new(code: u8, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(Self::UNKNOWN, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(Self::DATABASE, message)
    }

    pub fn version(message: impl Into<String>) -> Self {
        Self::new(Self::VERSION, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(Self::QUOTA, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(Self::SYNTAX, message)
    }

    /// The reply for a request body or frame that did not parse.
    pub fn invalid_argument() -> Self {
        Self::unknown("internal error(invalid argument)")
    }
}

impl fmt::Display for SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sql error code={} message={}", self.code, self.message)
    }
}

/// A DOM exception as WebKit reports it. The bridge only ever raises
/// `InvalidStateError` (openDatabase with a mismatching version), but the
/// shape carries any DOM exception code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebKitException {
    pub code: u8,
    pub name: String,
    pub message: String,
}

impl WebKitException {
    pub const INVALID_STATE: u8 = 11;

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self {
            code: Self::INVALID_STATE,
            name: "InvalidStateError".to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for WebKitException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} code={} message={}", self.name, self.code, self.message)
    }
}

/// Fallback error shape for anything outside the two typed families.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownError {
    pub name: String,
    pub message: String,
}

impl UnknownError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "UnknownError".to_string(),
            message: message.into(),
        }
    }
}

/// One failure frame, serialized externally tagged so the client sees
/// exactly one of `{"sqlerror": …}`, `{"exception": …}`, `{"error": …}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Failure {
    #[serde(rename = "sqlerror")]
    Sql(SqlError),
    #[serde(rename = "exception")]
    Exception(WebKitException),
    #[serde(rename = "error")]
    Other(UnknownError),
}

impl Failure {
    pub fn other(message: impl Into<String>) -> Self {
        Failure::Other(UnknownError::new(message))
    }

    /// The JSON value written to the wire for this failure.
    pub fn frame(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            json!({ "error": { "name": "UnknownError", "message": "json encode error" } })
        })
    }
}
