use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Failure;

/// One result record: column name to cell value, in the cursor's declared
/// column order (`serde_json` runs with `preserve_order`).
pub type Row = serde_json::Map<String, Value>;

/// Body of `POST open`. `display_name` and `estimated_size` are accepted
/// for compatibility with the browser shim and otherwise ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenReq {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub estimated_size: Option<Value>,
    #[serde(default)]
    pub has_creation_callback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResp {
    pub db_id: u32,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseReq {
    #[serde(default)]
    pub db_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseResp {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseAllResp {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbVersionReq {
    #[serde(default)]
    pub db_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbVersionResp {
    pub version: String,
}

/// One inbound frame of the per-transaction WebSocket conversation.
/// Fields beyond `cmd` are only meaningful for the commands that use them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMsg {
    #[serde(default)]
    pub cmd: String,
    #[serde(default)]
    pub statement: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub old_version: String,
    #[serde(default)]
    pub new_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeginResp {}

/// `insert_id` is present only when the statement actually performed an
/// INSERT; the client distinguishes "no insert" by the field's absence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResp {
    pub rows: Vec<Row>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<i64>,
    pub rows_affected: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResp {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResp {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeVersionResp {}

/// Success envelope: `{"data": <payload>}`.
pub fn ok_frame<T: Serialize>(payload: &T) -> Value {
    match serde_json::to_value(payload) {
        Ok(value) => json!({ "data": value }),
        Err(error) => Failure::other(format!("json encode error: {error}")).frame(),
    }
}
