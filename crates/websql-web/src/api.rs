//! The JSON POST endpoints. Every reply is HTTP 200 carrying either
//! `{"data": …}` or one of the failure frames; the browser shim inspects
//! the body, not the status code.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, warn};
use websql_types::{
    CloseAllResp, CloseReq, CloseResp, DbVersionReq, DbVersionResp, Failure, OpenReq, OpenResp,
    SqlError, ok_frame,
};

use crate::app::AppState;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Json<Value>> {
    serde_json::from_slice(body).map_err(|err| {
        warn!(%err, "unmarshal error");
        Json(Failure::Sql(SqlError::invalid_argument()).frame())
    })
}

fn join_failure(error: tokio::task::JoinError) -> Value {
    error!(%error, "bridge worker join error");
    Failure::other(format!("join error: {error}")).frame()
}

pub async fn open(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let req: OpenReq = match parse_body(&body) {
        Ok(req) => req,
        Err(reply) => return reply,
    };
    debug!(
        name = %req.name,
        version = %req.version,
        display_name = %req.display_name,
        "open requested"
    );

    let bridge = state.bridge.clone();
    let result = tokio::task::spawn_blocking(move || {
        bridge.open(&req.name, &req.version, req.has_creation_callback)
    })
    .await;

    Json(match result {
        Ok(Ok((db_id, created))) => ok_frame(&OpenResp { db_id, created }),
        Ok(Err(error)) => error.failure().frame(),
        Err(error) => join_failure(error),
    })
}

pub async fn close(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let req: CloseReq = match parse_body(&body) {
        Ok(req) => req,
        Err(reply) => return reply,
    };

    let bridge = state.bridge.clone();
    let result = tokio::task::spawn_blocking(move || bridge.close(req.db_id)).await;

    Json(match result {
        Ok(Ok(())) => ok_frame(&CloseResp {}),
        Ok(Err(error)) => error.failure().frame(),
        Err(error) => join_failure(error),
    })
}

pub async fn close_all(State(state): State<AppState>) -> Json<Value> {
    let bridge = state.bridge.clone();
    let result = tokio::task::spawn_blocking(move || bridge.close_all()).await;

    Json(match result {
        Ok(()) => ok_frame(&CloseAllResp {}),
        Err(error) => join_failure(error),
    })
}

pub async fn db_version(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let req: DbVersionReq = match parse_body(&body) {
        Ok(req) => req,
        Err(reply) => return reply,
    };

    let bridge = state.bridge.clone();
    let result = tokio::task::spawn_blocking(move || bridge.database_version(req.db_id)).await;

    Json(match result {
        Ok(Ok(version)) => ok_frame(&DbVersionResp { version }),
        Ok(Err(error)) => error.failure().frame(),
        Err(error) => join_failure(error),
    })
}

/// Host escape hatch: close everything and wipe the database directory.
/// Reachable with any method; the browser shim fetches it with a plain GET.
pub async fn remove_all(State(state): State<AppState>) -> StatusCode {
    let bridge = state.bridge.clone();
    if let Err(error) = tokio::task::spawn_blocking(move || bridge.delete_all_databases()).await {
        error!(%error, "delete_all worker join error");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}
