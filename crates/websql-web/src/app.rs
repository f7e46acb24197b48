use axum::Router;
use axum::routing::{any, get, post};
use websql_core::Bridge;

use crate::{api, ws};

#[derive(Clone)]
pub struct AppState {
    pub bridge: Bridge,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/pjf/api/websql/open", post(api::open))
        .route("/pjf/api/websql/transaction", get(ws::transaction))
        .route("/pjf/api/websql/close", post(api::close))
        .route("/pjf/api/websql/closeAll", post(api::close_all))
        .route("/pjf/api/websql/dbversion", post(api::db_version))
        .route("/pjf/api/removeAllWebSQLDB", any(api::remove_all))
        .with_state(state)
}
