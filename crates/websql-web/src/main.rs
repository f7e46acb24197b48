//! HTTP/WebSocket front of the Web SQL bridge.
//!
//! `POST /pjf/api/websql/{open,close,closeAll,dbversion}` are plain JSON
//! RPCs; `GET /pjf/api/websql/transaction?dbId=N` upgrades to the
//! per-transaction WebSocket conversation.

mod api;
mod app;
mod ws;

use tokio::net::TcpListener;
use tracing::{info, warn};
use websql_core::{Bridge, BridgeConfig};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let http_addr = std::env::var("WEBSQL_HTTP").unwrap_or_else(|_| "127.0.0.1:8889".into());
    let db_dir = std::env::var("WEBSQL_DB_DIR").unwrap_or_else(|_| "db".into());

    let mut config = BridgeConfig::new(&db_dir);
    if let Ok(raw) = std::env::var("WEBSQL_MAX_PAGE_COUNT") {
        match raw.parse::<u64>() {
            Ok(pages) => {
                info!(pages, "applying max_page_count before every transaction");
                config.begin_hook = Some(Box::new(move |conn| {
                    conn.execute_batch(&format!("PRAGMA max_page_count = {pages}"))
                }));
            }
            Err(error) => warn!(%raw, %error, "ignoring invalid WEBSQL_MAX_PAGE_COUNT"),
        }
    }

    let state = app::AppState {
        bridge: Bridge::new(config),
    };

    let listener = TcpListener::bind(&http_addr)
        .await
        .map_err(|error| format!("failed to bind HTTP on {http_addr}: {error}"))?;
    info!(%http_addr, %db_dir, "websql bridge ready");

    axum::serve(listener, app::build_router(state))
        .await
        .map_err(|error| format!("HTTP server error: {error}"))
}
