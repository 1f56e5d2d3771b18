use std::net::SocketAddr;

use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use parley_core::AppState;
use serde_json::{json, Value};
use tokio::time::{Duration, MissedTickBehavior};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

mod cli;
mod config;

const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,tower_http=debug")),
        )
        .init();

    let args = cli::Args::parse();
    let mut config = config::Config::load(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }

    ensure_database_dir(&config.database.url);
    let db = parley_db::create_pool(&config.database.url, config.database.max_connections).await?;
    parley_db::run_migrations(&db).await?;

    let state = AppState::new(db, config.app_config());
    spawn_prune_task(state.clone());

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    tracing::info!(
        bind_address = %config.server.bind_address,
        database = %config.database.url,
        "parley gateway listening"
    );

    let shutdown = state.shutdown.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutting down (ctrl-c)...");
        // Open sockets close themselves with 1001 once notified.
        shutdown.notify_waiters();
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(parley_ws::gateway_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let presence = state.gateway.presence();
    Json(json!({
        "status": "ok",
        "online_users": presence.online_count(),
        "connections": presence.connection_count(),
    }))
}

/// Periodically drops idle rate-limiter keys.
fn spawn_prune_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await; // skip immediate first tick
        loop {
            interval.tick().await;
            state.gateway.prune();
        }
    });
}

/// Creates the parent directory of a file-backed SQLite database.
fn ensure_database_dir(url: &str) {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return;
    };
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return;
    }
    if let Some(parent) = std::path::Path::new(path).parent() {
        if parent.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Could not create directory '{}': {}", parent.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use parley_core::AppConfig;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_counts() {
        let db = parley_db::create_pool("sqlite::memory:", 1)
            .await
            .expect("pool");
        parley_db::run_migrations(&db).await.expect("migrations");
        let app = build_router(AppState::new(db, AppConfig::default()));

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value: Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(
            value,
            json!({ "status": "ok", "online_users": 0, "connections": 0 })
        );
    }

    #[test]
    fn database_dir_is_created_for_file_urls() {
        let temp = tempfile::tempdir().expect("tempdir");
        let db_path = temp.path().join("data").join("parley.db");
        ensure_database_dir(&format!("sqlite://{}?mode=rwc", db_path.display()));
        assert!(db_path.parent().expect("parent").is_dir());

        ensure_database_dir("sqlite::memory:");
    }
}
