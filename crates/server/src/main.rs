//! The EntityDB server binary
//!
//! Wires everything together: config from environment, store open with
//! recovery, admin bootstrap, background workers, the axum router, and
//! graceful shutdown that flushes the WAL and stamps `last_clean`.

mod config;
mod dto;
mod error;
mod routes;
mod state;

use crate::config::ServerConfig;
use crate::state::AppState;
use entitydb_auth::{admin_password_from_env, bootstrap_admin, SessionStore, SWEEP_INTERVAL};
use entitydb_engine::{EngineConfig, IntervalWorker, Store};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(target: "entitydb::server", error = %e, "fatal");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = ServerConfig::from_env()?;
    let engine_config = EngineConfig::load("./data")?;
    info!(
        target: "entitydb::server",
        data_path = %engine_config.data_path.display(),
        port = server_config.port,
        "starting"
    );
    if server_config.tls_cert.is_some() || server_config.tls_key.is_some() {
        // Termination happens in front of the process; the paths are
        // recognized so deployments can pass them uniformly
        warn!(
            target: "entitydb::server",
            "TLS_CERT/TLS_KEY are handled by the fronting proxy, serving plain TCP"
        );
    }

    let store = Store::open(engine_config)?;
    let report = store.recovery_report();
    info!(
        target: "entitydb::server",
        was_clean = report.was_clean,
        replayed = report.replayed_frames,
        applied = report.applied_frames,
        quarantined = report.quarantined_spans,
        entities = report.entities,
        "recovery complete"
    );

    let sessions = Arc::new(SessionStore::new(store.clone()));
    bootstrap_admin(&sessions, &admin_password_from_env())?;

    let workers = store.start_background();
    let sweeper_sessions = sessions.clone();
    let sweeper = IntervalWorker::spawn("session-sweep", SWEEP_INTERVAL, move || {
        if let Err(e) = sweeper_sessions.sweep() {
            error!(target: "entitydb::auth", error = %e, "session sweep failed");
        }
    });

    let state = AppState::new(store.clone(), sessions);
    let app = routes::router(state);

    let addr = server_config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(target: "entitydb::server", %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(target: "entitydb::server", "shutting down");
    sweeper.stop();
    workers.stop();
    store.shutdown()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(target: "entitydb::server", error = %e, "failed to install signal handler");
    }
}
