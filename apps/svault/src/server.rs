// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::Response,
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use streamvault_core::{BufferPool, StreamRegistry};

use crate::config::Config;
use crate::state::AppState;
use crate::websocket;

async fn health_handler() -> &'static str {
    "ok"
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_websocket(socket, app_state))
}

/// Build the router and the shared state behind it.
///
/// This is the single construction site for the registry and the buffer
/// pool; sessions borrow handles from [`AppState`].
///
/// # Errors
///
/// Returns an error if the cache directory cannot be created.
pub fn create_app(config: Config) -> anyhow::Result<(Router, Arc<AppState>)> {
    let registry = Arc::new(StreamRegistry::new(&config.cache.directory)?);
    let pool = Arc::new(BufferPool::new(config.cache.buffer_size, config.cache.pool_capacity));
    let app_state = Arc::new(AppState { registry, pool, config: Arc::new(config) });

    let router = Router::new()
        .route("/healthz", get(health_handler))
        .route(&app_state.config.server.ws_path, get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&app_state));

    Ok((router, app_state))
}

/// Periodically reclaim streams that have been idle past the configured TTL.
fn spawn_gc_task(app_state: &Arc<AppState>) {
    let registry = Arc::clone(&app_state.registry);
    let max_age = Duration::from_secs(app_state.config.cache.stream_ttl_hours * 3600);
    let period = Duration::from_secs(app_state.config.cache.gc_interval_secs.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the initial sweep
        // happens one full period after startup.
        interval.tick().await;
        loop {
            interval.tick().await;
            let registry = Arc::clone(&registry);
            let removed =
                tokio::task::spawn_blocking(move || registry.cleanup_old_streams(max_age))
                    .await
                    .unwrap_or(0);
            if removed > 0 {
                info!(removed, "GC sweep reclaimed idle streams");
            }
        }
    });
}

/// Starts the WebSocket cache server and blocks until shutdown.
///
/// # Errors
///
/// Returns an error if:
/// - The listen address cannot be parsed
/// - The listener fails to bind
/// - The server encounters a runtime error
///
/// # Panics
///
/// Panics if the Ctrl+C or SIGTERM signal handler cannot be installed
/// (critical OS failure).
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let (app, app_state) = create_app(config.clone())?;

    let addr: SocketAddr = format!("{}:{}", config.server.address, config.server.port).parse()?;

    spawn_gc_task(&app_state);

    // These expect() calls are justified and documented in the function's # Panics section
    #[allow(clippy::expect_used)]
    let shutdown_signal = async {
        let ctrl_c = async {
            tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {
                info!("Received CTRL-C signal, initiating graceful shutdown");
            },
            () = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown");
            },
        }
    };

    info!(address = %addr, ws_path = %config.server.ws_path, "Starting WebSocket cache server");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind listener");
        e
    })?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server stopped; removing cached streams");
    let registry = Arc::clone(&app_state.registry);
    tokio::task::spawn_blocking(move || registry.shutdown()).await?;

    Ok(())
}
