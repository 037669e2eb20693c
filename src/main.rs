use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Router, middleware};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod error;
mod ratelimit;
mod state;

use config::Config;
use ratelimit::tracker::AttemptTracker;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let state = Arc::new(AppState::new(config.gate));
    let limiter = state.tracker.config();
    tracing::info!(
        tokens = state.tokens.len(),
        max_tracked_clients = state.gate.max_tracked_clients,
        block_threshold = limiter.block_threshold,
        reset_window_secs = limiter.reset_window.as_secs(),
        "Token gate configured"
    );

    spawn_cleanup(state.tracker.clone());

    let protected = Router::new()
        .fallback_service(ServeDir::new(&config.root_dir))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::gate::require_token,
        ));

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .merge(protected)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(
        "tokengate listening on {}, serving {:?}",
        config.bind_addr,
        config.root_dir
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically drops attempt records that have aged out of the reset window.
fn spawn_cleanup(tracker: Arc<AttemptTracker>) {
    let period = tracker.config().reset_window.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let removed = tracker.cleanup_expired();
            if removed > 0 {
                tracing::debug!(
                    removed,
                    remaining = tracker.len(),
                    "Dropped expired attempt records"
                );
            }
        }
    });
}
