mod browser_pool;
mod cnfg;
mod error;
mod render;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use browser_pool::BrowserPool;
use cnfg::AppConfig;
use render::generate_pdf;

#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<BrowserPool>,
    pub config: Arc<AppConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = cnfg::get();
    tracing_subscriber::fmt::init();

    let pool = Arc::new(BrowserPool::launch(config.lifecycle).await);
    tracing::info!(
        lifecycle = ?config.lifecycle,
        ready = pool.is_ready().await,
        "browser pool initialized"
    );

    let state = AppState {
        pool: Arc::clone(&pool),
        config: Arc::clone(&config),
    };

    let app = app(state)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The browser outlives the accept loop so in-flight renders finish first.
    pool.shutdown().await;

    Ok(())
}

fn app(state: AppState) -> Result<Router> {
    // A single trusted origin with credentials; requests without an Origin
    // header (curl, server-to-server) pass through untouched.
    let origin = state
        .config
        .allowed_origin
        .parse::<HeaderValue>()
        .context("parsing allowed origin")?;

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Ok(Router::new()
        .route("/", get(health))
        .route("/api/generate-pdf", post(generate_pdf))
        .layer(cors)
        .with_state(state))
}

async fn health() -> &'static str {
    "PDF server running"
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        // Without a signal hook the only way out is an operator kill; keep
        // serving rather than tearing down a healthy service.
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
