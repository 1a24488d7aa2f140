//! Lurecast - out-of-band callback capture server
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         LURECAST                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────┐ ┌─────┐ ┌───────┐ ┌─────┐ ┌─────┐  ┌─────────────┐ │
//! │  │ DNS │ │ FTP │ │ MySQL │ │ RMI │ │HTTP │  │  Admin API  │ │
//! │  └──┬──┘ └──┬──┘ └───┬───┘ └──┬──┘ └──┬──┘  │   (Axum)    │ │
//! │     └───────┴────┬───┴────────┴───────┘     └──────┬──────┘ │
//! │                  ▼                                 │        │
//! │        ┌──────────────────┐   rule caches   ┌──────▼──────┐ │
//! │        │ Matching Engine  │◄────────────────┤  Rule Store │ │
//! │        └────────┬─────────┘                 └──────┬──────┘ │
//! │                 ▼                                  ▼        │
//! │        ┌──────────────────┐              ┌─────────────────┐│
//! │        │    Dispatcher    │─────────────►│   PostgreSQL    ││
//! │        └────┬────────┬────┘              └─────────────────┘│
//! │             ▼        ▼                                      │
//! │      live clients  webhooks                                 │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod config;
mod db;
mod dispatch;
mod error;
mod flag;
mod handlers;
mod listeners;
mod middleware;
mod models;
mod notify;
mod realtime;
mod registry;
mod ruleset;

use anyhow::Context;
use axum::{
    middleware as axum_middleware,
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<registry::Registry>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lurecast=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env();

    tracing::info!("Lurecast starting...");
    tracing::info!(
        "Database: {}",
        config.database_url.split('@').last().unwrap_or("***")
    );

    // Initialize database pool
    let pool = db::create_pool(&config.database_url)
        .await
        .context("failed to create database pool")?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    // Build the registry and warm every protocol's rule cache
    let port = config.port;
    let registry = registry::Registry::bootstrap(pool, config)
        .await
        .context("failed to bootstrap rule caches")?;

    // Start protocol listeners
    listeners::spawn_all(registry.clone());

    // Start admin API + HTTP capture listener
    let state = AppState { registry };
    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Admin API and HTTP listener on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Create the main router with all routes
fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new().route("/health", get(handlers::health::check));

    // Management routes (admin token auth)
    let management_routes = Router::new()
        // Rules, one family per protocol
        .route(
            "/api/v1/rules/ftp",
            get(handlers::rules::ftp_list).post(handlers::rules::ftp_upsert),
        )
        .route("/api/v1/rules/ftp/:id", delete(handlers::rules::ftp_delete))
        .route(
            "/api/v1/rules/http",
            get(handlers::rules::http_list).post(handlers::rules::http_upsert),
        )
        .route(
            "/api/v1/rules/http/:id",
            delete(handlers::rules::http_delete),
        )
        .route(
            "/api/v1/rules/dns",
            get(handlers::rules::dns_list).post(handlers::rules::dns_upsert),
        )
        .route("/api/v1/rules/dns/:id", delete(handlers::rules::dns_delete))
        .route(
            "/api/v1/rules/mysql",
            get(handlers::rules::mysql_list).post(handlers::rules::mysql_upsert),
        )
        .route(
            "/api/v1/rules/mysql/:id",
            delete(handlers::rules::mysql_delete),
        )
        .route(
            "/api/v1/rules/rmi",
            get(handlers::rules::rmi_list).post(handlers::rules::rmi_upsert),
        )
        .route("/api/v1/rules/rmi/:id", delete(handlers::rules::rmi_delete))
        // Interaction log + live event stream
        .route("/api/v1/interactions", get(handlers::interactions::list))
        .route("/api/v1/events", get(handlers::interactions::events))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_admin_auth,
        ));

    // Everything else that reaches this server is a captured callback
    Router::new()
        .merge(public_routes)
        .merge(management_routes)
        .fallback(listeners::http::capture)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
