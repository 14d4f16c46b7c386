//! Axum-based HTTP gateway with body limits and timeouts.
//!
//! Maps the Chronos API onto [`AccountService`]:
//! - `POST /api/auth/register` — atomic account provisioning
//! - `POST /api/auth/login` — credential check + full profile snapshot
//! - `POST /api/get/attributes` — legacy first-row attribute read
//! - `GET /health` — liveness probe
//!
//! CORS is wide open (the frontend is served from app bundles and local
//! dev servers), bodies are capped at 64KB, and slow requests time out.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use crate::auth::account::{
    AttributeSnapshot, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};
use crate::auth::AccountService;
use crate::config::Config;
use crate::db::Database;
use crate::error::ApiError;

/// Maximum request body size (64KB) — prevents memory exhaustion
pub const MAX_BODY_SIZE: usize = 65_536;
/// Request timeout (30s)
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub accounts: AccountService,
}

/// Open the database and assemble the handler state.
pub fn build_state(config: &Config) -> Result<AppState> {
    let db = Arc::new(Database::open(&config.database)?);
    let accounts = AccountService::new(Arc::clone(&db), &config.auth);
    Ok(AppState { db, accounts })
}

/// Build the router with CORS, body limit, and timeout middleware.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/register", post(handle_register))
        .route("/api/auth/login", post(handle_login))
        .route("/api/get/attributes", post(handle_attributes))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Bind, announce, and run the gateway until ctrl-c, then close the pool.
pub async fn serve(config: Config) -> Result<()> {
    let state = build_state(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.http.host, config.http.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_port = listener.local_addr()?.port();
    let display_addr = format!("{}:{}", config.http.host, actual_port);

    println!("🧭 Chronos backend listening on http://{display_addr}");
    println!("  POST /api/auth/register  — create an account");
    println!("  POST /api/auth/login     — authenticate, returns profile snapshot");
    println!("  POST /api/get/attributes — first attribute row (legacy)");
    println!("  GET  /health             — health check");
    println!("  Press Ctrl+C to stop.\n");

    let db = Arc::clone(&state.db);
    let app = router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => {
            // No signal handler; keep serving rather than exiting early.
            tracing::error!("failed to listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /health — liveness probe, always public.
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "running" }))
}

/// POST /api/auth/register — create an account with default settings and
/// attributes.
async fn handle_register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let Json(req) = body.map_err(|e| {
        tracing::debug!("register body rejected: {e}");
        ApiError::InvalidRequest
    })?;
    Ok(Json(state.accounts.register(&req)?))
}

/// POST /api/auth/login — authenticate and return the profile snapshot.
async fn handle_login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, axum::extract::rejection::JsonRejection>,
) -> Result<Json<LoginResponse>, ApiError> {
    let Json(req) = body.map_err(|e| {
        tracing::debug!("login body rejected: {e}");
        ApiError::InvalidRequest
    })?;
    Ok(Json(state.accounts.login(&req)?))
}

/// POST /api/get/attributes — first stored attribute row, or `null`.
async fn handle_attributes(State(state): State<AppState>) -> Json<Option<AttributeSnapshot>> {
    Json(state.accounts.first_attribute_snapshot())
}
