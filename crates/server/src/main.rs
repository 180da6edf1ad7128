use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::{
    list_devices, login, logout,
    sessions::{SessionStore, DEFAULT_SWEEP_INTERVAL},
    signup, toggle_chaos, ApiContext,
};
use shared::{
    domain::SessionId,
    error::{ApiError, ErrorCode},
    protocol::{
        ChaosResponse, CredentialsRequest, DashboardResponse, OwnerResponse, SessionResponse,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;
mod ws;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024;

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
pub(crate) struct SessionQuery {
    session: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let api = ApiContext::new(storage).with_sessions(SessionStore::with_idle_ttl(
        Duration::from_secs(settings.session_idle_ttl_secs),
    ));
    let producer = api
        .telemetry_producer(Duration::from_millis(settings.telemetry_interval_ms))
        .spawn();
    let sweeper = api.sessions.spawn_sweeper(DEFAULT_SWEEP_INTERVAL);

    let app = build_router(Arc::new(AppState { api }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Err(error) = producer.shutdown().await {
        error!(%error, "telemetry producer ended abnormally");
    }
    if let Err(error) = sweeper.shutdown().await {
        error!(%error, "session sweeper ended abnormally");
    }
    served?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(%error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session))
        .route("/signup", post(http_signup))
        .route("/login", post(http_login))
        .route("/logout", post(http_logout))
        .route("/toggle_chaos", post(http_toggle_chaos))
        .route("/devices", get(http_list_devices))
        .route("/ws", get(ws::ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::ActionFailed | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(error: ApiError) -> HttpError {
    (status_for(error.code), Json(error))
}

/// Resolves a server-issued session id. Unknown ids are rejected rather than created.
pub(crate) fn require_session(state: &AppState, q: SessionQuery) -> Result<SessionId, HttpError> {
    let session = SessionId(q.session);
    if state.api.sessions.exists(&session) {
        Ok(session)
    } else {
        Err(http_error(ApiError::new(
            ErrorCode::Unauthorized,
            "unknown session",
        )))
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            error!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionResponse> {
    let session_id = state.api.sessions.create();
    Json(SessionResponse {
        session_id,
        chaos_enabled: false,
    })
}

async fn http_signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<OwnerResponse>, HttpError> {
    let owner_id = signup(&state.api, &req.username)
        .await
        .map_err(http_error)?;
    Ok(Json(OwnerResponse { owner_id }))
}

async fn http_login(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<OwnerResponse>, HttpError> {
    let session = require_session(&state, q)?;
    let owner_id = login(&state.api, &session, &req.username)
        .await
        .map_err(http_error)?;
    Ok(Json(OwnerResponse { owner_id }))
}

async fn http_logout(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<StatusCode, HttpError> {
    let session = require_session(&state, q)?;
    logout(&state.api, &session).map_err(http_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn http_toggle_chaos(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<ChaosResponse>, HttpError> {
    let session = require_session(&state, q)?;
    let chaos_enabled = toggle_chaos(&state.api, &session);
    Ok(Json(ChaosResponse { chaos_enabled }))
}

async fn http_list_devices(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<DashboardResponse>, HttpError> {
    let session = require_session(&state, q)?;
    let dashboard = list_devices(&state.api, &session)
        .await
        .map_err(http_error)?;
    Ok(Json(dashboard))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
