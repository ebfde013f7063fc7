use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use focus_core::models::{Conflict, Device, SyncRequest, SyncResponse, SyncStats};
use focus_core::sync::LoggingDispatcher;
use focus_core::util::user_fingerprint;
use focus_core::{DatabaseService, SyncCoordinator};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

const DEFAULT_CONFLICT_LIMIT: usize = 50;
const MAX_CONFLICT_LIMIT: usize = 500;

type Coordinator = SyncCoordinator<DatabaseService, LoggingDispatcher>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    jwt_verifier: Arc<JwtVerifier>,
    coordinator: Arc<Coordinator>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    /// Open the sync database named in the config
    pub fn from_config(config: Arc<AppConfig>) -> focus_core::Result<Self> {
        let store = DatabaseService::open_path(&config.database_path)?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: Arc<AppConfig>, store: DatabaseService) -> Self {
        Self {
            jwt_verifier: Arc::new(JwtVerifier::from_config(&config)),
            coordinator: Arc::new(SyncCoordinator::with_notifier(
                store,
                &config.engine,
                LoggingDispatcher,
            )),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/sync", post(sync))
        .route("/sync/devices", get(list_devices))
        .route("/sync/stats", get(sync_stats))
        .route("/sync/reset", post(reset_device))
        .route("/sync/conflicts", get(list_conflicts))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp_millis(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Storage calls block on SQLite, so they run off the async workers.
async fn run_blocking<T, F>(task: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> focus_core::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| AppError::internal(format!("Storage task failed: {error}")))?
        .map_err(AppError::from)
}

async fn sync(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<SyncResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sync, &user.user_id)
        .await?;

    let coordinator = Arc::clone(&state.coordinator);
    let user_id = user.user_id.clone();
    let response = run_blocking(move || coordinator.sync(&user_id, request)).await?;

    tracing::debug!(
        endpoint = "sync",
        user = user_fingerprint(&user.user_id),
        session = user.session_id.as_deref().unwrap_or("none"),
        last_sync_time = response.last_sync_time,
        "Completed sync exchange"
    );
    Ok(Json(response))
}

async fn list_devices(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<Device>>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Admin, &user.user_id)
        .await?;

    let coordinator = Arc::clone(&state.coordinator);
    let devices = run_blocking(move || coordinator.devices(&user.user_id)).await?;
    Ok(Json(devices))
}

async fn sync_stats(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SyncStats>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Admin, &user.user_id)
        .await?;

    let coordinator = Arc::clone(&state.coordinator);
    let stats = run_blocking(move || coordinator.stats(&user.user_id)).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
struct ResetRequest {
    device_id: String,
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    device_id: String,
    reset: bool,
}

async fn reset_device(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<ResetResponse>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Admin, &user.user_id)
        .await?;

    let device_id = request.device_id.trim().to_string();
    if device_id.is_empty() {
        return Err(AppError::bad_request("device_id must not be empty"));
    }

    let coordinator = Arc::clone(&state.coordinator);
    let target = device_id.clone();
    let reset = run_blocking(move || coordinator.reset_device(&user.user_id, &target)).await?;
    if !reset {
        return Err(AppError::not_found(format!(
            "device {device_id} has never synced"
        )));
    }
    Ok(Json(ResetResponse { device_id, reset }))
}

#[derive(Debug, Deserialize)]
struct ConflictQuery {
    limit: Option<usize>,
}

async fn list_conflicts(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<ConflictQuery>,
) -> Result<Json<Vec<Conflict>>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Admin, &user.user_id)
        .await?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_CONFLICT_LIMIT)
        .clamp(1, MAX_CONFLICT_LIMIT);
    let coordinator = Arc::clone(&state.coordinator);
    let conflicts = run_blocking(move || coordinator.conflicts(&user.user_id, limit)).await?;
    Ok(Json(conflicts))
}
