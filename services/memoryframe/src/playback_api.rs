use crate::config::ApiConfig;
use crate::error::FrameError;
use crate::frame_service::FrameService;
use crate::lookup_resolver::{resolve_identifier, LookupInput, LookupResolver};
use crate::record_gateway::Frame;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub frames: Arc<FrameService>,
    pub lookup: Arc<LookupResolver>,
    pub pool: PgPool,
}

/// Frame as shown to visitors; the owner id stays private
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct FrameResponse {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub photo_url: String,
    pub video_url: String,
    pub created_at: DateTime<Utc>,
}

impl From<Frame> for FrameResponse {
    fn from(f: Frame) -> Self {
        Self {
            id: f.id,
            title: f.title,
            description: f.description,
            photo_url: f.photo_url,
            video_url: f.video_url,
            created_at: f.created_at,
        }
    }
}

/// Scanned payload lookup request
#[derive(Debug, Deserialize)]
pub struct LookupRequest {
    pub payload: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn not_found() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Memory not found.".to_string(),
            code: "NOT_FOUND".to_string(),
        }),
    )
}

fn lookup_failed(e: FrameError) -> ApiError {
    error!(error = %e, "Failed to load frame");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Error loading memory.".to_string(),
            code: e.code().to_string(),
        }),
    )
}

fn found(frame: Option<Frame>) -> Result<Json<FrameResponse>, ApiError> {
    frame.map(|f| Json(f.into())).ok_or_else(not_found)
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/scan", get(open_direct_link))
        .route("/api/v1/frames/:frame_id", get(get_frame))
        .route("/api/v1/lookup", post(lookup_payload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "memoryframe"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Direct link: `/scan?frame=<id>`
#[instrument(skip(state))]
async fn open_direct_link(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<FrameResponse>, ApiError> {
    let input = LookupInput::QueryString(query.unwrap_or_default());

    if resolve_identifier(&input).is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Missing frame parameter.".to_string(),
                code: "MISSING_FRAME".to_string(),
            }),
        ));
    }

    found(state.lookup.open(&input).await.map_err(lookup_failed)?)
}

/// Get a single frame by id
#[instrument(skip(state))]
async fn get_frame(
    State(state): State<AppState>,
    Path(frame_id): Path<String>,
) -> Result<Json<FrameResponse>, ApiError> {
    found(
        state
            .frames
            .get_frame_for_display(&frame_id)
            .await
            .map_err(lookup_failed)?,
    )
}

/// Resolve a scanned QR payload
#[instrument(skip(state))]
async fn lookup_payload(
    State(state): State<AppState>,
    Json(request): Json<LookupRequest>,
) -> Result<Json<FrameResponse>, ApiError> {
    let input = LookupInput::Scanned(request.payload);
    found(state.lookup.open(&input).await.map_err(lookup_failed)?)
}

/// Start the playback API server, stopping when `shutdown` resolves
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting playback API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
