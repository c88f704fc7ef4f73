use crate::auth::{AuthenticatedUser, CredentialVerifier};
use crate::config::ApiConfig;
use crate::enrichment::{Enrich, EnrichmentError};
use crate::error::ApiError;
use crate::models::{CreateVideoRequest, FieldError, PopulatedVideo};
use crate::video_store::VideoRepository;
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

const API_VERSION: u32 = 2;
const API_DESCRIPTION: &str = "Video catalog API with owner enrichment";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VideoRepository>,
    pub enricher: Arc<dyn Enrich>,
    pub verifier: Arc<CredentialVerifier>,
}

impl FromRef<AppState> for Arc<CredentialVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}

/// Version response
#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: u32,
    pub description: &'static str,
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
        .route("/api/videos", get(list_videos).post(create_video))
        .route("/api/videos/version", get(version))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "video-service"
    }))
}

/// Readiness: database reachable and signing secret received
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.ping().await;
    let secret_ready = state.verifier.is_ready();

    if database.is_ok() && secret_ready {
        return (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected",
                "signing_secret": "ready"
            })),
        );
    }

    let database = match database {
        Ok(()) => "connected",
        Err(e) => {
            warn!(error = %e, "Readiness check: database unreachable");
            "disconnected"
        }
    };
    let signing_secret = if secret_ready { "ready" } else { "pending" };

    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({
            "status": "not_ready",
            "database": database,
            "signing_secret": signing_secret
        })),
    )
}

async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: API_VERSION,
        description: API_DESCRIPTION,
    })
}

/// List every video with its owner
#[instrument(skip(state))]
async fn list_videos(State(state): State<AppState>) -> Result<Json<Vec<PopulatedVideo>>, ApiError> {
    let videos = state.store.list().await?;
    let populated = state.enricher.enrich(&videos).await?;
    Ok(Json(populated))
}

/// Create a video owned by the caller
#[instrument(skip_all, fields(user_id = %user.id))]
async fn create_video(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    payload: Result<Json<CreateVideoRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PopulatedVideo>), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        ApiError::Validation(vec![FieldError {
            field: "body",
            message: rejection.body_text(),
        }])
    })?;
    request.validate().map_err(ApiError::Validation)?;

    let video = state.store.create(request.into_new_video(user.id)).await?;
    info!(video_id = %video.id, "Video created");

    let populated = state
        .enricher
        .enrich(std::slice::from_ref(&video))
        .await?
        .pop()
        .ok_or_else(|| EnrichmentError::MissingOwner(video.owner_user_id.clone()))?;

    Ok((StatusCode::CREATED, Json(populated)))
}

/// Start the API server; returns once `shutdown` fires and in-flight
/// requests have drained
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting video API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
