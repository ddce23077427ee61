use crate::config::ApiConfig;
use crate::db::models::ThreatEventSummary;
use crate::db::DatabaseService;
use crate::error::Error;
use crate::services::capture::{CaptureSettings, CaptureSupervisor};
use crate::services::lifecycle::ThreatLifecycle;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ThreatLifecycle>,
    pub supervisor: Arc<CaptureSupervisor>,
    pub capture_defaults: CaptureSettings,
    pub db: Arc<DatabaseService>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
    pub status: u16,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidId(_) | Error::Config(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::BAD_REQUEST.as_u16(),
            },
            Error::NotFound(_) => ApiError {
                message: err.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            },
            Error::AlreadyRunning | Error::NotRunning => ApiError {
                message: err.to_string(),
                status: StatusCode::CONFLICT.as_u16(),
            },
            _ => ApiError {
                message: err.to_string(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            },
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(err) = err.downcast_ref::<Error>() {
            return err.clone().into();
        }

        ApiError {
            message: err.to_string(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        }
    }
}

/// Implement IntoResponse for ApiError
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(self);
        (status, body).into_response()
    }
}

pub struct RestApi {
    config: ApiConfig,
    state: AppState,
}

impl RestApi {
    pub fn new(config: &ApiConfig, state: AppState) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state,
        })
    }

    pub async fn run(&self) -> Result<()> {
        use std::time::Duration;
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600));

        let app = Router::new()
            // Event routes
            .route("/api/threats", get(get_threats))
            .route("/api/neutralized", get(get_neutralized))
            .route("/api/neutralize/:id", post(neutralize_event))
            // Media routes
            .route("/api/media/:reference", get(get_media))
            // Capture control routes
            .route("/api/capture/start", post(start_capture))
            .route("/api/capture/stop", post(stop_capture))
            .route("/api/health", get(health))
            .with_state(self.state.clone())
            .layer(cors);

        let addr = self.config.address.clone() + ":" + &self.config.port.to_string();
        let addr: SocketAddr = addr.parse()?;

        info!("API server listening on {}", addr);

        let listener = TcpListener::bind(addr).await?;

        axum::Server::from_tcp(listener.into_std()?)?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

/// Recent threats that have not been neutralized
async fn get_threats(State(state): State<AppState>) -> ApiResult<Json<Vec<ThreatEventSummary>>> {
    let events = state.lifecycle.active_threats().await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// Recently neutralized threats
async fn get_neutralized(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ThreatEventSummary>>> {
    let events = state.lifecycle.neutralized_threats().await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

async fn neutralize_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.lifecycle.neutralize(&id, Utc::now()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Serve a stored clip or snapshot by its reference
async fn get_media(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> ApiResult<Response> {
    let id = Uuid::parse_str(&reference).map_err(|_| {
        ApiError::from(Error::NotFound(format!("Blob not found: {}", reference)))
    })?;

    let blob = state.lifecycle.media(id).await?;
    Ok(([(header::CONTENT_TYPE, blob.content_type)], blob.data).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptureStartRequest {
    chunk_size: Option<u32>,
    clip_duration: Option<u64>,
}

#[derive(Debug, Serialize)]
struct CaptureStatusResponse {
    status: String,
}

async fn start_capture(
    State(state): State<AppState>,
    body: Option<Json<CaptureStartRequest>>,
) -> ApiResult<Json<CaptureStatusResponse>> {
    let mut settings = state.capture_defaults;
    if let Some(Json(request)) = body {
        if let Some(chunk_size) = request.chunk_size {
            settings.chunk_size = chunk_size;
        }
        if let Some(clip_duration) = request.clip_duration {
            settings.clip_duration_secs = clip_duration;
        }
    }

    let status = state.supervisor.start(Some(settings)).await?;
    Ok(Json(CaptureStatusResponse {
        status: status.to_string(),
    }))
}

async fn stop_capture(State(state): State<AppState>) -> ApiResult<Json<CaptureStatusResponse>> {
    let status = state.supervisor.stop().await?;
    Ok(Json(CaptureStatusResponse {
        status: status.to_string(),
    }))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    if state.db.health_check().await? {
        Ok(Json(serde_json::json!({ "status": "ok" })))
    } else {
        Err(ApiError {
            message: "Database unavailable".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
        })
    }
}
