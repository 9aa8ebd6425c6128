//! HTTP surface: `/analyze-image`, `/ai/providers`, `/ai/logs`, `/health`.

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::ai::{AnalysisMode, AnalysisResult};
use crate::config::{Config, ProviderKeys};
use crate::health::{self, ProviderHealth};
use crate::pipeline::{self, AnalyzeError, AnalyzeRequest};
use crate::store::{AiLog, AiLogStore};

/// Header the auth layer in front of this service sets for signed-in users.
pub const USER_ID_HEADER: &str = "x-user-id";

const DEFAULT_LOG_LIMIT: u32 = 50;
const MAX_LOG_LIMIT: u32 = 200;

/// Shared, read-only state for every request.
pub struct AppState {
    pub config: Config,
    /// Used for analysis calls; carries the analysis timeout.
    pub analysis_client: Client,
    /// Used for health probes; each probe sets its own timeout.
    pub health_client: Client,
    pub logs: Arc<dyn AiLogStore>,
}

impl AppState {
    pub fn new(config: Config, logs: Arc<dyn AiLogStore>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(ms) = config.timeouts.analysis_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let analysis_client = builder.build().context("Failed to build analysis HTTP client")?;
        let health_client = Client::builder()
            .build()
            .context("Failed to build health-check HTTP client")?;

        Ok(Self {
            config,
            analysis_client,
            health_client,
            logs,
        })
    }
}

/// Errors surfaced to HTTP callers as `{ "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<AnalyzeError> for ApiError {
    fn from(err: AnalyzeError) -> Self {
        match err {
            AnalyzeError::InvalidImage => Self::BadRequest(err.to_string()),
            AnalyzeError::EmptyResponse { .. } => Self::BadGateway(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(e) => {
                log::error!("Request failed: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.server.max_body_bytes;

    Router::new()
        .route("/analyze-image", post(analyze_image))
        .route("/ai/providers", get(provider_status))
        .route("/ai/logs", get(recent_logs))
        .route("/health", get(liveness))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeImageBody {
    #[serde(default)]
    pub image_base64: Option<String>,
    #[serde(default, rename = "type")]
    pub mode: AnalysisMode,
}

async fn analyze_image(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeImageBody>, JsonRejection>,
) -> Result<Json<AnalysisResult>, ApiError> {
    let Json(body) = body?;
    let image = body
        .image_base64
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("imageBase64 is required".to_string()))?;

    let keys = resolve_keys(&headers, &state.config);
    let chain = pipeline::build_provider_chain(&state.config, &keys, &state.analysis_client);

    let request = AnalyzeRequest {
        image,
        mode: body.mode,
        user_id: user_id(&headers),
    };
    let outcome = pipeline::analyze_image(&chain, state.logs.as_ref(), request).await?;

    match (&outcome.provider, &outcome.model) {
        (Some(provider), Some(model)) => log::info!("Analysis served by {provider} ({model})"),
        _ => log::info!("Analysis served from offline fallback"),
    }

    Ok(Json(outcome.result))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersResponse {
    pub providers: Vec<ProviderHealth>,
    pub checked_at: String,
}

async fn provider_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Json<ProvidersResponse> {
    let keys = resolve_keys(&headers, &state.config);
    let providers = health::check_providers(&state.health_client, &state.config, &keys).await;

    Json(ProvidersResponse {
        providers,
        checked_at: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub logs: Vec<AiLog>,
}

async fn recent_logs(
    State(state): State<Arc<AppState>>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<LogsResponse>, ApiError> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
    let logs = state.logs.recent(limit).await?;
    Ok(Json(LogsResponse { logs }))
}

async fn liveness() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn resolve_keys(headers: &HeaderMap, config: &Config) -> ProviderKeys {
    ProviderKeys::resolve(
        |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        },
        config,
    )
}

fn user_id(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
