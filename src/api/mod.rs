//! HTTP API for the discovery service.
//!
//! Three surfaces: trigger a scan, list an organization's connections, and
//! the OAuth connect flow (start + callback). Internal errors return a
//! generic message to the caller while full detail is logged server-side;
//! provider payloads and stack traces never leave the process.

pub mod oauth;

use crate::auth::extract_caller_org;
use crate::config::ScanConfig;
use crate::credentials::TokenCipher;
use crate::provider::ProviderRegistry;
use crate::scan::{ScanError, ScanOrchestrator, ScanToolSummary};
use crate::store::DiscoveryStore;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};
use uuid::Uuid;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    needs_reconnect: Option<bool>,
}

/// Application error types for the discovery API
pub(crate) enum AppError {
    BadRequest(String),
    Unauthorized(String),
    /// Auth/token failure the operator fixes by reconnecting
    NeedsReconnect(String),
    NotFound(String),
    Conflict(String),
    ServerError(String),
    BadGateway(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, needs_reconnect) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, None),
            AppError::NeedsReconnect(msg) => (StatusCode::UNAUTHORIZED, msg, Some(true)),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            AppError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
        };

        let body = Json(ErrorResponse {
            success: false,
            error,
            needs_reconnect,
        });

        (status, body).into_response()
    }
}

/// Shared application state for the discovery API
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DiscoveryStore>,
    pub cipher: TokenCipher,
    pub providers: Arc<ProviderRegistry>,
    pub orchestrator: Arc<ScanOrchestrator>,
    /// Public base URL used to build OAuth redirect URIs
    pub callback_base_url: String,
}

impl AppState {
    pub fn new(
        store: Arc<DiscoveryStore>,
        cipher: TokenCipher,
        providers: Arc<ProviderRegistry>,
        scan_config: ScanConfig,
        callback_base_url: String,
    ) -> Self {
        let orchestrator = Arc::new(ScanOrchestrator::new(
            Arc::clone(&store),
            cipher.clone(),
            Arc::clone(&providers),
            scan_config,
        ));
        Self {
            store,
            cipher,
            providers,
            orchestrator,
            callback_base_url,
        }
    }
}

/// Create the discovery API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/scan", post(trigger_scan))
        .route("/api/connections", get(list_connections))
        .route(
            "/api/connections/:id/oauth/start",
            get(oauth::oauth_start),
        )
        .route("/api/oauth/callback", get(oauth::oauth_callback))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Scan trigger request
#[derive(Deserialize)]
struct ScanRequest {
    connection_id: Uuid,
}

/// Scan success response
#[derive(Serialize)]
struct ScanResponse {
    success: bool,
    tools_found: usize,
    tools: Vec<ScanToolSummary>,
}

/// POST /api/scan
///
/// Runs one discovery scan for a connection owned by the calling
/// organization.
async fn trigger_scan(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, AppError> {
    let caller_org = extract_caller_org(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let outcome = state
        .orchestrator
        .run_scan(caller_org, request.connection_id)
        .await
        .map_err(|e| match e {
            ScanError::ConnectionNotFound => {
                AppError::NotFound("Connection not found".to_string())
            }
            ScanError::NeedsReconnect => AppError::NeedsReconnect(
                "Connection requires re-authentication".to_string(),
            ),
            ScanError::Internal(cause) => {
                // Detail stays server-side; the caller sees a generic message
                error!(
                    connection_id = %request.connection_id,
                    error = %cause,
                    "Scan failed"
                );
                AppError::ServerError("Internal error".to_string())
            }
        })?;

    Ok(Json(ScanResponse {
        success: true,
        tools_found: outcome.tools_found,
        tools: outcome.tools,
    }))
}

/// Connection summary exposed to operators. Token columns never leave the
/// store through this surface.
#[derive(Serialize)]
struct ConnectionSummary {
    id: Uuid,
    provider: String,
    status: String,
    last_scan_at: Option<DateTime<Utc>>,
    next_scan_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// GET /api/connections
///
/// Lists the calling organization's connections.
async fn list_connections(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConnectionSummary>>, AppError> {
    let caller_org = extract_caller_org(&headers)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let connections = state.store.list_connections(caller_org).map_err(|e| {
        warn!(organization_id = %caller_org, error = %e, "Failed to list connections");
        AppError::ServerError("Internal error".to_string())
    })?;

    let summaries = connections
        .into_iter()
        .map(|c| ConnectionSummary {
            id: c.id,
            provider: c.provider.as_str().to_string(),
            status: c.status.as_str().to_string(),
            last_scan_at: c.last_scan_at,
            next_scan_at: c.next_scan_at,
            last_error: c.last_error,
        })
        .collect();

    Ok(Json(summaries))
}
