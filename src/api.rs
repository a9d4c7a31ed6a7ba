//! HTTP surface: ingest, query, stats, liveness.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, ConnectInfo, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::QueryConfig;
use crate::error::TrailError;
use crate::ingest::{ingest, resolve_client_ip};
use crate::models::{
    ActivitiesResponse, ErrorResponse, IngestResponse, SessionDetailResponse, SessionsResponse,
    StatsResponse, TimeRange,
};
use crate::store::ActivityStore;

/// Shared handler state; the store is owned by `main` and passed in by handle.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ActivityStore>,
    pub query: QueryConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn ActivityStore>, query: QueryConfig) -> Self {
        Self { store, query }
    }
}

/// Build the full router with CORS and request tracing.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/track-activity", post(track_activity))
        .route("/api/get-sessions", get(list_activities))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/:session_id", get(get_session))
        .route("/api/stats", get(get_stats))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Event producers live on other origins.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Endpoint-boundary error: every failure becomes `{success:false, error}`.
#[derive(Debug)]
pub struct ApiError(pub TrailError);

impl From<TrailError> for ApiError {
    fn from(value: TrailError) -> Self {
        Self(value)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        Self(TrailError::invalid_payload(value.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TrailError::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            TrailError::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            debug!(code = self.0.code(), error = %self.0, "request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Server is running",
    }))
}

/// Ingest one activity
///
/// The body is parsed regardless of content type; beacon-style producers
/// often send JSON as `text/plain`.
async fn track_activity(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| TrailError::invalid_payload(format!("malformed JSON body: {e}")))?;
    let ip_address = resolve_client_ip(&headers, connect.map(|ConnectInfo(addr)| addr));

    let stored = ingest(state.store.as_ref(), &payload, ip_address, Utc::now())?;

    Ok(Json(IngestResponse {
        success: true,
        id: stored.id,
    }))
}

/// Query parameters shared by the listing endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub session_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ListParams {
    fn range(&self) -> Result<Option<TimeRange>, TrailError> {
        if self.start_date.is_none() && self.end_date.is_none() {
            return Ok(None);
        }
        TimeRange::from_bounds(self.start_date, self.end_date).map(Some)
    }
}

/// Activities: by session (chronological), by range, or everything (newest first).
async fn list_activities(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ActivitiesResponse>, ApiError> {
    let Query(params) = params?;
    let limit = state
        .query
        .effective_limit(params.limit, state.query.default_activity_limit);

    let activities = if let Some(session_id) = params.session_id.as_deref() {
        state.store.query_by_session(session_id)?
    } else if let Some(range) = params.range()? {
        state.store.query_by_time_range(range, limit)?
    } else {
        state.store.query_all(limit)?
    };

    Ok(Json(ActivitiesResponse {
        success: true,
        activities,
    }))
}

/// Session aggregates, most recently active first.
async fn list_sessions(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let Query(params) = params?;
    let limit = state
        .query
        .effective_limit(params.limit, state.query.default_session_limit);

    let sessions = match params.range()? {
        Some(range) => state.store.sessions_by_time_range(range, limit)?,
        None => state.store.sessions(limit)?,
    };

    Ok(Json(SessionsResponse {
        success: true,
        sessions,
    }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDetailResponse>, ApiError> {
    let session = state.store.session(&session_id)?;
    let activities = state.store.query_by_session(&session_id)?;

    Ok(Json(SessionDetailResponse {
        success: true,
        session,
        activities,
    }))
}

async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.store.stats(Utc::now())?;
    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_mapping() {
        let invalid = ApiError(TrailError::invalid_payload("missing required field: page"));
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);

        let down = ApiError(TrailError::storage_unavailable("sqlite", "disk gone"));
        assert_eq!(down.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn params_without_dates_have_no_range() {
        assert_eq!(ListParams::default().range().unwrap(), None);

        let inverted = ListParams {
            start_date: Some(Utc::now()),
            end_date: Some(DateTime::<Utc>::UNIX_EPOCH),
            ..ListParams::default()
        };
        assert!(inverted.range().is_err());
    }
}
