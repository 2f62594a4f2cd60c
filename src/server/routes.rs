//! API route handlers.
//!
//! All endpoints return JSON. Errors are `{"error": code, "message": text}`
//! with a status derived from the error kind.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::data::RaceSummary;
use crate::engine::{Advisor, AnalysisCommand};
use crate::strategy::portfolio::Portfolio;
use crate::types::{AdvisorError, OddsBoard, Race};
use crate::wizard::BettingSession;

pub type AppState = Arc<Advisor>;

/// Most portfolios returned by one history query.
const MAX_HISTORY_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError(pub AdvisorError);

impl From<AdvisorError> for ApiError {
    fn from(e: AdvisorError) -> Self {
        Self(e)
    }
}

/// Malformed or mistyped request bodies.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(AdvisorError::Validation(format!("Invalid request body: {}", rejection.body_text())))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AdvisorError::Validation(_) => StatusCode::BAD_REQUEST,
            AdvisorError::RaceNotFound(_) | AdvisorError::OddsUnavailable(_) | AdvisorError::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AdvisorError::Transition { .. } | AdvisorError::WrongStep { .. } => StatusCode::CONFLICT,
            AdvisorError::Analysis { .. } | AdvisorError::DataSource { .. } => StatusCode::BAD_GATEWAY,
            AdvisorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(status = %status, error = %self.0, "Request failed");
        }
        let body = ErrorBody {
            error: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RacesQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub race_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub bets: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub bet: String,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub selected: bool,
    pub session: BettingSession,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub race_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub source: &'static str,
    pub analyst: String,
    pub sessions: usize,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        source: state.source_name(),
        analyst: state.analyst_name().to_string(),
        sessions: state.store().len().await,
    })
}

/// GET /api/races?date=YYYY-MM-DD
pub async fn list_races(State(state): State<AppState>, Query(q): Query<RacesQuery>) -> ApiResult<Json<Vec<RaceSummary>>> {
    Ok(Json(state.list_races(q.date).await?))
}

/// GET /api/races/:id
pub async fn get_race(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Race>> {
    Ok(Json(state.race(&id).await?))
}

/// GET /api/races/:id/odds
pub async fn get_odds(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<OddsBoard>> {
    Ok(Json(state.odds(&id).await?))
}

/// POST /api/sessions
pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> ApiResult<(StatusCode, Json<BettingSession>)> {
    let Json(request) = body.unwrap_or_default();
    let session = state.create_session(request.race_id).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/sessions/:id
pub async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<BettingSession>> {
    Ok(Json(state.session(id).await?))
}

/// DELETE /api/sessions/:id
pub async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.remove_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/:id/analysis
pub async fn run_analysis(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<AnalysisCommand>, JsonRejection>,
) -> ApiResult<Json<BettingSession>> {
    let Json(command) = body?;
    Ok(Json(state.run_analysis(id, command).await?))
}

/// PUT /api/sessions/:id/selection
pub async fn set_selection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<SelectionRequest>, JsonRejection>,
) -> ApiResult<Json<BettingSession>> {
    let Json(request) = body?;
    Ok(Json(state.set_selection(id, &request.bets).await?))
}

/// POST /api/sessions/:id/selection/toggle
pub async fn toggle_bet(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> ApiResult<Json<ToggleResponse>> {
    let Json(request) = body?;
    let (selected, session) = state.toggle_bet(id, &request.bet).await?;
    Ok(Json(ToggleResponse { selected, session }))
}

/// POST /api/sessions/:id/advance
pub async fn advance(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<BettingSession>> {
    Ok(Json(state.advance(id).await?))
}

/// POST /api/sessions/:id/back
pub async fn back(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<BettingSession>> {
    Ok(Json(state.back(id).await?))
}

/// POST /api/sessions/:id/reset
pub async fn reset(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<BettingSession>> {
    Ok(Json(state.reset(id).await?))
}

/// GET /api/portfolios?race_id=&limit=
pub async fn recent_portfolios(
    State(state): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Portfolio>>> {
    let limit = q.limit.unwrap_or(20).clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.recent_portfolios(q.race_id.as_deref(), limit).await?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
