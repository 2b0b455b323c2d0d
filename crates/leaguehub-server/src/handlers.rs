use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use leaguehub_fpl::{ClearTarget, CrestOptions, FetchMode, FplError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

use crate::metrics;
use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Error body returned by every API route.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<FplError> for ApiError {
    fn from(err: FplError) -> Self {
        let status = match err.upstream_status() {
            Some(s) if s == StatusCode::NOT_FOUND => StatusCode::NOT_FOUND,
            Some(s) if s == StatusCode::TOO_MANY_REQUESTS => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "LeagueHub",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn cache_health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.cache.health_check().await;
    let status = if report.overall {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.cache.stats())
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClearKind {
    League,
    Team,
    Gameweek,
    #[default]
    All,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub target: ClearKind,
    pub id: Option<u64>,
}

impl ClearRequest {
    fn into_target(self) -> Result<ClearTarget, ApiError> {
        let need_id = |kind: &str| ApiError::bad_request(format!("clearing a {kind} requires an id"));
        Ok(match self.target {
            ClearKind::All => ClearTarget::All,
            ClearKind::League => ClearTarget::League(self.id.ok_or_else(|| need_id("league"))?),
            ClearKind::Team => ClearTarget::Team(self.id.ok_or_else(|| need_id("team"))?),
            ClearKind::Gameweek => {
                let id = self.id.ok_or_else(|| need_id("gameweek"))?;
                let gameweek = u32::try_from(id).map_err(|_| ApiError::bad_request("gameweek out of range"))?;
                ClearTarget::Gameweek(gameweek)
            }
        })
    }
}

/// Without a body the whole cache is cleared.
pub async fn cache_clear(
    State(state): State<AppState>,
    body: Option<Json<ClearRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let target = request.into_target()?;
    state.fpl.clear_cache(target).await;
    Ok(Json(json!({ "cleared": format!("{target:?}") })))
}

pub async fn metrics_endpoint() -> Response {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct StandingsQuery {
    pub page: Option<u32>,
    pub fresh: Option<bool>,
}

pub async fn league_standings(
    State(state): State<AppState>,
    Path(league_id): Path<u64>,
    Query(query): Query<StandingsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let mode = FetchMode {
        force_fresh: query.fresh.unwrap_or(false),
        ..Default::default()
    };
    let standings = state.fpl.league_standings(league_id, page, mode).await?;
    Ok(Json(standings))
}

/// Falls back to the configured gameweek when FPL is unreachable.
pub async fn current_gameweek(State(state): State<AppState>) -> impl IntoResponse {
    let gameweek = state.fpl.current_gameweek().await;
    Json(json!({ "gameweek": gameweek }))
}

#[derive(Debug, Deserialize)]
pub struct TeamsQuery {
    pub ids: String,
}

fn parse_ids(raw: &str) -> Result<Vec<u64>, ApiError> {
    let ids = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|_| ApiError::bad_request(format!("invalid team id '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if ids.is_empty() {
        return Err(ApiError::bad_request("ids must list at least one team id"));
    }
    Ok(ids)
}

pub async fn batch_teams(
    State(state): State<AppState>,
    Query(query): Query<TeamsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let ids = parse_ids(&query.ids)?;
    let teams = state.fpl.batch_team_data(&ids).await;
    let body = json!({
        "requested": ids.len(),
        "found": teams.len(),
        "teams": teams,
    });
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrestRequest {
    #[serde(alias = "team_names")]
    pub team_names: Option<Vec<String>>,
    #[serde(alias = "team_name")]
    pub team_name: Option<String>,
    #[serde(default, alias = "force_regenerate")]
    pub force_regenerate: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrestQuery {
    #[serde(alias = "team_name")]
    pub team_name: String,
}

pub async fn generate_crests(
    State(state): State<AppState>,
    Json(request): Json<CrestRequest>,
) -> Result<Response, ApiError> {
    let opts = CrestOptions {
        force_regenerate: request.force_regenerate,
        batch_size: state.crest_batch_size,
        ..Default::default()
    };

    if let Some(names) = request.team_names {
        let start = Instant::now();
        let crests = state.crests.generate_crests(&names, opts).await;
        let body = json!({
            "count": crests.len(),
            "durationMs": start.elapsed().as_millis() as u64,
            "crests": crests,
        });
        return Ok(Json(body).into_response());
    }

    match request.team_name {
        Some(name) if !name.trim().is_empty() => {
            let crest_url = state.crests.team_crest(&name, opts).await;
            Ok(Json(json!({ "crestUrl": crest_url })).into_response())
        }
        _ => Err(ApiError::bad_request("teamName or teamNames is required")),
    }
}

pub async fn team_crest(
    State(state): State<AppState>,
    Query(query): Query<CrestQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.team_name.trim().is_empty() {
        return Err(ApiError::bad_request("teamName is required"));
    }
    let crest_url = state
        .crests
        .team_crest(&query.team_name, CrestOptions::default())
        .await;
    Ok(Json(json!({ "crestUrl": crest_url })))
}

/// FPL and crest service metrics side by side.
pub async fn performance(State(state): State<AppState>) -> impl IntoResponse {
    let (fpl, crests) = tokio::join!(state.fpl.metrics(), state.crests.metrics());
    Json(json!({
        "fpl": fpl,
        "crests": crests,
    }))
}
