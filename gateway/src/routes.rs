use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use hotspot_risk::{ClusterProfile, GeoPoint, HotspotError};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

/// Largest accepted batch lookup
pub const MAX_BATCH_POINTS: usize = 10_000;

const DEFAULT_TOP: usize = 10;

#[derive(Deserialize)]
pub struct TopQuery {
    pub top: Option<usize>,
}

#[derive(Deserialize)]
pub struct RiskQuery {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Serialize)]
pub struct RiskResponse {
    pub matched: bool,
    pub profile: Option<ClusterProfile>,
}

impl From<Option<&ClusterProfile>> for RiskResponse {
    fn from(profile: Option<&ClusterProfile>) -> Self {
        Self {
            matched: profile.is_some(),
            profile: profile.cloned(),
        }
    }
}

#[derive(Deserialize)]
pub struct BatchRequest {
    pub points: Vec<RiskQuery>,
}

#[derive(Serialize)]
pub struct BatchResponse {
    pub matched: usize,
    pub results: Vec<RiskResponse>,
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/hotspots", get(list_hotspots))
        .route("/hotspots/:label", get(get_hotspot))
        .route("/risk", get(risk))
        .route("/risk/batch", post(risk_batch));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn error_response(e: HotspotError) -> (StatusCode, String) {
    let status = match e {
        HotspotError::MalformedRecord { .. } | HotspotError::InvalidParameter { .. } => {
            StatusCode::BAD_REQUEST
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let lookup = &state.lookup;
    Json(serde_json::json!({
        "status": "healthy",
        "service": "hotspot-gateway",
        "hotspots": lookup.profiles().len(),
        "core_points": lookup.model().core_points.len(),
        "radius_km": lookup.model().params().radius_km(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hotspots ranked by member count
pub async fn list_hotspots(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Json<Vec<ClusterProfile>> {
    let top = query.top.unwrap_or(DEFAULT_TOP);
    let profiles = state
        .lookup
        .profiles()
        .largest(top)
        .into_iter()
        .cloned()
        .collect();

    Json(profiles)
}

pub async fn get_hotspot(
    State(state): State<AppState>,
    Path(label): Path<i64>,
) -> Result<Json<ClusterProfile>, (StatusCode, String)> {
    let profile = state
        .lookup
        .profiles()
        .get(label)
        .ok_or((StatusCode::NOT_FOUND, format!("Hotspot {} not found", label)))?;

    Ok(Json(profile.clone()))
}

pub async fn risk(
    State(state): State<AppState>,
    Query(query): Query<RiskQuery>,
) -> Result<Json<RiskResponse>, (StatusCode, String)> {
    let profile = state
        .lookup
        .lookup(query.lat, query.lon)
        .map_err(error_response)?;

    tracing::debug!(
        "Risk lookup ({}, {}): {}",
        query.lat,
        query.lon,
        profile.map_or("miss".to_string(), |p| format!("hotspot {}", p.label))
    );

    Ok(Json(profile.into()))
}

pub async fn risk_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, (StatusCode, String)> {
    if request.points.len() > MAX_BATCH_POINTS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "Batch of {} points exceeds limit of {}",
                request.points.len(),
                MAX_BATCH_POINTS
            ),
        ));
    }

    let points: Vec<GeoPoint> = request
        .points
        .iter()
        .map(|p| GeoPoint::new(p.lat, p.lon))
        .collect();
    let hits = state.lookup.lookup_many(&points).map_err(error_response)?;

    let results: Vec<RiskResponse> = hits.into_iter().map(RiskResponse::from).collect();
    let matched = results.iter().filter(|r| r.matched).count();

    Ok(Json(BatchResponse { matched, results }))
}
