//! Point-in-time insulin endpoints.
//!
//! - `GET /api/v1/analytics/{account}/iob?at=` returns IOB/COB
//! - `GET /api/v1/analytics/{account}/tempbasal?at=` returns the basal state
//!
//! `at` is epoch milliseconds and defaults to now.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{now_ms, ApiError, AppState};
use crate::analytics::{BasalTimeline, IobCalculator, IobResult, TempBasalResult};
use crate::models::ONE_DAY_MS;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/v1/analytics/{account}/iob", get(iob))
        .route("/api/v1/analytics/{account}/tempbasal", get(tempbasal))
}

#[derive(Debug, Deserialize)]
pub struct AtQuery {
    at: Option<i64>,
}

async fn iob(
    Path(account): Path<String>,
    Query(params): Query<AtQuery>,
    State(state): State<AppState>,
) -> Result<Json<IobResult>, ApiError> {
    // ---
    let at = params.at.unwrap_or_else(now_ms);
    info!(%account, at, "GET iob");

    let cfg = &state.config.analytics;
    let profile = state.store.fetch_profile(&account).await?;
    let calculator = IobCalculator::from_config(cfg, profile.as_ref())?;
    let lookback = calculator.lookback_ms();

    let treatments = state
        .store
        .fetch_treatments(&account, at - lookback, at)
        .await?;
    debug!(%account, treatments = treatments.len(), lookback, "computing iob");

    Ok(Json(calculator.calculate(&treatments, profile.as_ref(), at)))
}

async fn tempbasal(
    Path(account): Path<String>,
    Query(params): Query<AtQuery>,
    State(state): State<AppState>,
) -> Result<Json<TempBasalResult>, ApiError> {
    // ---
    let at = params.at.unwrap_or_else(now_ms);
    info!(%account, at, "GET tempbasal");

    let profile = state
        .store
        .fetch_profile(&account)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no profile for account {}", account)))?;
    profile.validate()?;

    // A day back catches long temps and the profile switch in force.
    let treatments = state
        .store
        .fetch_treatments(&account, at - ONE_DAY_MS, at)
        .await?;
    let timeline = BasalTimeline::build(&treatments);

    Ok(Json(timeline.resolve(&profile, at)))
}
