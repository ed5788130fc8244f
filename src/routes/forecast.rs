//! `GET /api/v1/analytics/{account}/forecast`: AR2 short-horizon forecast.
//!
//! Recent readings are fed to the account's forecaster state on every
//! request; readings the state has already seen are ignored, so repeated
//! polling is idempotent.

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::info;

use super::{now_ms, ApiError, AppState};
use crate::analytics::Ar2Forecast;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/analytics/{account}/forecast", get(forecast))
}

async fn forecast(
    Path(account): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Ar2Forecast>, ApiError> {
    // ---
    let now = now_ms();
    let cfg = &state.config.analytics;
    state.config.analytics.validate()?;

    // Two staleness windows are enough to re-seed a reset state.
    let since = now - 2 * cfg.ar2_stale_ms();
    let readings = state.store.fetch_readings(&account, since, now).await?;
    let forecast = state.forecasts.update(&account, &readings, now);

    info!(
        %account,
        readings = readings.len(),
        phase = ?forecast.phase,
        level = forecast.level,
        event = %forecast.event_name,
        "GET forecast"
    );
    Ok(Json(forecast))
}
