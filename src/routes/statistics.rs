//! `GET /api/v1/analytics/{account}/statistics`: multi-period rollups.
//!
//! Served from the statistics cache while every configured period is
//! cached, younger than one sampling interval, and no reading newer than
//! the cached rollups has been stored. Otherwise the rollup is recomputed,
//! persisted and republished. `?refresh=true` forces a recompute.

use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{debug, info};

use super::{now_ms, ApiError, AppState};
use crate::analytics::RollupReport;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/analytics/{account}/statistics", get(statistics))
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default)]
    refresh: bool,
}

async fn statistics(
    Path(account): Path<String>,
    Query(params): Query<StatisticsQuery>,
    State(state): State<AppState>,
) -> Result<Json<RollupReport>, ApiError> {
    // ---
    let now = now_ms();
    let cfg = &state.config.analytics;
    let cache = state.rollups.cache();

    let mut periods = cfg.periods_days.clone();
    periods.sort_unstable();
    periods.dedup();

    if !params.refresh {
        let latest = state.store.latest_reading_mills(&account).await?;
        if let Some(cached) = cache.get_all(&account, &periods, now, cfg.interval_ms()) {
            let as_of = cached.iter().map(|s| s.as_of).min().unwrap_or(now);
            match latest {
                Some(mills) if mills > as_of => {
                    cache.invalidate(&account, mills);
                }
                _ => {
                    debug!(%account, as_of, "statistics served from cache");
                    return Ok(Json(RollupReport {
                        account_id: account,
                        as_of,
                        periods: cached.iter().map(|s| (**s).clone()).collect(),
                    }));
                }
            }
        }
    }

    let timeout = Duration::from_secs(u64::from(state.config.fetch_timeout_secs));
    let report = state
        .rollups
        .refresh(&account, now, tokio::time::sleep(timeout))
        .await?;

    info!(
        %account,
        periods = report.periods.len(),
        sufficient = report.periods.iter().filter(|p| p.has_sufficient_data).count(),
        "GET statistics"
    );
    Ok(Json(report))
}
