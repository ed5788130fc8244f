//! HTTP read surface (EMBP gateway).
//!
//! Sibling modules each export a subrouter; this gateway merges them and
//! attaches the shared [`AppState`]. `main.rs` only calls [`router`].

use std::sync::Arc;

use axum::Router;

use crate::analytics::{
    Ar2Forecaster, Ar2Registry, GlucoseStore, RollupOrchestrator, StatisticsCache,
};
use crate::Config;

mod api_error;
mod forecast;
mod health;
mod iob;
mod statistics;

pub use api_error::ApiError;

// ---

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn GlucoseStore>,
    pub forecasts: Arc<Ar2Registry>,
    pub rollups: Arc<RollupOrchestrator>,
}

impl AppState {
    pub fn new(store: Arc<dyn GlucoseStore>, config: Config) -> Self {
        // ---
        let forecasts = Arc::new(Ar2Registry::new(Ar2Forecaster::from_config(
            &config.analytics,
        )));
        let rollups = Arc::new(RollupOrchestrator::new(
            Arc::clone(&store),
            config.analytics.clone(),
            Arc::new(StatisticsCache::new()),
        ));
        Self {
            config,
            store,
            forecasts,
            rollups,
        }
    }
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(iob::router())
        .merge(forecast::router())
        .merge(statistics::router())
        .merge(health::router())
        .with_state(state)
}

/// Current wall-clock time, epoch ms.
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
