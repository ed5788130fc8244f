//! Second-order autoregressive glucose forecaster.
//!
//! The model works in `ln(mgdl / 140)` space: `next = a0 * prev + a1 * curr`.
//! Each account owns an [`Ar2State`]; the [`Ar2Registry`] hands out one
//! lock per account so concurrent requests for the same account serialize
//! their updates while different accounts never contend.
//!
//! ```text
//!   Idle ──(2 fresh readings)──► WarmedUp ──(forecast)──► Forecasting
//!    ▲                                                        │
//!    └────────────(stale reading, gap, invalid value)─────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::analytics::{finite_or_zero, round_to};
use crate::config::AnalyticsConfig;
use crate::models::GlucoseReading;

// ---

const BG_REF: f64 = 140.0;
const BG_MIN: f64 = 36.0;
const BG_MAX: f64 = 400.0;
/// Reference point of the loss function.
const LOSS_TARGET: f64 = 120.0;
pub const WARN_THRESHOLD: f64 = 0.05;
pub const URGENT_THRESHOLD: f64 = 0.10;
/// Squared prediction errors kept for `predictionMse`.
const ERROR_WINDOW: usize = 12;
/// Staleness periods after which an idle account's state is dropped.
pub const IDLE_STALE_MULTIPLE: i64 = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ar2Coefficients {
    pub prev: f64,
    pub curr: f64,
}

impl Default for Ar2Coefficients {
    fn default() -> Self {
        Self {
            prev: -0.723,
            curr: 1.716,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Ar2Phase {
    #[default]
    Idle,
    WarmedUp,
    Forecasting,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub mills: i64,
    pub mgdl: f64,
    pub color: &'static str,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ar2Forecast {
    // ---
    pub phase: Ar2Phase,
    pub predicted: Vec<ForecastPoint>,
    pub avg_loss: f64,
    /// 0 none, 1 warn, 2 urgent.
    pub level: u8,
    /// `High`, `Low` or empty.
    pub event_name: String,
    /// Rolling mean squared error of earlier predictions, mg/dL^2.
    pub prediction_mse: Option<f64>,
}

/// Fixed parameters of the forecaster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ar2Forecaster {
    pub coefficients: Ar2Coefficients,
    pub horizon: usize,
    pub interval_ms: i64,
    pub stale_ms: i64,
    pub low: f64,
    pub high: f64,
}

impl Ar2Forecaster {
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        // ---
        Self {
            coefficients: Ar2Coefficients::default(),
            horizon: config.ar2_horizon_points,
            interval_ms: config.interval_ms(),
            stale_ms: config.ar2_stale_ms(),
            low: config.thresholds.low,
            high: config.thresholds.high,
        }
    }

    fn color(&self, mgdl: f64) -> &'static str {
        // ---
        if mgdl < self.low {
            "red"
        } else if mgdl > self.high {
            "yellow"
        } else {
            "cyan"
        }
    }
}

/// Rolling per-account forecasting state.
#[derive(Debug, Clone, Default)]
pub struct Ar2State {
    // ---
    phase: Ar2Phase,
    last_mills: Option<i64>,
    prev: Option<f64>,
    curr: Option<f64>,
    last_forecast_at: Option<i64>,
    predicted: Vec<ForecastPoint>,
    errors: VecDeque<f64>,
}

impl Ar2State {
    pub fn phase(&self) -> Ar2Phase {
        self.phase
    }

    pub fn last_forecast_at(&self) -> Option<i64> {
        self.last_forecast_at
    }

    /// Latest instant the state saw a reading or produced a forecast.
    pub fn last_active(&self) -> Option<i64> {
        self.last_mills.max(self.last_forecast_at)
    }

    pub fn reset(&mut self) {
        // ---
        self.phase = Ar2Phase::Idle;
        self.prev = None;
        self.curr = None;
        self.predicted.clear();
    }

    fn prediction_mse(&self) -> Option<f64> {
        // ---
        if self.errors.is_empty() {
            return None;
        }
        let mse = self.errors.iter().sum::<f64>() / self.errors.len() as f64;
        Some(round_to(mse, 1))
    }

    /// Fold a new reading into the state. Readings not newer than the last
    /// one are ignored.
    pub fn observe(&mut self, reading: &GlucoseReading, model: &Ar2Forecaster) {
        // ---
        if self.last_mills.is_some_and(|last| reading.mills <= last) {
            return;
        }

        let tolerance = model.interval_ms / 2;
        if let Some(p) = self
            .predicted
            .iter()
            .find(|p| (p.mills - reading.mills).abs() <= tolerance)
        {
            self.errors.push_back((reading.mgdl - p.mgdl).powi(2));
            while self.errors.len() > ERROR_WINDOW {
                self.errors.pop_front();
            }
        }

        let gap = self.last_mills.map(|last| reading.mills - last);
        self.last_mills = Some(reading.mills);

        if gap.is_some_and(|g| g > model.stale_ms) {
            debug!(gap_ms = gap, "forecaster reset after gap");
            self.reset();
        }
        if !(reading.mgdl >= BG_MIN) {
            self.reset();
            return;
        }

        self.prev = self.curr;
        self.curr = Some((reading.mgdl / BG_REF).ln());
        self.phase = if self.prev.is_some() {
            Ar2Phase::WarmedUp
        } else {
            Ar2Phase::Idle
        };
    }

    /// Project forward from the current state.
    ///
    /// Returns an empty Idle forecast when fewer than two fresh readings
    /// are held or the latest reading is older than the staleness limit.
    pub fn forecast(&mut self, now: i64, model: &Ar2Forecaster) -> Ar2Forecast {
        // ---
        let stale = self.last_mills.map_or(true, |last| now - last > model.stale_ms);
        if stale {
            self.reset();
        }
        let (Some(mut prev), Some(mut curr), Some(last)) = (self.prev, self.curr, self.last_mills)
        else {
            return Ar2Forecast {
                prediction_mse: self.prediction_mse(),
                ..Ar2Forecast::default()
            };
        };

        let mut predicted = Vec::with_capacity(model.horizon);
        let mut at = last;
        for _ in 0..model.horizon {
            let next = model.coefficients.prev * prev + model.coefficients.curr * curr;
            prev = curr;
            curr = next;
            at += model.interval_ms;
            let mgdl = (BG_REF * curr.exp()).round().clamp(BG_MIN, BG_MAX);
            predicted.push(ForecastPoint {
                mills: at,
                mgdl,
                color: model.color(mgdl),
            });
        }

        let avg_loss = if predicted.is_empty() {
            0.0
        } else {
            let total: f64 = predicted
                .iter()
                .map(|p| (p.mgdl / LOSS_TARGET).log10().powi(2))
                .sum();
            finite_or_zero(total / predicted.len() as f64)
        };

        let event_name = match predicted.first() {
            Some(p) if p.mgdl > model.high => "High",
            Some(p) if p.mgdl < model.low => "Low",
            _ => "",
        };
        let level = if event_name.is_empty() {
            0
        } else if avg_loss > URGENT_THRESHOLD {
            2
        } else if avg_loss > WARN_THRESHOLD {
            1
        } else {
            0
        };

        self.predicted = predicted.clone();
        self.last_forecast_at = Some(now);
        self.phase = Ar2Phase::Forecasting;

        Ar2Forecast {
            phase: self.phase,
            predicted,
            avg_loss: round_to(avg_loss, 4),
            level,
            event_name: event_name.to_string(),
            prediction_mse: self.prediction_mse(),
        }
    }
}

/// Account-keyed forecaster states with one writer per account.
#[derive(Debug)]
pub struct Ar2Registry {
    model: Ar2Forecaster,
    states: Mutex<HashMap<String, Arc<Mutex<Ar2State>>>>,
}

impl Ar2Registry {
    pub fn new(model: Ar2Forecaster) -> Self {
        // ---
        Self {
            model,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Drop states idle for longer than [`IDLE_STALE_MULTIPLE`] staleness
    /// periods. States locked by a running update are kept.
    pub fn evict_idle(&self, now: i64) -> usize {
        // ---
        let limit = self.model.stale_ms.saturating_mul(IDLE_STALE_MULTIPLE);
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|_, state| match state.try_lock() {
            Some(s) => s.last_active().is_some_and(|t| now - t <= limit),
            None => true,
        });
        let evicted = before - states.len();
        if evicted > 0 {
            debug!(evicted, remaining = states.len(), "evicted idle forecaster states");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }

    fn state_for(&self, account: &str) -> Arc<Mutex<Ar2State>> {
        // ---
        let mut states = self.states.lock();
        states
            .entry(account.to_string())
            .or_insert_with(|| {
                info!(account, "creating forecaster state");
                Arc::new(Mutex::new(Ar2State::default()))
            })
            .clone()
    }

    /// Feed readings (any order) and forecast as of `now`.
    pub fn update(&self, account: &str, readings: &[GlucoseReading], now: i64) -> Ar2Forecast {
        // ---
        self.evict_idle(now);
        let state = self.state_for(account);
        let mut state = state.lock();

        let mut ordered: Vec<&GlucoseReading> = readings.iter().collect();
        ordered.sort_by_key(|r| r.mills);
        for r in ordered {
            state.observe(r, &self.model);
        }
        state.forecast(now, &self.model)
    }

    pub fn phase(&self, account: &str) -> Ar2Phase {
        self.state_for(account).lock().phase()
    }

    pub fn reset(&self, account: &str) {
        self.state_for(account).lock().reset();
    }
}
