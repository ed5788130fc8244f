//! Configuration loader for the `codemetal-glucoflow` backend service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). The analytics engine itself never reads the
//! environment: it receives an [`AnalyticsConfig`] built here (or by tests)
//! and validated before every computation.
//!
use std::env;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::analytics::decay::InsulinCurve;
use crate::error::ConfigError;
use crate::models::ONE_MINUTE_MS;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional signed integer environment variable with a default value.
macro_rules! parse_env_i32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<i32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional floating point environment variable with a default value.
macro_rules! parse_env_f64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Socket address the HTTP server binds to.
    pub bind_addr: String,

    /// Seconds a rollup may wait on the store before it is cancelled.
    pub fetch_timeout_secs: u32,

    /// Analytics engine parameters.
    pub analytics: AnalyticsConfig,
}

/// Glycemic band boundaries in mg/dL.
///
/// Ordering invariant:
/// `severe_low < low <= target_bottom < target_top <= high < severe_high`,
/// and the tight band must sit inside the target band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlycemicThresholds {
    // ---
    pub severe_low: f64,
    pub low: f64,
    pub target_bottom: f64,
    pub target_top: f64,
    pub tight_target_bottom: f64,
    pub tight_target_top: f64,
    pub high: f64,
    pub severe_high: f64,
}

impl Default for GlycemicThresholds {
    fn default() -> Self {
        // ---
        Self {
            severe_low: 54.0,
            low: 70.0,
            target_bottom: 70.0,
            target_top: 180.0,
            tight_target_bottom: 70.0,
            tight_target_top: 140.0,
            high: 180.0,
            severe_high: 250.0,
        }
    }
}

impl GlycemicThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // ---
        let t = self;
        let ordered = t.severe_low < t.low
            && t.low <= t.target_bottom
            && t.target_bottom < t.target_top
            && t.target_top <= t.high
            && t.high < t.severe_high;
        if !ordered {
            return Err(ConfigError::ThresholdOrder(format!(
                "severeLow {} < low {} <= targetBottom {} < targetTop {} <= high {} < severeHigh {}",
                t.severe_low, t.low, t.target_bottom, t.target_top, t.high, t.severe_high
            )));
        }
        let tight_inside = t.target_bottom <= t.tight_target_bottom
            && t.tight_target_bottom < t.tight_target_top
            && t.tight_target_top <= t.target_top;
        if !tight_inside {
            return Err(ConfigError::ThresholdOrder(format!(
                "tight band {}..{} must lie within target {}..{}",
                t.tight_target_bottom, t.tight_target_top, t.target_bottom, t.target_top
            )));
        }
        Ok(())
    }
}

/// Parameters for every analytics component.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    // ---
    /// Nominal CGM sampling interval, minutes.
    pub interval_minutes: f64,

    pub insulin_curve: InsulinCurve,

    /// Default DIA in hours; an account profile overrides it.
    pub dia_hours: f64,

    /// Peak activity for the exponential curve, minutes.
    pub insulin_peak_minutes: f64,

    pub carb_absorption_minutes: f64,
    pub carb_delay_minutes: f64,

    /// A gap is any inter-reading interval above `gap_factor * interval`.
    pub gap_factor: f64,

    /// Second-difference magnitude (mg/dL) at which the noise score is 0.5.
    pub noise_baseline_mgdl: f64,

    /// Episodes shorter than this are not counted.
    pub min_episode_minutes: f64,

    pub ar2_horizon_points: usize,

    /// Missing samples tolerated before the forecaster resets.
    pub ar2_max_missing: u32,

    pub min_sufficient_readings: usize,

    /// Rollup period lengths in days.
    pub periods_days: Vec<u32>,

    /// Offset used to group readings into local days.
    pub utc_offset_minutes: i32,

    pub thresholds: GlycemicThresholds,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        // ---
        Self {
            interval_minutes: 5.0,
            insulin_curve: InsulinCurve::Bilinear,
            dia_hours: 3.0,
            insulin_peak_minutes: 75.0,
            carb_absorption_minutes: 180.0,
            carb_delay_minutes: 20.0,
            gap_factor: 1.5,
            noise_baseline_mgdl: 10.0,
            min_episode_minutes: 7.5,
            ar2_horizon_points: 3,
            ar2_max_missing: 2,
            min_sufficient_readings: 12,
            periods_days: vec![1, 3, 7, 30, 90],
            utc_offset_minutes: 0,
            thresholds: GlycemicThresholds::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Reject configurations that would produce misleading output.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // ---
        self.thresholds.validate()?;

        let positives = [
            ("interval_minutes", self.interval_minutes),
            ("dia_hours", self.dia_hours),
            ("insulin_peak_minutes", self.insulin_peak_minutes),
            ("carb_absorption_minutes", self.carb_absorption_minutes),
            ("noise_baseline_mgdl", self.noise_baseline_mgdl),
            ("ar2_horizon_points", self.ar2_horizon_points as f64),
        ];
        for (name, value) in positives {
            if !(value > 0.0) || !value.is_finite() {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if !(self.carb_delay_minutes >= 0.0) {
            return Err(ConfigError::NonPositive {
                name: "carb_delay_minutes",
                value: self.carb_delay_minutes,
            });
        }
        if !(self.gap_factor >= 1.0) {
            return Err(ConfigError::NonPositive {
                name: "gap_factor - 1",
                value: self.gap_factor - 1.0,
            });
        }
        if self.periods_days.is_empty() || self.periods_days.contains(&0) {
            return Err(ConfigError::Periods(format!("{:?}", self.periods_days)));
        }
        if self.insulin_curve == InsulinCurve::Exponential {
            self.check_exponential_peak(self.dia_hours)?;
        }
        Ok(())
    }

    /// The exponential curve is only defined while the peak sits before
    /// the midpoint of the action window.
    pub fn check_exponential_peak(&self, dia_hours: f64) -> Result<(), ConfigError> {
        // ---
        let end = dia_hours * 60.0;
        if self.insulin_peak_minutes * 2.0 >= end {
            return Err(ConfigError::PeakTooLate {
                peak: self.insulin_peak_minutes,
                end,
            });
        }
        Ok(())
    }

    pub fn interval_ms(&self) -> i64 {
        (self.interval_minutes * ONE_MINUTE_MS as f64).round() as i64
    }

    pub fn gap_threshold_ms(&self) -> i64 {
        (self.gap_factor * self.interval_minutes * ONE_MINUTE_MS as f64).round() as i64
    }

    pub fn min_episode_ms(&self) -> i64 {
        (self.min_episode_minutes * ONE_MINUTE_MS as f64).round() as i64
    }

    /// Readings older than this (relative to "now") reset the forecaster.
    pub fn ar2_stale_ms(&self) -> i64 {
        self.interval_ms() * (i64::from(self.ar2_max_missing) + 1)
    }

    /// Lookback needed before a window so in-progress decay is captured.
    pub fn treatment_lookback_ms(&self, dia_hours: f64) -> i64 {
        // ---
        let insulin = dia_hours * 60.0;
        let carbs = self.carb_delay_minutes + self.carb_absorption_minutes;
        (insulin.max(carbs) * ONE_MINUTE_MS as f64).ceil() as i64
    }
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Optional:
/// - `DB_POOL_MAX` – max DB connections (default: 5)
/// - `BIND_ADDR` – listen address (default: `0.0.0.0:8080`)
/// - `FETCH_TIMEOUT_SEC` – store fetch budget for rollups (default: 30)
/// - `GLUCOSE_INTERVAL_MIN`, `INSULIN_CURVE`, `DIA_HOURS`, `INSULIN_PEAK_MIN`,
///   `CARB_ABSORPTION_MIN`, `CARB_DELAY_MIN`, `GAP_FACTOR`,
///   `NOISE_BASELINE_MGDL`, `MIN_EPISODE_MIN`, `AR2_HORIZON_POINTS`,
///   `AR2_MAX_MISSING`, `MIN_SUFFICIENT_READINGS`, `ROLLUP_PERIODS`,
///   `UTC_OFFSET_MIN` and the `THRESHOLD_*` family
///
/// Returns an error if any required variable is missing or invalid, or if
/// the resulting analytics configuration fails validation.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env_u32!("DB_POOL_MAX", 5);
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let fetch_timeout_secs = parse_env_u32!("FETCH_TIMEOUT_SEC", 30);

    let defaults = AnalyticsConfig::default();
    let td = defaults.thresholds;

    let insulin_curve = match env::var("INSULIN_CURVE") {
        Ok(raw) => raw.parse::<InsulinCurve>()?,
        Err(_) => defaults.insulin_curve,
    };

    let periods_days = match env::var("ROLLUP_PERIODS") {
        Ok(raw) => parse_periods(&raw)?,
        Err(_) => defaults.periods_days.clone(),
    };

    let thresholds = GlycemicThresholds {
        severe_low: parse_env_f64!("THRESHOLD_SEVERE_LOW", td.severe_low),
        low: parse_env_f64!("THRESHOLD_LOW", td.low),
        target_bottom: parse_env_f64!("THRESHOLD_TARGET_BOTTOM", td.target_bottom),
        target_top: parse_env_f64!("THRESHOLD_TARGET_TOP", td.target_top),
        tight_target_bottom: parse_env_f64!("THRESHOLD_TIGHT_BOTTOM", td.tight_target_bottom),
        tight_target_top: parse_env_f64!("THRESHOLD_TIGHT_TOP", td.tight_target_top),
        high: parse_env_f64!("THRESHOLD_HIGH", td.high),
        severe_high: parse_env_f64!("THRESHOLD_SEVERE_HIGH", td.severe_high),
    };

    let analytics = AnalyticsConfig {
        interval_minutes: parse_env_f64!("GLUCOSE_INTERVAL_MIN", defaults.interval_minutes),
        insulin_curve,
        dia_hours: parse_env_f64!("DIA_HOURS", defaults.dia_hours),
        insulin_peak_minutes: parse_env_f64!("INSULIN_PEAK_MIN", defaults.insulin_peak_minutes),
        carb_absorption_minutes: parse_env_f64!(
            "CARB_ABSORPTION_MIN",
            defaults.carb_absorption_minutes
        ),
        carb_delay_minutes: parse_env_f64!("CARB_DELAY_MIN", defaults.carb_delay_minutes),
        gap_factor: parse_env_f64!("GAP_FACTOR", defaults.gap_factor),
        noise_baseline_mgdl: parse_env_f64!("NOISE_BASELINE_MGDL", defaults.noise_baseline_mgdl),
        min_episode_minutes: parse_env_f64!("MIN_EPISODE_MIN", defaults.min_episode_minutes),
        ar2_horizon_points: parse_env_u32!("AR2_HORIZON_POINTS", defaults.ar2_horizon_points as u32)
            as usize,
        ar2_max_missing: parse_env_u32!("AR2_MAX_MISSING", defaults.ar2_max_missing),
        min_sufficient_readings: parse_env_u32!(
            "MIN_SUFFICIENT_READINGS",
            defaults.min_sufficient_readings as u32
        ) as usize,
        periods_days,
        utc_offset_minutes: parse_env_i32!("UTC_OFFSET_MIN", defaults.utc_offset_minutes),
        thresholds,
    };

    analytics
        .validate()
        .map_err(|e| anyhow!("Invalid analytics configuration: {}", e))?;

    Ok(Config {
        db_url,
        db_pool_max,
        bind_addr,
        fetch_timeout_secs,
        analytics,
    })
}

/// Parse a comma separated list of period lengths in days, e.g. `1,3,7`.
pub fn parse_periods(raw: &str) -> Result<Vec<u32>, ConfigError> {
    // ---
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map_err(|e| ConfigError::Periods(format!("'{}': {}", s, e)))
        })
        .collect()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks sensitive information like database passwords while showing
    /// all configuration values that were loaded.
    pub fn log_config(&self) {
        // ---
        // Mask the password in the database URL for security
        let masked_db_url = if let Some(at_pos) = self.db_url.rfind('@') {
            if let Some(colon_pos) = self.db_url[..at_pos].rfind(':') {
                format!(
                    "{}:****{}",
                    &self.db_url[..colon_pos],
                    &self.db_url[at_pos..]
                )
            } else {
                self.db_url.clone()
            }
        } else {
            self.db_url.clone()
        };

        let a = &self.analytics;
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL      : {}", masked_db_url);
        tracing::info!("  DB_POOL_MAX       : {}", self.db_pool_max);
        tracing::info!("  BIND_ADDR         : {}", self.bind_addr);
        tracing::info!("  FETCH_TIMEOUT_SEC : {}", self.fetch_timeout_secs);
        tracing::info!("  INSULIN_CURVE     : {:?}", a.insulin_curve);
        tracing::info!("  DIA_HOURS         : {}", a.dia_hours);
        tracing::info!("  GLUCOSE_INTERVAL  : {} min", a.interval_minutes);
        tracing::info!("  ROLLUP_PERIODS    : {:?}", a.periods_days);
        tracing::info!("  THRESHOLDS        : {:?}", a.thresholds);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(AnalyticsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_threshold_ordering_rejected() {
        // ---
        let mut cfg = AnalyticsConfig::default();
        cfg.thresholds.severe_low = 75.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrder(_))
        ));

        let mut cfg = AnalyticsConfig::default();
        cfg.thresholds.tight_target_top = 200.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ThresholdOrder(_))
        ));
    }

    #[test]
    fn test_non_positive_parameters_rejected() {
        // ---
        let mut cfg = AnalyticsConfig::default();
        cfg.dia_hours = 0.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NonPositive { name: "dia_hours", .. })
        ));

        let mut cfg = AnalyticsConfig::default();
        cfg.carb_absorption_minutes = -30.0;
        assert!(cfg.validate().is_err());

        let mut cfg = AnalyticsConfig::default();
        cfg.interval_minutes = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_exponential_peak_checked() {
        // ---
        let mut cfg = AnalyticsConfig {
            insulin_curve: InsulinCurve::Exponential,
            ..AnalyticsConfig::default()
        };
        // 3h DIA, 75 min peak: 150 < 180 is fine
        assert!(cfg.validate().is_ok());
        cfg.dia_hours = 2.0;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::PeakTooLate { .. })
        ));
    }

    #[test]
    fn test_parse_periods() {
        // ---
        assert_eq!(parse_periods("1, 3,7").unwrap(), vec![1, 3, 7]);
        assert!(parse_periods("1,x").is_err());
    }

    #[test]
    fn test_derived_durations() {
        // ---
        let cfg = AnalyticsConfig::default();
        assert_eq!(cfg.interval_ms(), 300_000);
        assert_eq!(cfg.gap_threshold_ms(), 450_000);
        assert_eq!(cfg.ar2_stale_ms(), 900_000);
        // carbs (20 + 180 min) outlast a 3h DIA
        assert_eq!(cfg.treatment_lookback_ms(3.0), 200 * 60_000);
    }
}
