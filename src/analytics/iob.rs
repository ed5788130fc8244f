//! Insulin-on-board and carbs-on-board.
//!
//! Each qualifying treatment is weighted by its decay curve at the elapsed
//! time and the contributions are summed. Net temp-basal and combo-bolus
//! insulin enter as 5-minute micro-doses from the [`BasalTimeline`].

use serde::Serialize;
use tracing::{debug, warn};

use crate::analytics::basal::BasalTimeline;
use crate::analytics::decay::{CarbModel, InsulinModel};
use crate::analytics::{finite_or_zero, round_to};
use crate::config::AnalyticsConfig;
use crate::error::{ConfigError, InputDiagnostic};
use crate::models::{ActiveProfile, Treatment, ONE_MINUTE_MS};

// ---

const BASAL_CHUNK_MS: i64 = 5 * ONE_MINUTE_MS;

/// Reference to the most recent bolus, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastBolus {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub mills: i64,
    pub insulin: f64,
}

/// IOB/COB at one instant, serialized with the legacy field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IobResult {
    // ---
    pub mills: i64,
    /// `bolusiob + basaliob`, units.
    pub iob: f64,
    #[serde(rename = "bolusiob")]
    pub bolus_iob: f64,
    /// Net temp-basal/combo insulin on board; negative for low temps.
    #[serde(rename = "basaliob")]
    pub basal_iob: f64,
    /// Insulin acting now, U/min.
    pub activity: f64,
    /// Grams of carbs not yet absorbed.
    pub cob: f64,
    /// Carbs absorbing now, g/min.
    pub carb_activity: f64,
    pub last_bolus: Option<LastBolus>,
    /// Device or user that entered the last bolus.
    pub source: Option<String>,
    pub display: String,
    pub display_line: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<InputDiagnostic>,
}

/// Convolves treatments against insulin and carb decay curves.
#[derive(Debug, Clone, Copy)]
pub struct IobCalculator {
    insulin: InsulinModel,
    carbs: CarbModel,
    /// Profile absorption rate, g/h. Sets each meal's absorption time.
    carbs_per_hour: Option<f64>,
}

impl IobCalculator {
    pub fn new(insulin: InsulinModel, carbs: CarbModel) -> Self {
        // ---
        Self {
            insulin,
            carbs,
            carbs_per_hour: None,
        }
    }

    /// Absorb each meal at a fixed rate instead of over a fixed time.
    /// The time stays capped at the carb model's absorption window.
    pub fn with_carb_rate(mut self, grams_per_hour: f64) -> Self {
        self.carbs_per_hour = Some(grams_per_hour);
        self
    }

    /// Build from configuration.
    ///
    /// A profile's DIA overrides the default duration of action, its
    /// `delay` overrides the carb delay and its `carbsHr` sets the
    /// absorption rate.
    pub fn from_config(
        config: &AnalyticsConfig,
        profile: Option<&ActiveProfile>,
    ) -> Result<Self, ConfigError> {
        // ---
        config.validate()?;
        let (dia_hours, carb_delay, carb_rate) = match profile {
            Some(p) => {
                p.validate()?;
                (p.dia, p.delay, Some(p.carbs_hr))
            }
            None => (config.dia_hours, config.carb_delay_minutes, None),
        };
        if config.insulin_curve == crate::analytics::decay::InsulinCurve::Exponential {
            config.check_exponential_peak(dia_hours)?;
        }

        let calculator = Self::new(
            InsulinModel::new(config.insulin_curve, dia_hours, config.insulin_peak_minutes),
            CarbModel::new(config.insulin_curve, config.carb_absorption_minutes, carb_delay),
        );
        Ok(match carb_rate {
            Some(rate) => calculator.with_carb_rate(rate),
            None => calculator,
        })
    }

    pub fn insulin_model(&self) -> &InsulinModel {
        &self.insulin
    }

    pub fn carb_model(&self) -> &CarbModel {
        &self.carbs
    }

    /// Treatment history needed before `at` to capture every active dose.
    pub fn lookback_ms(&self) -> i64 {
        // ---
        let minutes = self.insulin.action_minutes().max(self.carbs.action_minutes());
        (minutes * ONE_MINUTE_MS as f64).ceil() as i64
    }

    /// Carb curve for one meal of `grams`.
    fn meal_model(&self, grams: f64) -> CarbModel {
        // ---
        match self.carbs_per_hour {
            Some(rate) if rate > 0.0 => CarbModel {
                absorption_minutes: (grams / rate * 60.0).min(self.carbs.absorption_minutes),
                ..self.carbs
            },
            _ => self.carbs,
        }
    }

    /// Compute IOB/COB at `at` (epoch ms).
    ///
    /// Treatments after `at` are ignored; one at exactly `at` contributes
    /// its full amount. Records with bad timestamps are skipped and listed
    /// in `diagnostics`.
    pub fn calculate(
        &self,
        treatments: &[Treatment],
        profile: Option<&ActiveProfile>,
        at: i64,
    ) -> IobResult {
        // ---
        let insulin_window = self.insulin.action_minutes();

        let mut diagnostics = Vec::new();
        let mut bolus_iob = 0.0;
        let mut activity = 0.0;
        let mut cob = 0.0;
        let mut carb_activity = 0.0;
        let mut last: Option<(&Treatment, i64, f64)> = None;

        for (index, t) in treatments.iter().enumerate() {
            let units = t.bolus_units();
            let grams = t.carb_grams();
            if units <= 0.0 && grams <= 0.0 {
                continue;
            }
            let ts = match t.timestamp() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(index, id = ?t.id, error = %e, "skipping treatment with bad timestamp");
                    diagnostics.push(InputDiagnostic::new(index, t.id.as_deref(), &e));
                    continue;
                }
            };
            if ts > at {
                continue;
            }
            let elapsed = (at - ts) as f64 / ONE_MINUTE_MS as f64;

            if units > 0.0 {
                if last.map_or(true, |(_, last_ts, _)| ts >= last_ts) {
                    last = Some((t, ts, units));
                }
                if elapsed < insulin_window {
                    let point = self.insulin.at(elapsed);
                    bolus_iob += units * point.iob;
                    activity += units * point.activity;
                }
            }
            let meal = self.meal_model(grams);
            if grams > 0.0 && elapsed < meal.action_minutes() {
                let point = meal.at(elapsed);
                cob += grams * point.iob;
                carb_activity += grams * point.activity;
            }
        }

        let mut basal_iob = 0.0;
        if let Some(profile) = profile {
            let timeline = BasalTimeline::build(treatments);
            let lookback = (insulin_window * ONE_MINUTE_MS as f64).ceil() as i64;
            let doses = timeline.net_basal_doses(profile, at - lookback, at, BASAL_CHUNK_MS);
            for (mid, units) in doses {
                let elapsed = (at - mid) as f64 / ONE_MINUTE_MS as f64;
                let point = self.insulin.at(elapsed);
                basal_iob += units * point.iob;
                activity += units * point.activity;
            }
            diagnostics.extend(timeline.diagnostics().iter().cloned());
        }
        diagnostics.sort_by_key(|d| d.index);
        diagnostics.dedup_by_key(|d| d.index);

        let bolus_iob = finite_or_zero(bolus_iob);
        let basal_iob = finite_or_zero(basal_iob);
        let iob = bolus_iob + basal_iob;
        let display = format!("{:.2}", round_to(iob, 2));

        debug!(at, iob, cob, skipped = diagnostics.len(), "iob computed");

        IobResult {
            mills: at,
            iob,
            bolus_iob,
            basal_iob,
            activity: finite_or_zero(activity),
            cob: finite_or_zero(cob),
            carb_activity: finite_or_zero(carb_activity),
            last_bolus: last.map(|(t, ts, units)| LastBolus {
                id: t.id.clone(),
                mills: ts,
                insulin: units,
            }),
            source: last.and_then(|(t, _, _)| t.entered_by.clone()),
            display_line: format!("IOB: {}U", display),
            display,
            diagnostics,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::analytics::decay::InsulinCurve;

    const T0: i64 = 1_700_000_000_000;

    fn create_test_bolus(offset_min: i64, units: f64) -> Treatment {
        // ---
        Treatment {
            id: Some(format!("bolus-{}", offset_min)),
            event_type: "Correction Bolus".to_string(),
            mills: Some(T0 + offset_min * ONE_MINUTE_MS),
            insulin: Some(units),
            entered_by: Some("pump-x".to_string()),
            ..Default::default()
        }
    }

    fn calculator() -> IobCalculator {
        IobCalculator::from_config(&AnalyticsConfig::default(), None).unwrap()
    }

    #[test]
    fn test_single_bolus_decays_to_zero() {
        // ---
        let calc = calculator();
        let treatments = vec![create_test_bolus(0, 5.0)];

        let at_start = calc.calculate(&treatments, None, T0);
        assert_eq!(at_start.iob, 5.0);

        let mid = calc.calculate(&treatments, None, T0 + 90 * ONE_MINUTE_MS);
        assert!(mid.iob > 0.0 && mid.iob < 5.0);

        let mut prev = mid.iob;
        for minute in (95..=180).step_by(5) {
            let r = calc.calculate(&treatments, None, T0 + minute * ONE_MINUTE_MS);
            assert!(r.iob <= prev);
            prev = r.iob;
        }
        assert_eq!(prev, 0.0);
    }

    #[test]
    fn test_future_treatments_excluded() {
        // ---
        let calc = calculator();
        let treatments = vec![create_test_bolus(0, 2.0), create_test_bolus(30, 4.0)];
        let r = calc.calculate(&treatments, None, T0 + 10 * ONE_MINUTE_MS);
        assert!(r.iob <= 2.0);
        assert_eq!(r.last_bolus.as_ref().map(|b| b.insulin), Some(2.0));
    }

    #[test]
    fn test_last_bolus_and_source() {
        // ---
        let calc = calculator();
        let treatments = vec![create_test_bolus(20, 1.0), create_test_bolus(0, 3.0)];
        let r = calc.calculate(&treatments, None, T0 + 25 * ONE_MINUTE_MS);
        let last = r.last_bolus.unwrap();
        assert_eq!(last.mills, T0 + 20 * ONE_MINUTE_MS);
        assert_eq!(r.source.as_deref(), Some("pump-x"));
        assert!(r.display_line.starts_with("IOB: "));
    }

    #[test]
    fn test_carbs_on_board() {
        // ---
        let calc = calculator();
        let meal = Treatment {
            event_type: "Meal Bolus".to_string(),
            mills: Some(T0),
            carbs: Some(60.0),
            ..Default::default()
        };
        let r = calc.calculate(&[meal.clone()], None, T0 + 10 * ONE_MINUTE_MS);
        assert_eq!(r.cob, 60.0);
        assert_eq!(r.carb_activity, 0.0);

        let r = calc.calculate(&[meal], None, T0 + 110 * ONE_MINUTE_MS);
        assert!((r.cob - 30.0).abs() < 1e-9);
        assert_eq!(r.iob, 0.0);
    }

    #[test]
    fn test_bad_records_are_skipped() {
        // ---
        let calc = calculator();
        let mut broken = create_test_bolus(0, 10.0);
        broken.mills = None;
        let treatments = vec![broken, create_test_bolus(0, 1.0)];
        let r = calc.calculate(&treatments, None, T0);
        assert_eq!(r.iob, 1.0);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].id.as_deref(), Some("bolus-0"));
    }

    #[test]
    fn test_low_temp_gives_negative_basal_iob() {
        // ---
        let calc = calculator();
        let profile = ActiveProfile::with_flat_basal(3.0, 1.0);
        let zero_temp = Treatment {
            event_type: "Temp Basal".to_string(),
            mills: Some(T0),
            duration: Some(60.0),
            absolute: Some(0.0),
            ..Default::default()
        };
        let r = calc.calculate(&[zero_temp], Some(&profile), T0 + 60 * ONE_MINUTE_MS);
        assert!(r.basal_iob < 0.0);
        assert!(r.basal_iob > -1.0);
        assert_eq!(r.bolus_iob, 0.0);
    }

    #[test]
    fn test_profile_dia_overrides_default() {
        // ---
        let profile = ActiveProfile::with_flat_basal(5.0, 1.0);
        let calc = IobCalculator::from_config(&AnalyticsConfig::default(), Some(&profile)).unwrap();
        assert_eq!(calc.insulin_model().dia_hours, 5.0);

        let bad = ActiveProfile::with_flat_basal(0.0, 1.0);
        assert!(IobCalculator::from_config(&AnalyticsConfig::default(), Some(&bad)).is_err());

        let exp = AnalyticsConfig {
            insulin_curve: InsulinCurve::Exponential,
            ..AnalyticsConfig::default()
        };
        let short = ActiveProfile::with_flat_basal(2.0, 1.0);
        assert!(IobCalculator::from_config(&exp, Some(&short)).is_err());
    }

    #[test]
    fn test_profile_carb_parameters_shape_cob() {
        // ---
        let meal = Treatment {
            event_type: "Carb Correction".to_string(),
            mills: Some(T0),
            carbs: Some(60.0),
            ..Default::default()
        };
        let at = T0 + 30 * ONE_MINUTE_MS;
        let cfg = AnalyticsConfig::default();

        // Config only: 20 min delay, 10 of 180 min absorbed
        assert_eq!(calculator().lookback_ms(), 200 * ONE_MINUTE_MS);
        let plain = calculator().calculate(&[meal.clone()], None, at);
        assert!((plain.cob - 60.0 * (1.0 - 10.0 / 180.0)).abs() < 1e-9);

        // 60 g/h, no delay: half of a one-hour absorption
        let mut fast = ActiveProfile::with_flat_basal(3.0, 0.0);
        fast.carbs_hr = 60.0;
        fast.delay = 0.0;
        let calc = IobCalculator::from_config(&cfg, Some(&fast)).unwrap();
        assert_eq!(calc.carb_model().delay_minutes, 0.0);
        let r = calc.calculate(&[meal.clone()], Some(&fast), at);
        assert!((r.cob - 30.0).abs() < 1e-9);
        let done = calc.calculate(&[meal.clone()], Some(&fast), T0 + 60 * ONE_MINUTE_MS);
        assert_eq!(done.cob, 0.0);

        // Slow rates are capped at the configured absorption window
        let mut slow = fast.clone();
        slow.carbs_hr = 10.0;
        let calc = IobCalculator::from_config(&cfg, Some(&slow)).unwrap();
        let r = calc.calculate(&[meal.clone()], Some(&slow), at);
        assert!((r.cob - 60.0 * (1.0 - 30.0 / 180.0)).abs() < 1e-9);

        let mut broken = fast;
        broken.delay = -5.0;
        assert!(IobCalculator::from_config(&cfg, Some(&broken)).is_err());
    }
}
