//! Treatment totals for a rollup window.

use serde::Serialize;
use tracing::warn;

use crate::analytics::basal::BasalTimeline;
use crate::analytics::{finite_or_zero, round_to};
use crate::error::InputDiagnostic;
use crate::models::{ActiveProfile, EventKind, Treatment, ONE_DAY_MS};

// ---

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentSummary {
    // ---
    /// Grams.
    pub total_carbs: f64,
    pub total_protein: f64,
    pub total_fat: f64,
    /// Units delivered as boluses, including combo immediate portions.
    pub total_bolus: f64,
    /// Units delivered by scheduled basal, temp basals and combo extensions.
    pub total_basal: f64,
    pub total_insulin: f64,
    pub basal_percent: f64,
    pub bolus_percent: f64,
    /// `total_basal / total_bolus`; 0 without boluses.
    pub basal_bolus_ratio: f64,
    pub bolus_count: usize,
    pub carb_entry_count: usize,
    pub temp_basal_count: usize,
    pub daily_average_insulin: f64,
    pub daily_average_carbs: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<InputDiagnostic>,
}

/// Sum treatments whose timestamp falls in `[start, end]`.
///
/// Basal insulin is integrated over the window from the temp-basal
/// timeline, so `treatments` may include a lookback before `start`. Without
/// a profile only temp basals with an absolute rate and combo extensions
/// count toward basal.
pub fn summarize(
    treatments: &[Treatment],
    profile: Option<&ActiveProfile>,
    start: i64,
    end: i64,
) -> TreatmentSummary {
    // ---
    let mut out = TreatmentSummary::default();

    for (index, t) in treatments.iter().enumerate() {
        let ts = match t.timestamp() {
            Ok(ts) => ts,
            Err(e) => {
                warn!(index, id = ?t.id, error = %e, "treatment skipped from summary");
                out.diagnostics.push(InputDiagnostic::new(index, t.id.as_deref(), &e));
                continue;
            }
        };
        if ts < start || ts > end {
            continue;
        }

        let units = t.bolus_units();
        if units > 0.0 {
            out.total_bolus += units;
            out.bolus_count += 1;
        }
        let grams = t.carb_grams();
        if grams > 0.0 {
            out.total_carbs += grams;
            out.carb_entry_count += 1;
        }
        out.total_protein += t.protein.unwrap_or(0.0).max(0.0);
        out.total_fat += t.fat.unwrap_or(0.0).max(0.0);
        if t.kind() == EventKind::TempBasal && t.duration_ms() > 0 {
            out.temp_basal_count += 1;
        }
    }

    let timeline = BasalTimeline::build(treatments);
    let unscheduled;
    let profile = match profile {
        Some(p) => p,
        None => {
            unscheduled = ActiveProfile::with_flat_basal(1.0, 0.0);
            &unscheduled
        }
    };
    out.total_basal = timeline.delivered(profile, start, end).total;
    out.total_insulin = out.total_basal + out.total_bolus;

    if out.total_insulin > 0.0 {
        out.basal_percent = round_to(out.total_basal / out.total_insulin * 100.0, 1);
        out.bolus_percent = round_to(out.total_bolus / out.total_insulin * 100.0, 1);
    }
    if out.total_bolus > 0.0 {
        out.basal_bolus_ratio = round_to(out.total_basal / out.total_bolus, 2);
    }

    let days = (end - start) as f64 / ONE_DAY_MS as f64;
    if days > 0.0 {
        out.daily_average_insulin = round_to(out.total_insulin / days, 2);
        out.daily_average_carbs = round_to(out.total_carbs / days, 1);
    }

    out.total_basal = round_to(finite_or_zero(out.total_basal), 2);
    out.total_bolus = round_to(out.total_bolus, 2);
    out.total_insulin = round_to(out.total_insulin, 2);
    out
}
