//! Glycemic variability and risk indices.
//!
//! All functions take an ascending series in mg/dL and return 0 for fewer
//! than two readings or whenever a denominator would be zero.
//!
//! | Index | Formula |
//! |-------|---------|
//! | CV | `SD / mean * 100` |
//! | MAGE | mean of turning-point excursions larger than 1 SD, first-excursion direction |
//! | CONGA(1h) | SD of `G(t) - G(t - 1h)` |
//! | LBGI / HBGI | mean of `10 f(G)^2` split by the sign of `f(G) = a (ln(G)^b - c)` |
//! | ADRR | mean over days of `max rl + max rh` |
//! | Lability Index | `sum (dG_mmol)^2 / dt_h` over hourly pairs, per week |
//! | J-Index | `0.001 (mean + SD)^2` |
//! | GVI | path length / idealized path length |
//! | PGS | `GVI * mean * (1 - TIR)` |
//! | eA1C | `(mean + 46.7) / 28.7` |
//! | GMI | `3.31 + 0.02392 mean` |

use std::collections::BTreeMap;

use serde::Serialize;

use crate::analytics::stats::mean_and_sd;
use crate::analytics::{finite_or_zero, ordered, round_to};
use crate::models::{GlucoseReading, ONE_DAY_MS, ONE_HOUR_MS, ONE_MINUTE_MS};

// ---

pub const MGDL_PER_MMOL: f64 = 18.0182;

/// Symmetrization constants of the risk transform, per glucose unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskConstants {
    pub scale: f64,
    pub exponent: f64,
    pub offset: f64,
}

pub const RISK_MGDL: RiskConstants = RiskConstants {
    scale: 1.509,
    exponent: 1.084,
    offset: 5.381,
};

pub const RISK_MMOL: RiskConstants = RiskConstants {
    scale: 1.794,
    exponent: 1.026,
    offset: 1.861,
};

/// PGS literature cut points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PgsCategory {
    #[default]
    Excellent,
    Good,
    Poor,
    VeryPoor,
}

impl PgsCategory {
    pub fn of(pgs: f64) -> Self {
        // ---
        if pgs <= 35.0 {
            Self::Excellent
        } else if pgs <= 100.0 {
            Self::Good
        } else if pgs <= 150.0 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlycemicVariability {
    // ---
    pub cv: f64,
    pub mage: f64,
    pub conga: f64,
    pub adrr: f64,
    pub lability_index: f64,
    pub j_index: f64,
    pub hbgi: f64,
    pub lbgi: f64,
    pub gvi: f64,
    pub pgs: f64,
    pub pgs_category: PgsCategory,
    #[serde(rename = "estimatedA1c")]
    pub estimated_a1c: f64,
    pub gmi: f64,
}

/// Compute every index.
///
/// `target_fraction` is the time-in-target share in [0, 1] used by PGS.
pub fn glycemic_variability(
    readings: &[GlucoseReading],
    target_fraction: f64,
    interval_ms: i64,
    utc_offset_minutes: i32,
) -> GlycemicVariability {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.len() < 2 {
        return GlycemicVariability::default();
    }
    let values: Vec<f64> = readings.iter().map(|r| r.mgdl).collect();
    let (mean, sd) = mean_and_sd(&values);
    let (lbgi, hbgi) = risk_indices(&values, RISK_MGDL);
    let gvi = gvi(readings);
    let pgs = pgs(gvi, mean, target_fraction);

    GlycemicVariability {
        cv: coefficient_of_variation(&values),
        mage: mage(&values),
        conga: conga(readings, ONE_HOUR_MS, interval_ms),
        adrr: adrr(readings, utc_offset_minutes),
        lability_index: lability_index(readings, interval_ms),
        j_index: j_index(mean, sd),
        hbgi,
        lbgi,
        gvi,
        pgs,
        pgs_category: PgsCategory::of(pgs),
        estimated_a1c: estimated_a1c(mean, values.len()),
        gmi: gmi(mean, values.len()),
    }
}

pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    // ---
    if values.len() < 2 {
        return 0.0;
    }
    let (mean, sd) = mean_and_sd(values);
    if mean == 0.0 {
        return 0.0;
    }
    round_to(sd / mean * 100.0, 1)
}

/// Mean amplitude of glycemic excursions.
pub fn mage(values: &[f64]) -> f64 {
    // ---
    if values.len() < 2 {
        return 0.0;
    }
    let (_, sd) = mean_and_sd(values);
    if sd == 0.0 {
        return 0.0;
    }

    // Collapse plateaus, then keep the endpoints and every local extremum.
    let mut flat: Vec<f64> = Vec::with_capacity(values.len());
    for &v in values {
        if flat.last() != Some(&v) {
            flat.push(v);
        }
    }
    let mut turning = vec![flat[0]];
    for w in flat.windows(3) {
        let (a, b, c) = (w[0], w[1], w[2]);
        if (b > a && b > c) || (b < a && b < c) {
            turning.push(b);
        }
    }
    if flat.len() > 1 {
        turning.push(flat[flat.len() - 1]);
    }

    let excursions: Vec<f64> = turning.windows(2).map(|w| w[1] - w[0]).collect();
    let Some(first) = excursions.iter().find(|e| e.abs() > sd) else {
        return 0.0;
    };
    let rising = *first > 0.0;
    let counted: Vec<f64> = excursions
        .iter()
        .filter(|e| e.abs() > sd && (**e > 0.0) == rising)
        .map(|e| e.abs())
        .collect();
    if counted.is_empty() {
        return 0.0;
    }
    round_to(counted.iter().sum::<f64>() / counted.len() as f64, 1)
}

/// Continuous overall net glycemic action at lag `lag_ms`.
///
/// A reading pairs with the one closest to `t - lag` within half an
/// interval; the result is the sample SD of the paired differences.
pub fn conga(readings: &[GlucoseReading], lag_ms: i64, interval_ms: i64) -> f64 {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.len() < 2 {
        return 0.0;
    }
    let tolerance = interval_ms / 2;
    let mut diffs = Vec::new();
    for r in readings {
        let want = r.mills - lag_ms;
        let idx = readings.partition_point(|x| x.mills < want);
        let candidates = [idx.checked_sub(1), Some(idx)];
        let best = candidates
            .iter()
            .flatten()
            .filter_map(|&i| readings.get(i))
            .filter(|x| (x.mills - want).abs() <= tolerance)
            .min_by_key(|x| (x.mills - want).abs());
        if let Some(earlier) = best {
            diffs.push(r.mgdl - earlier.mgdl);
        }
    }
    if diffs.len() < 2 {
        return 0.0;
    }
    let n = diffs.len() as f64;
    let mean = diffs.iter().sum::<f64>() / n;
    let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
    round_to(var.sqrt(), 1)
}

/// Symmetrized BG risk `f(G)`; negative below ~112.5 mg/dL.
pub fn risk_transform(glucose: f64, k: RiskConstants) -> f64 {
    // ---
    if glucose <= 1.0 {
        return -k.scale * k.offset;
    }
    k.scale * (glucose.ln().powf(k.exponent) - k.offset)
}

/// `(rl, rh)` components of `10 f(G)^2`.
fn risk_split(glucose: f64, k: RiskConstants) -> (f64, f64) {
    // ---
    let f = risk_transform(glucose, k);
    let r = 10.0 * f * f;
    if f < 0.0 {
        (r, 0.0)
    } else {
        (0.0, r)
    }
}

/// `(LBGI, HBGI)`.
pub fn risk_indices(values: &[f64], k: RiskConstants) -> (f64, f64) {
    // ---
    if values.len() < 2 {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let (rl, rh) = values.iter().fold((0.0, 0.0), |(l, h), v| {
        let (a, b) = risk_split(*v, k);
        (l + a, h + b)
    });
    (round_to(rl / n, 2), round_to(rh / n, 2))
}

/// Average daily risk range, days grouped in local time.
pub fn adrr(readings: &[GlucoseReading], utc_offset_minutes: i32) -> f64 {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.len() < 2 {
        return 0.0;
    }
    let offset = i64::from(utc_offset_minutes) * ONE_MINUTE_MS;
    let mut days: BTreeMap<i64, (f64, f64)> = BTreeMap::new();
    for r in readings {
        let day = (r.mills + offset).div_euclid(ONE_DAY_MS);
        let (rl, rh) = risk_split(r.mgdl, RISK_MGDL);
        let entry = days.entry(day).or_insert((0.0, 0.0));
        entry.0 = entry.0.max(rl);
        entry.1 = entry.1.max(rh);
    }
    let total: f64 = days.values().map(|(lr, hr)| lr + hr).sum();
    round_to(total / days.len() as f64, 2)
}

/// Lability index in (mmol/L)^2 / h per week.
///
/// Readings are thinned to one per hour; pairs further apart than an hour
/// plus two sampling intervals are skipped.
pub fn lability_index(readings: &[GlucoseReading], interval_ms: i64) -> f64 {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.len() < 2 {
        return 0.0;
    }
    let mut hourly: Vec<&GlucoseReading> = Vec::new();
    for r in readings {
        match hourly.last() {
            Some(last) if r.mills - last.mills < ONE_HOUR_MS => {}
            _ => hourly.push(r),
        }
    }

    let max_dt = ONE_HOUR_MS + 2 * interval_ms;
    let mut sum = 0.0;
    let mut covered_hours = 0.0;
    for pair in hourly.windows(2) {
        let dt = pair[1].mills - pair[0].mills;
        if dt <= 0 || dt > max_dt {
            continue;
        }
        let dt_h = dt as f64 / ONE_HOUR_MS as f64;
        let dg = (pair[1].mgdl - pair[0].mgdl) / MGDL_PER_MMOL;
        sum += dg * dg / dt_h;
        covered_hours += dt_h;
    }
    if covered_hours == 0.0 {
        return 0.0;
    }
    round_to(sum * (7.0 * 24.0) / covered_hours, 1)
}

pub fn j_index(mean: f64, sd: f64) -> f64 {
    round_to(0.001 * (mean + sd).powi(2), 1)
}

/// Glycemic variability index: actual trace length over the length of a
/// straight line between the first and last reading.
pub fn gvi(readings: &[GlucoseReading]) -> f64 {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.len() < 2 {
        return 0.0;
    }
    let mut path = 0.0;
    let mut span_minutes = 0.0;
    for pair in readings.windows(2) {
        let dt = (pair[1].mills - pair[0].mills) as f64 / ONE_MINUTE_MS as f64;
        let dg = pair[1].mgdl - pair[0].mgdl;
        path += (dt * dt + dg * dg).sqrt();
        span_minutes += dt;
    }
    let rise = readings[readings.len() - 1].mgdl - readings[0].mgdl;
    let ideal = (span_minutes * span_minutes + rise * rise).sqrt();
    if ideal == 0.0 {
        return 0.0;
    }
    round_to(path / ideal, 2)
}

/// Patient glycemic status.
pub fn pgs(gvi: f64, mean: f64, target_fraction: f64) -> f64 {
    round_to(gvi * mean * (1.0 - target_fraction.clamp(0.0, 1.0)), 2)
}

/// ADAG estimated A1C in percent.
pub fn estimated_a1c(mean: f64, count: usize) -> f64 {
    // ---
    if count < 2 {
        return 0.0;
    }
    round_to((mean + 46.7) / 28.7, 1)
}

/// Glucose management indicator in percent.
pub fn gmi(mean: f64, count: usize) -> f64 {
    // ---
    if count < 2 {
        return 0.0;
    }
    round_to(finite_or_zero(3.31 + 0.02392 * mean), 1)
}
