//! Glucose & insulin analytics engine.
//!
//! Pure, synchronous computations over plain data. Nothing in this module
//! performs I/O except the rollup orchestrator, which awaits a single fetch
//! from its [`rollup::GlucoseStore`] before running the other components.
//!
//! Follows the Explicit Module Boundary Pattern: siblings are private
//! implementation files and this gateway re-exports what callers need.

use std::borrow::Cow;

use crate::models::GlucoseReading;

pub mod ar2;
pub mod basal;
pub mod decay;
pub mod iob;
pub mod quality;
pub mod rollup;
pub mod stats;
pub mod treatments;
pub mod variability;

pub use ar2::{Ar2Forecast, Ar2Forecaster, Ar2Phase, Ar2Registry, Ar2State, ForecastPoint};
pub use basal::{BasalDelivery, BasalTimeline, TempBasalResult, TempBasalSegment};
pub use decay::{CarbModel, DecayPoint, InsulinCurve, InsulinModel};
pub use iob::{IobCalculator, IobResult, LastBolus};
pub use quality::{DataQuality, Gap, GapKind};
pub use rollup::{
    GlucoseStore, PeriodStatistics, RollupOrchestrator, RollupReport, StatisticsCache,
};
pub use stats::{BasicGlucoseStats, EpisodeCounts, TimeInRangeMetrics};
pub use treatments::TreatmentSummary;
pub use variability::{GlycemicVariability, PgsCategory};

// ---

/// Replace NaN/Inf with 0 so nothing non-finite reaches serialized output.
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Borrow `readings` when already ascending by timestamp, else sort a copy.
pub fn ordered(readings: &[GlucoseReading]) -> Cow<'_, [GlucoseReading]> {
    // ---
    if readings.windows(2).all(|w| w[0].mills <= w[1].mills) {
        return Cow::Borrowed(readings);
    }
    let mut sorted = readings.to_vec();
    crate::models::sort_readings(&mut sorted);
    Cow::Owned(sorted)
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    // ---
    let factor = 10f64.powi(decimals);
    finite_or_zero((value * factor).round() / factor)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.25, 1), 1.3);
        assert_eq!(round_to(-0.125, 2), -0.13);
        assert_eq!(round_to(7.0, 0), 7.0);
    }

    #[test]
    fn test_non_finite_becomes_zero() {
        assert_eq!(finite_or_zero(f64::NAN), 0.0);
        assert_eq!(finite_or_zero(f64::INFINITY), 0.0);
        assert_eq!(round_to(f64::NEG_INFINITY, 2), 0.0);
    }

    #[test]
    fn test_ordered_only_copies_unsorted_input() {
        // ---
        let ascending = vec![GlucoseReading::new(1, 100.0), GlucoseReading::new(2, 110.0)];
        assert!(matches!(ordered(&ascending), Cow::Borrowed(_)));

        let reversed: Vec<GlucoseReading> = ascending.iter().rev().cloned().collect();
        let sorted = ordered(&reversed);
        assert!(matches!(sorted, Cow::Owned(_)));
        assert_eq!(sorted[0].mills, 1);
        assert_eq!(sorted[1].mills, 2);
    }
}
