//! Glucose statistics: basic descriptive stats, percentiles, time in range
//! and episode counting.
//!
//! Time in range is time-weighted: each reading owns the interval up to the
//! next reading (capped at the gap threshold), and the final reading owns
//! one nominal interval.

use serde::Serialize;

use crate::analytics::{finite_or_zero, ordered, round_to};
use crate::config::{AnalyticsConfig, GlycemicThresholds};
use crate::models::{GlucoseReading, ONE_MINUTE_MS};

// ---

/// Percentiles reported for every series.
pub const PERCENTILES: [f64; 7] = [5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0];

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicGlucoseStats {
    // ---
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Population SD rounded to one decimal.
    pub standard_deviation: f64,
    pub percentiles: Percentiles,
}

/// Glycemic band a single value falls in. The five bands partition the
/// value axis; the tight band is reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    SevereLow,
    Low,
    Target,
    High,
    SevereHigh,
}

impl Band {
    pub fn of(mgdl: f64, t: &GlycemicThresholds) -> Self {
        // ---
        if mgdl < t.severe_low {
            Self::SevereLow
        } else if mgdl < t.target_bottom {
            Self::Low
        } else if mgdl <= t.target_top {
            Self::Target
        } else if mgdl <= t.severe_high {
            Self::High
        } else {
            Self::SevereHigh
        }
    }
}

/// Per-band values; percentages or minutes depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BandValues {
    pub severe_low: f64,
    pub low: f64,
    pub target: f64,
    pub tight_target: f64,
    pub high: f64,
    pub severe_high: f64,
}

impl BandValues {
    fn add(&mut self, band: Band, value: f64) {
        // ---
        match band {
            Band::SevereLow => self.severe_low += value,
            Band::Low => self.low += value,
            Band::Target => self.target += value,
            Band::High => self.high += value,
            Band::SevereHigh => self.severe_high += value,
        }
    }

    fn percent_of(&self, total: f64) -> Self {
        // ---
        let pct = |v: f64| finite_or_zero(v * 100.0 / total);
        Self {
            severe_low: pct(self.severe_low),
            low: pct(self.low),
            target: pct(self.target),
            tight_target: pct(self.tight_target),
            high: pct(self.high),
            severe_high: pct(self.severe_high),
        }
    }

    /// Sum over the partitioning bands (tight excluded).
    pub fn partition_total(&self) -> f64 {
        self.severe_low + self.low + self.target + self.high + self.severe_high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeCounts {
    /// Episodes below `severeLow`.
    pub severe_low: u32,
    /// Episodes below `low`.
    pub low: u32,
    /// Episodes above `high`.
    pub high: u32,
    /// Episodes above `severeHigh`.
    pub severe_high: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeInRangeMetrics {
    // ---
    pub percentages: BandValues,
    /// Minutes attributed to each band.
    pub durations: BandValues,
    pub total_minutes: f64,
    pub episodes: EpisodeCounts,
}

// ---

/// Percentile by linear interpolation between order statistics.
///
/// `sorted` must be ascending and non-empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    // ---
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
        }
    }
}

/// Mean and unrounded population SD.
pub fn mean_and_sd(values: &[f64]) -> (f64, f64) {
    // ---
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (finite_or_zero(mean), finite_or_zero(var.sqrt()))
}

pub fn basic_stats(readings: &[GlucoseReading]) -> BasicGlucoseStats {
    // ---
    if readings.is_empty() {
        return BasicGlucoseStats::default();
    }
    let values: Vec<f64> = readings.iter().map(|r| r.mgdl).collect();
    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let (mean, sd) = mean_and_sd(&values);
    let p = |q| percentile(&sorted, q);

    BasicGlucoseStats {
        count: values.len(),
        mean,
        median: p(50.0),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        standard_deviation: round_to(sd, 1),
        percentiles: Percentiles {
            p5: p(PERCENTILES[0]),
            p10: p(PERCENTILES[1]),
            p25: p(PERCENTILES[2]),
            p50: p(PERCENTILES[3]),
            p75: p(PERCENTILES[4]),
            p90: p(PERCENTILES[5]),
            p95: p(PERCENTILES[6]),
        },
    }
}

/// Interval credited to reading `i` of an ascending series.
fn owned_interval_ms(readings: &[GlucoseReading], i: usize, config: &AnalyticsConfig) -> i64 {
    // ---
    match readings.get(i + 1) {
        Some(next) => (next.mills - readings[i].mills).clamp(0, config.gap_threshold_ms()),
        None => config.interval_ms(),
    }
}

/// Time-weighted band percentages plus episode counts. Readings may
/// arrive in any order.
pub fn time_in_range(readings: &[GlucoseReading], config: &AnalyticsConfig) -> TimeInRangeMetrics {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.is_empty() {
        return TimeInRangeMetrics::default();
    }
    let t = &config.thresholds;

    let mut durations = BandValues::default();
    let mut total_ms = 0i64;
    for (i, r) in readings.iter().enumerate() {
        let owned = owned_interval_ms(readings, i, config);
        let minutes = owned as f64 / ONE_MINUTE_MS as f64;
        durations.add(Band::of(r.mgdl, t), minutes);
        if r.mgdl >= t.tight_target_bottom && r.mgdl <= t.tight_target_top {
            durations.tight_target += minutes;
        }
        total_ms += owned;
    }

    let total_minutes = total_ms as f64 / ONE_MINUTE_MS as f64;
    let percentages = if total_minutes > 0.0 {
        durations.percent_of(total_minutes)
    } else {
        BandValues::default()
    };

    TimeInRangeMetrics {
        percentages,
        durations,
        total_minutes,
        episodes: count_episodes(readings, config),
    }
}

/// Count excursions beyond each threshold lasting at least the minimum dwell.
pub fn count_episodes(readings: &[GlucoseReading], config: &AnalyticsConfig) -> EpisodeCounts {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    let t = &config.thresholds;
    EpisodeCounts {
        severe_low: episodes_where(readings, config, |v| v < t.severe_low),
        low: episodes_where(readings, config, |v| v < t.low),
        high: episodes_where(readings, config, |v| v > t.high),
        severe_high: episodes_where(readings, config, |v| v > t.severe_high),
    }
}

fn episodes_where<F>(readings: &[GlucoseReading], config: &AnalyticsConfig, inside: F) -> u32
where
    F: Fn(f64) -> bool,
{
    // ---
    let min_dwell = config.min_episode_ms();
    let gap = config.gap_threshold_ms();
    let mut count = 0;
    let mut start: Option<i64> = None;

    for (i, r) in readings.iter().enumerate() {
        if inside(r.mgdl) {
            if start.is_none() {
                start = Some(r.mills);
            }
            // The episode ends at a gap or at the end of the series.
            let next = readings.get(i + 1);
            let broken = next.map_or(true, |n| n.mills - r.mills > gap);
            if broken {
                if let Some(s) = start.take() {
                    if r.mills + config.interval_ms() - s >= min_dwell {
                        count += 1;
                    }
                }
            }
        } else if let Some(s) = start.take() {
            if r.mills - s >= min_dwell {
                count += 1;
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const T0: i64 = 1_700_000_000_000;

    fn create_test_series(values: &[f64]) -> Vec<GlucoseReading> {
        // ---
        values
            .iter()
            .enumerate()
            .map(|(i, v)| GlucoseReading::new(T0 + i as i64 * 5 * ONE_MINUTE_MS, *v))
            .collect()
    }

    #[test]
    fn test_basic_stats_three_readings() {
        // ---
        let s = basic_stats(&create_test_series(&[120.0, 125.0, 130.0]));
        assert_eq!(s.count, 3);
        assert_eq!(s.mean, 125.0);
        assert_eq!(s.median, 125.0);
        assert_eq!(s.min, 120.0);
        assert_eq!(s.max, 130.0);
        // sqrt(50/3) = 4.08
        assert_eq!(s.standard_deviation, 4.1);
    }

    #[test]
    fn test_empty_and_single() {
        // ---
        assert_eq!(basic_stats(&[]), BasicGlucoseStats::default());
        let one = basic_stats(&create_test_series(&[99.0]));
        assert_eq!(one.count, 1);
        assert_eq!(one.mean, 99.0);
        assert_eq!(one.standard_deviation, 0.0);
        assert_eq!(one.percentiles.p95, 99.0);
    }

    #[test]
    fn test_percentile_interpolation() {
        // ---
        let sorted = [10.0, 20.0, 30.0, 40.0, 50.0];
        assert_eq!(percentile(&sorted, 50.0), 30.0);
        assert_eq!(percentile(&sorted, 25.0), 20.0);
        assert!((percentile(&sorted, 90.0) - 46.0).abs() < 1e-12);
        assert!((percentile(&sorted, 5.0) - 12.0).abs() < 1e-12);
    }

    #[test]
    fn test_time_in_range_all_target() {
        // ---
        let cfg = AnalyticsConfig::default();
        let tir = time_in_range(&create_test_series(&[120.0, 125.0, 130.0]), &cfg);
        assert_eq!(tir.percentages.target, 100.0);
        assert_eq!(tir.percentages.tight_target, 100.0);
        assert_eq!(tir.percentages.severe_low, 0.0);
        assert_eq!(tir.percentages.severe_high, 0.0);
        assert_eq!(tir.total_minutes, 15.0);
    }

    #[test]
    fn test_time_weighting_not_count() {
        // ---
        let cfg = AnalyticsConfig::default();
        // Low reading owns 5 minutes, target reading owns 5, final high owns 5.
        let mut series = create_test_series(&[60.0, 100.0]);
        series.push(GlucoseReading::new(T0 + 10 * ONE_MINUTE_MS, 200.0));
        let tir = time_in_range(&series, &cfg);
        let third = 100.0 / 3.0;
        assert!((tir.percentages.low - third).abs() < 1e-9);
        assert!((tir.percentages.target - third).abs() < 1e-9);
        assert!((tir.percentages.high - third).abs() < 1e-9);
        assert!((tir.percentages.partition_total() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_gap_credit_is_capped() {
        // ---
        let cfg = AnalyticsConfig::default();
        let series = vec![
            GlucoseReading::new(T0, 40.0),
            GlucoseReading::new(T0 + 60 * ONE_MINUTE_MS, 120.0),
        ];
        let tir = time_in_range(&series, &cfg);
        // 7.5 min credited to the severe low, 5 to the final reading
        assert!((tir.durations.severe_low - 7.5).abs() < 1e-9);
        assert!((tir.durations.target - 5.0).abs() < 1e-9);
        assert!((tir.percentages.partition_total() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_reading_spike_is_not_an_episode() {
        // ---
        let cfg = AnalyticsConfig::default();
        let spike = create_test_series(&[120.0, 60.0, 120.0, 120.0]);
        assert_eq!(count_episodes(&spike, &cfg).low, 0);

        let dip = create_test_series(&[120.0, 65.0, 62.0, 66.0, 120.0]);
        let counts = count_episodes(&dip, &cfg);
        assert_eq!(counts.low, 1);
        assert_eq!(counts.severe_low, 0);
    }

    #[test]
    fn test_episode_running_to_series_end() {
        // ---
        let cfg = AnalyticsConfig::default();
        let series = create_test_series(&[150.0, 260.0, 270.0, 280.0]);
        let counts = count_episodes(&series, &cfg);
        assert_eq!(counts.severe_high, 1);
        assert_eq!(counts.high, 1);
    }

    #[test]
    fn test_band_boundaries() {
        // ---
        let t = GlycemicThresholds::default();
        assert_eq!(Band::of(53.9, &t), Band::SevereLow);
        assert_eq!(Band::of(54.0, &t), Band::Low);
        assert_eq!(Band::of(70.0, &t), Band::Target);
        assert_eq!(Band::of(180.0, &t), Band::Target);
        assert_eq!(Band::of(181.0, &t), Band::High);
        assert_eq!(Band::of(250.0, &t), Band::High);
        assert_eq!(Band::of(251.0, &t), Band::SevereHigh);
    }

    #[test]
    fn test_time_in_range_accepts_any_order() {
        // ---
        let cfg = AnalyticsConfig::default();
        let mut readings = create_test_series(&[60.0, 65.0, 120.0, 200.0, 260.0, 270.0]);
        let forward = time_in_range(&readings, &cfg);
        readings.reverse();
        assert_eq!(time_in_range(&readings, &cfg), forward);
        assert!(forward.total_minutes > 0.0);
    }
}
