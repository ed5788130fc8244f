//! Data quality: completeness, gaps, sensor warmups and a noise score.

use serde::Serialize;
use tracing::debug;

use crate::analytics::{finite_or_zero, ordered, round_to};
use crate::config::AnalyticsConfig;
use crate::models::{EventKind, GlucoseReading, Treatment, ONE_MINUTE_MS};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GapKind {
    /// Ordinary missing data.
    Gap,
    /// Gap that follows a sensor change.
    SensorWarmup,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub start: i64,
    pub end: i64,
    pub duration_minutes: f64,
    pub kind: GapKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    // ---
    pub total_readings: usize,
    pub expected_readings: usize,
    /// `actual / expected`, percent in [0, 100].
    pub data_completeness: f64,
    /// Share of the window covered by non-gap reading intervals, percent
    /// in [0, 100].
    pub cgm_active_percent: f64,
    /// Ordinary gaps only; warmups are counted separately.
    pub gap_count: usize,
    pub longest_gap_minutes: f64,
    pub average_gap_minutes: f64,
    pub gaps: Vec<Gap>,
    pub sensor_warmup_count: usize,
    pub calibration_count: usize,
    /// Heuristic 0..1 score from second differences.
    pub noise_level: f64,
}

/// Analyze a series (any order) over `[window_start, window_end]`.
///
/// Treatments supply sensor changes (to classify warmups) and BG checks
/// (counted as calibrations).
pub fn analyze(
    readings: &[GlucoseReading],
    treatments: &[Treatment],
    window_start: i64,
    window_end: i64,
    config: &AnalyticsConfig,
) -> DataQuality {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    let interval = config.interval_ms();
    let window_ms = if window_end > window_start {
        window_end - window_start
    } else {
        match (readings.first(), readings.last()) {
            (Some(a), Some(b)) => b.mills - a.mills + interval,
            _ => 0,
        }
    };
    if window_ms <= 0 {
        return DataQuality::default();
    }

    let mut sensor_changes = Vec::new();
    let mut calibration_count = 0;
    for t in treatments {
        let Ok(ts) = t.timestamp() else {
            continue;
        };
        match t.kind() {
            EventKind::SensorChange => sensor_changes.push(ts),
            EventKind::BgCheck if ts >= window_start && ts <= window_end => calibration_count += 1,
            _ => {}
        }
    }

    let gaps = find_gaps(readings, &sensor_changes, config);
    let ordinary: Vec<&Gap> = gaps.iter().filter(|g| g.kind == GapKind::Gap).collect();
    let longest = ordinary
        .iter()
        .map(|g| g.duration_minutes)
        .fold(0.0, f64::max);
    let average = if ordinary.is_empty() {
        0.0
    } else {
        ordinary.iter().map(|g| g.duration_minutes).sum::<f64>() / ordinary.len() as f64
    };

    let expected = (window_ms as f64 / interval as f64).round() as usize;
    let completeness = if expected == 0 {
        0.0
    } else {
        readings.len() as f64 / expected as f64 * 100.0
    };
    let active = active_ms(readings, config).min(window_ms) as f64 / window_ms as f64 * 100.0;

    debug!(
        readings = readings.len(),
        expected,
        gaps = gaps.len(),
        "data quality analyzed"
    );

    DataQuality {
        total_readings: readings.len(),
        expected_readings: expected,
        data_completeness: round_to(finite_or_zero(completeness).clamp(0.0, 100.0), 1),
        cgm_active_percent: round_to(finite_or_zero(active).clamp(0.0, 100.0), 1),
        gap_count: ordinary.len(),
        longest_gap_minutes: longest,
        average_gap_minutes: round_to(average, 1),
        sensor_warmup_count: gaps.len() - ordinary.len(),
        gaps,
        calibration_count,
        noise_level: noise_level(readings, config),
    }
}

/// Time covered by readings: every step between consecutive readings
/// that is not a gap, plus one nominal interval for the last reading.
/// Time before the first and after the last reading is not covered.
pub fn active_ms(readings: &[GlucoseReading], config: &AnalyticsConfig) -> i64 {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    if readings.is_empty() {
        return 0;
    }
    let threshold = config.gap_threshold_ms();
    let covered: i64 = readings
        .windows(2)
        .map(|w| w[1].mills - w[0].mills)
        .filter(|&step| step <= threshold)
        .sum();
    covered + config.interval_ms()
}

/// Intervals between consecutive readings longer than the gap threshold.
pub fn find_gaps(
    readings: &[GlucoseReading],
    sensor_changes: &[i64],
    config: &AnalyticsConfig,
) -> Vec<Gap> {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    let threshold = config.gap_threshold_ms();
    let interval = config.interval_ms();
    readings
        .windows(2)
        .filter(|w| w[1].mills - w[0].mills > threshold)
        .map(|w| {
            let (start, end) = (w[0].mills, w[1].mills);
            let warmup = sensor_changes
                .iter()
                .any(|&ts| ts >= start - interval && ts <= end);
            Gap {
                start,
                end,
                duration_minutes: (end - start) as f64 / ONE_MINUTE_MS as f64,
                kind: if warmup {
                    GapKind::SensorWarmup
                } else {
                    GapKind::Gap
                },
            }
        })
        .collect()
}

/// Saturating noise score `m / (m + baseline)` where `m` is the mean
/// absolute second difference over gap-free triples.
pub fn noise_level(readings: &[GlucoseReading], config: &AnalyticsConfig) -> f64 {
    // ---
    let sorted = ordered(readings);
    let readings: &[GlucoseReading] = &sorted;
    let threshold = config.gap_threshold_ms();
    let second_diffs: Vec<f64> = readings
        .windows(3)
        .filter(|w| w[1].mills - w[0].mills <= threshold && w[2].mills - w[1].mills <= threshold)
        .map(|w| (w[2].mgdl - 2.0 * w[1].mgdl + w[0].mgdl).abs())
        .collect();
    if second_diffs.is_empty() {
        return 0.0;
    }
    let m = second_diffs.iter().sum::<f64>() / second_diffs.len() as f64;
    round_to(m / (m + config.noise_baseline_mgdl), 2)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const T0: i64 = 1_700_000_000_000;
    const FIVE_MIN: i64 = 5 * ONE_MINUTE_MS;

    fn create_test_dense(count: i64, start: i64) -> Vec<GlucoseReading> {
        (0..count)
            .map(|i| GlucoseReading::new(start + i * FIVE_MIN, 120.0))
            .collect()
    }

    #[test]
    fn test_dense_series_is_fully_active() {
        // ---
        let cfg = AnalyticsConfig::default();
        let readings = create_test_dense(12, T0);
        let q = analyze(&readings, &[], T0, T0 + 12 * FIVE_MIN, &cfg);
        assert_eq!(q.gap_count, 0);
        assert_eq!(q.cgm_active_percent, 100.0);
        assert_eq!(q.data_completeness, 100.0);
        assert_eq!(q.expected_readings, 12);
        assert_eq!(q.noise_level, 0.0);
    }

    #[test]
    fn test_single_45_minute_gap() {
        // ---
        let cfg = AnalyticsConfig::default();
        let mut readings = create_test_dense(12, T0);
        let resume = T0 + 11 * FIVE_MIN + 45 * ONE_MINUTE_MS;
        readings.extend(create_test_dense(12, resume));
        let end = resume + 12 * FIVE_MIN;

        let q = analyze(&readings, &[], T0, end, &cfg);
        assert_eq!(q.gap_count, 1);
        assert_eq!(q.gaps[0].duration_minutes, 45.0);
        assert_eq!(q.longest_gap_minutes, 45.0);
        assert_eq!(q.average_gap_minutes, 45.0);

        let window_min = (end - T0) as f64 / ONE_MINUTE_MS as f64;
        let expected_active = round_to((window_min - 45.0) / window_min * 100.0, 1);
        assert_eq!(q.cgm_active_percent, expected_active);
        assert!(q.cgm_active_percent < 100.0);
    }

    #[test]
    fn test_partial_window_is_not_fully_active() {
        // ---
        let cfg = AnalyticsConfig::default();
        let day_end = T0 + 24 * 60 * ONE_MINUTE_MS;
        let last_hour = create_test_dense(12, day_end - 12 * FIVE_MIN);

        let q = analyze(&last_hour, &[], T0, day_end, &cfg);
        assert_eq!(q.gap_count, 0);
        assert_eq!(q.data_completeness, 4.2);
        assert_eq!(q.cgm_active_percent, 4.2);

        // Leading and trailing silence both count against coverage
        let middle = create_test_dense(12, T0 + 6 * 60 * ONE_MINUTE_MS);
        let q = analyze(&middle, &[], T0, day_end, &cfg);
        assert_eq!(q.cgm_active_percent, 4.2);
        assert_eq!(active_ms(&middle, &cfg), 60 * ONE_MINUTE_MS);
    }

    #[test]
    fn test_unordered_series_matches_sorted() {
        // ---
        let cfg = AnalyticsConfig::default();
        let mut readings = create_test_dense(12, T0);
        readings.extend(create_test_dense(12, T0 + 2 * 60 * ONE_MINUTE_MS));
        let end = T0 + 3 * 60 * ONE_MINUTE_MS;
        let forward = analyze(&readings, &[], T0, end, &cfg);

        readings.reverse();
        let backward = analyze(&readings, &[], T0, end, &cfg);
        assert_eq!(backward, forward);
        assert_eq!(backward.gap_count, 1);
    }

    #[test]
    fn test_warmup_counted_separately() {
        // ---
        let cfg = AnalyticsConfig::default();
        let mut readings = create_test_dense(6, T0);
        let resume = T0 + 5 * FIVE_MIN + 2 * 60 * ONE_MINUTE_MS;
        readings.extend(create_test_dense(6, resume));
        let change = Treatment {
            event_type: "Sensor Change".to_string(),
            mills: Some(T0 + 5 * FIVE_MIN + ONE_MINUTE_MS),
            ..Default::default()
        };
        let check = Treatment {
            event_type: "BG Check".to_string(),
            mills: Some(resume + FIVE_MIN),
            ..Default::default()
        };

        let q = analyze(&readings, &[change, check], T0, resume + 6 * FIVE_MIN, &cfg);
        assert_eq!(q.gap_count, 0);
        assert_eq!(q.sensor_warmup_count, 1);
        assert_eq!(q.gaps[0].kind, GapKind::SensorWarmup);
        assert_eq!(q.calibration_count, 1);
        assert!(q.cgm_active_percent < 100.0);
    }

    #[test]
    fn test_bounds_are_clamped() {
        // ---
        let cfg = AnalyticsConfig::default();
        // Twice as many readings as the window expects
        let readings: Vec<GlucoseReading> = (0..24)
            .map(|i| GlucoseReading::new(T0 + i * FIVE_MIN / 2, 110.0))
            .collect();
        let q = analyze(&readings, &[], T0, T0 + 12 * FIVE_MIN, &cfg);
        assert_eq!(q.data_completeness, 100.0);
        assert!((0.0..=100.0).contains(&q.cgm_active_percent));

        let empty = analyze(&[], &[], T0, T0 + 12 * FIVE_MIN, &cfg);
        assert_eq!(empty.data_completeness, 0.0);
        assert_eq!(empty.cgm_active_percent, 0.0);
    }

    #[test]
    fn test_noise_rises_with_jitter() {
        // ---
        let cfg = AnalyticsConfig::default();
        let smooth: Vec<GlucoseReading> = (0..20)
            .map(|i| GlucoseReading::new(T0 + i * FIVE_MIN, 100.0 + 2.0 * i as f64))
            .collect();
        let jittery: Vec<GlucoseReading> = (0..20)
            .map(|i| {
                let wobble = if i % 2 == 0 { 15.0 } else { -15.0 };
                GlucoseReading::new(T0 + i * FIVE_MIN, 120.0 + wobble)
            })
            .collect();
        assert_eq!(noise_level(&smooth, &cfg), 0.0);
        let n = noise_level(&jittery, &cfg);
        assert!(n > 0.8 && n < 1.0);
    }
}
