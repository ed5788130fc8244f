//! End-to-end scenarios over the public library API.

use glucoflow::analytics::decay::{InsulinCurve, InsulinModel};
use glucoflow::analytics::{quality, stats, variability};
use glucoflow::analytics::{
    Ar2Forecaster, Ar2Phase, Ar2Registry, BasalTimeline, IobCalculator,
};
use glucoflow::{ActiveProfile, AnalyticsConfig, GlucoseReading, Treatment};

// ---

const T0: i64 = 1_700_000_000_000;
const MINUTE: i64 = 60_000;
const FIVE_MIN: i64 = 5 * MINUTE;

fn create_test_series(values: &[f64]) -> Vec<GlucoseReading> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| GlucoseReading::new(T0 + i as i64 * FIVE_MIN, *v))
        .collect()
}

#[test]
fn decay_curves_are_bounded_at_both_ends() {
    // ---
    for curve in [InsulinCurve::Bilinear, InsulinCurve::Exponential] {
        let model = InsulinModel::new(curve, 3.0, 75.0);
        assert_eq!(model.iob(0.0), 1.0, "{:?}", curve);
        assert_eq!(model.iob(-10.0), 0.0, "{:?}", curve);
        for elapsed in [180.0, 181.0, 600.0] {
            assert_eq!(model.iob(elapsed), 0.0, "{:?} at {}", curve, elapsed);
            assert_eq!(model.activity(elapsed), 0.0, "{:?} at {}", curve, elapsed);
        }
        for minute in 0..180 {
            let iob = model.iob(minute as f64);
            assert!((0.0..=1.0).contains(&iob));
        }
    }
}

#[test]
fn three_readings_in_target() {
    // ---
    let cfg = AnalyticsConfig::default();
    let readings = create_test_series(&[120.0, 125.0, 130.0]);

    let basic = stats::basic_stats(&readings);
    assert_eq!(basic.count, 3);
    assert_eq!(basic.mean, 125.0);
    assert_eq!(basic.min, 120.0);
    assert_eq!(basic.max, 130.0);

    let tir = stats::time_in_range(&readings, &cfg);
    assert_eq!(tir.percentages.target, 100.0);
    assert_eq!(tir.percentages.severe_low, 0.0);
    assert_eq!(tir.percentages.severe_high, 0.0);
}

#[test]
fn time_in_range_partitions_to_100() {
    // ---
    let cfg = AnalyticsConfig::default();
    let values: Vec<f64> = (0..288)
        .map(|i| 130.0 + 125.0 * ((i as f64) / 20.0).sin())
        .collect();
    let tir = stats::time_in_range(&create_test_series(&values), &cfg);
    let p = tir.percentages;
    let sum = p.severe_low + p.low + p.target + p.high + p.severe_high;
    assert!((sum - 100.0).abs() < 1e-6, "sum was {}", sum);
    assert!(p.severe_low > 0.0 && p.severe_high > 0.0);
}

#[test]
fn five_unit_bolus_decays_over_three_hours() {
    // ---
    let calc = IobCalculator::from_config(&AnalyticsConfig::default(), None).unwrap();
    let bolus = Treatment {
        event_type: "Bolus".to_string(),
        mills: Some(T0),
        insulin: Some(5.0),
        ..Default::default()
    };
    let treatments = [bolus];

    let at_90 = calc.calculate(&treatments, None, T0 + 90 * MINUTE).iob;
    assert!(at_90 > 0.0 && at_90 < 5.0);

    let mut previous = at_90;
    for minute in 91..=180 {
        let iob = calc.calculate(&treatments, None, T0 + minute * MINUTE).iob;
        assert!(iob <= previous, "iob rose at minute {}", minute);
        previous = iob;
    }
    assert_eq!(previous, 0.0);
}

#[test]
fn overlapping_temp_basals_truncate() {
    // ---
    let first = Treatment {
        id: Some("first".into()),
        event_type: "Temp Basal".into(),
        mills: Some(T0),
        duration: Some(60.0),
        absolute: Some(2.0),
        ..Default::default()
    };
    let second = Treatment {
        id: Some("second".into()),
        event_type: "Temp Basal".into(),
        mills: Some(T0 + 10 * MINUTE),
        duration: Some(30.0),
        absolute: Some(0.5),
        ..Default::default()
    };
    let timeline = BasalTimeline::build(&[second, first]);
    let segments = timeline.temp_basals();
    assert_eq!(segments[0].end, segments[1].start);
    assert_eq!(segments[0].cuttedby.as_deref(), Some("second"));
    assert_eq!(segments[1].cutting.as_deref(), Some("first"));

    let no_schedule = ActiveProfile::with_flat_basal(3.0, 0.0);
    let delivered = timeline.delivered(&no_schedule, T0, T0 + 2 * 60 * MINUTE);
    let expected = 2.0 * 10.0 / 60.0 + 0.5 * 30.0 / 60.0;
    assert!((delivered.temp_basal - expected).abs() < 1e-9);
    assert!((delivered.total - expected).abs() < 1e-9);
}

#[test]
fn forty_five_minute_gap_is_one_gap() {
    // ---
    let cfg = AnalyticsConfig::default();
    let mut readings = create_test_series(&[110.0; 24]);
    let resume = readings[23].mills + 45 * MINUTE;
    readings.extend((0..24).map(|i| GlucoseReading::new(resume + i * FIVE_MIN, 115.0)));
    let end = resume + 24 * FIVE_MIN;

    let q = quality::analyze(&readings, &[], T0, end, &cfg);
    assert_eq!(q.gap_count, 1);
    assert_eq!(q.gaps[0].duration_minutes, 45.0);
    assert!(q.cgm_active_percent < 100.0);
    assert!((0.0..=100.0).contains(&q.data_completeness));

    let dense = create_test_series(&[110.0; 24]);
    let q = quality::analyze(&dense, &[], T0, T0 + 24 * FIVE_MIN, &cfg);
    assert_eq!(q.cgm_active_percent, 100.0);
}

#[test]
fn variability_is_zero_below_two_readings() {
    // ---
    for readings in [vec![], create_test_series(&[150.0])] {
        let v = variability::glycemic_variability(&readings, 1.0, FIVE_MIN, 0);
        assert_eq!(v.mage, 0.0);
        assert_eq!(v.conga, 0.0);
        assert_eq!(v.adrr, 0.0);
        assert_eq!(v.estimated_a1c, 0.0);
    }
}

#[test]
fn forecaster_resets_after_gap() {
    // ---
    let registry = Ar2Registry::new(Ar2Forecaster::from_config(&AnalyticsConfig::default()));
    let before = create_test_series(&[180.0, 200.0, 220.0]);
    let last = before[2].mills;
    let f = registry.update("acct", &before, last);
    assert_eq!(f.phase, Ar2Phase::Forecasting);
    assert_eq!(f.event_name, "High");

    // One hour of silence, then a single post-gap reading
    let after = last + 60 * MINUTE;
    let f = registry.update("acct", &[GlucoseReading::new(after, 100.0)], after);
    assert_eq!(f.phase, Ar2Phase::Idle);
    assert!(f.predicted.is_empty());

    let next = GlucoseReading::new(after + FIVE_MIN, 100.0);
    let f = registry.update("acct", &[next], after + FIVE_MIN);
    assert_eq!(f.phase, Ar2Phase::Forecasting);
    assert_eq!(f.event_name, "");
    assert!(f.predicted.iter().all(|p| (p.mgdl - 100.0).abs() <= 2.0));
}
