//! Insulin and carbohydrate decay curves.
//!
//! Every curve is a pure function of elapsed minutes since the treatment.
//! `activity` is the fraction of the dose acting per minute and `iob` is the
//! fraction still outstanding. Both are exactly 0 before the treatment and
//! once the action window has elapsed, and `iob` is exactly 1 at time 0.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ---

/// Scaled time base of the bilinear curve: every DIA maps onto 180 minutes.
const BILINEAR_END: f64 = 180.0;
const BILINEAR_PEAK: f64 = 75.0;
/// Triangle height so that the activity integrates to 1.
const BILINEAR_HEIGHT: f64 = 2.0 / BILINEAR_END;

/// Selectable curve family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsulinCurve {
    #[default]
    Bilinear,
    Exponential,
}

impl FromStr for InsulinCurve {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        match s.trim().to_ascii_lowercase().as_str() {
            "bilinear" => Ok(Self::Bilinear),
            "exponential" | "biexponential" => Ok(Self::Exponential),
            other => Err(ConfigError::UnknownCurve(other.to_string())),
        }
    }
}

/// Activity and remaining fraction at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecayPoint {
    /// Fraction of the dose acting per minute.
    pub activity: f64,
    /// Fraction of the dose not yet acted.
    pub iob: f64,
}

impl DecayPoint {
    const ZERO: Self = Self {
        activity: 0.0,
        iob: 0.0,
    };
    const FULL: Self = Self {
        activity: 0.0,
        iob: 1.0,
    };
}

// ---

/// Bilinear insulin activity per minute for a DIA given in hours.
pub fn bilinear_activity(elapsed_minutes: f64, dia_hours: f64) -> f64 {
    bilinear(elapsed_minutes, dia_hours).activity
}

/// Bilinear insulin remaining fraction for a DIA given in hours.
pub fn bilinear_iob(elapsed_minutes: f64, dia_hours: f64) -> f64 {
    bilinear(elapsed_minutes, dia_hours).iob
}

fn bilinear(elapsed_minutes: f64, dia_hours: f64) -> DecayPoint {
    // ---
    if !(elapsed_minutes >= 0.0) || !(dia_hours > 0.0) {
        return DecayPoint::ZERO;
    }
    let scale = 3.0 / dia_hours;
    let m = elapsed_minutes * scale;
    if m >= BILINEAR_END {
        return DecayPoint::ZERO;
    }

    // Triangular activity: rises to the peak, then falls back to zero at the
    // end of the window. IOB is the exact remainder of its integral.
    let (scaled_activity, absorbed) = if m < BILINEAR_PEAK {
        (
            BILINEAR_HEIGHT * m / BILINEAR_PEAK,
            BILINEAR_HEIGHT * m * m / (2.0 * BILINEAR_PEAK),
        )
    } else {
        let tail = BILINEAR_END - m;
        let fall = BILINEAR_END - BILINEAR_PEAK;
        (
            BILINEAR_HEIGHT * tail / fall,
            1.0 - BILINEAR_HEIGHT * tail * tail / (2.0 * fall),
        )
    };

    DecayPoint {
        activity: clamp_unit(scaled_activity * scale),
        iob: clamp_unit(1.0 - absorbed),
    }
}

/// Exponential insulin activity per minute.
pub fn exponential_activity(elapsed_minutes: f64, dia_hours: f64, peak_minutes: f64) -> f64 {
    exponential(elapsed_minutes, dia_hours * 60.0, peak_minutes).activity
}

/// Exponential insulin remaining fraction.
pub fn exponential_iob(elapsed_minutes: f64, dia_hours: f64, peak_minutes: f64) -> f64 {
    exponential(elapsed_minutes, dia_hours * 60.0, peak_minutes).iob
}

/// Closed-form exponential curve over `end` minutes peaking at `peak`.
///
/// Requires `0 < peak < end / 2`; anything else yields zero.
fn exponential(t: f64, end: f64, peak: f64) -> DecayPoint {
    // ---
    if !(t >= 0.0) || !(end > 0.0) || !(peak > 0.0) || peak * 2.0 >= end {
        return DecayPoint::ZERO;
    }
    if t >= end {
        return DecayPoint::ZERO;
    }
    if t == 0.0 {
        return DecayPoint::FULL;
    }

    let tau = peak * (1.0 - peak / end) / (1.0 - 2.0 * peak / end);
    let a = 2.0 * tau / end;
    let s = 1.0 / (1.0 - a + (1.0 + a) * (-end / tau).exp());
    let decay = (-t / tau).exp();

    let activity = (s / (tau * tau)) * t * (1.0 - t / end) * decay;
    let iob =
        1.0 - s * (1.0 - a) * ((t * t / (tau * end * (1.0 - a)) - t / tau - 1.0) * decay + 1.0);

    DecayPoint {
        activity: clamp_unit(activity),
        iob: clamp_unit(iob),
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ---

/// Insulin curve bound to its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsulinModel {
    pub curve: InsulinCurve,
    pub dia_hours: f64,
    pub peak_minutes: f64,
}

impl InsulinModel {
    pub fn new(curve: InsulinCurve, dia_hours: f64, peak_minutes: f64) -> Self {
        // ---
        Self {
            curve,
            dia_hours,
            peak_minutes,
        }
    }

    /// Length of the action window in minutes.
    pub fn action_minutes(&self) -> f64 {
        self.dia_hours * 60.0
    }

    pub fn at(&self, elapsed_minutes: f64) -> DecayPoint {
        // ---
        match self.curve {
            InsulinCurve::Bilinear => bilinear(elapsed_minutes, self.dia_hours),
            InsulinCurve::Exponential => {
                exponential(elapsed_minutes, self.action_minutes(), self.peak_minutes)
            }
        }
    }

    pub fn activity(&self, elapsed_minutes: f64) -> f64 {
        self.at(elapsed_minutes).activity
    }

    pub fn iob(&self, elapsed_minutes: f64) -> f64 {
        self.at(elapsed_minutes).iob
    }
}

/// Carbohydrate absorption curve.
///
/// Nothing is absorbed during `delay_minutes`; absorption then runs over
/// `absorption_minutes`, linearly for the bilinear family and along the
/// exponential closed form (peak at a third of the window) otherwise.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbModel {
    pub curve: InsulinCurve,
    pub absorption_minutes: f64,
    pub delay_minutes: f64,
}

impl CarbModel {
    pub fn new(curve: InsulinCurve, absorption_minutes: f64, delay_minutes: f64) -> Self {
        // ---
        Self {
            curve,
            absorption_minutes,
            delay_minutes,
        }
    }

    pub fn action_minutes(&self) -> f64 {
        self.delay_minutes.max(0.0) + self.absorption_minutes
    }

    pub fn at(&self, elapsed_minutes: f64) -> DecayPoint {
        // ---
        if !(elapsed_minutes >= 0.0) || !(self.absorption_minutes > 0.0) {
            return DecayPoint::ZERO;
        }
        let absorbing = elapsed_minutes - self.delay_minutes.max(0.0);
        if absorbing < 0.0 {
            return DecayPoint::FULL;
        }
        if absorbing >= self.absorption_minutes {
            return DecayPoint::ZERO;
        }
        match self.curve {
            InsulinCurve::Bilinear => DecayPoint {
                activity: clamp_unit(1.0 / self.absorption_minutes),
                iob: clamp_unit(1.0 - absorbing / self.absorption_minutes),
            },
            InsulinCurve::Exponential => exponential(
                absorbing,
                self.absorption_minutes,
                self.absorption_minutes / 3.0,
            ),
        }
    }

    pub fn activity(&self, elapsed_minutes: f64) -> f64 {
        self.at(elapsed_minutes).activity
    }

    pub fn iob(&self, elapsed_minutes: f64) -> f64 {
        self.at(elapsed_minutes).iob
    }
}

/// Carb activity per minute, free-function form.
pub fn carb_activity(elapsed_minutes: f64, absorption_minutes: f64, delay_minutes: f64) -> f64 {
    CarbModel::new(InsulinCurve::Bilinear, absorption_minutes, delay_minutes)
        .activity(elapsed_minutes)
}

/// Carbs remaining fraction, free-function form.
pub fn carb_iob(elapsed_minutes: f64, absorption_minutes: f64, delay_minutes: f64) -> f64 {
    CarbModel::new(InsulinCurve::Bilinear, absorption_minutes, delay_minutes).iob(elapsed_minutes)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn models() -> Vec<InsulinModel> {
        vec![
            InsulinModel::new(InsulinCurve::Bilinear, 3.0, 75.0),
            InsulinModel::new(InsulinCurve::Bilinear, 5.0, 75.0),
            InsulinModel::new(InsulinCurve::Exponential, 5.0, 75.0),
            InsulinModel::new(InsulinCurve::Exponential, 6.0, 55.0),
        ]
    }

    #[test]
    fn test_boundaries() {
        // ---
        for m in models() {
            assert_eq!(m.iob(0.0), 1.0, "{:?}", m);
            assert_eq!(m.activity(0.0), 0.0, "{:?}", m);
            assert_eq!(m.iob(-1.0), 0.0);
            assert_eq!(m.activity(-1.0), 0.0);
            let end = m.action_minutes();
            assert_eq!(m.iob(end), 0.0);
            assert_eq!(m.activity(end), 0.0);
            assert_eq!(m.iob(end + 60.0), 0.0);
            assert_eq!(m.activity(end * 3.0), 0.0);
        }
    }

    #[test]
    fn test_iob_monotone_and_bounded() {
        // ---
        for m in models() {
            let mut prev = 1.0;
            let mut t = 0.0;
            while t <= m.action_minutes() + 5.0 {
                let iob = m.iob(t);
                let act = m.activity(t);
                assert!((0.0..=1.0).contains(&iob));
                assert!((0.0..=1.0).contains(&act));
                assert!(iob <= prev + 1e-12, "{:?} rose at t={}", m, t);
                prev = iob;
                t += 1.0;
            }
        }
    }

    #[test]
    fn test_activity_falls_after_peak() {
        // ---
        let m = InsulinModel::new(InsulinCurve::Bilinear, 3.0, 75.0);
        assert!(m.activity(75.0) > m.activity(30.0));
        assert!(m.activity(75.0) > m.activity(120.0));
        assert!(m.activity(120.0) > m.activity(170.0));

        let e = InsulinModel::new(InsulinCurve::Exponential, 5.0, 75.0);
        assert!(e.activity(75.0) > e.activity(150.0));
        assert!(e.activity(150.0) > e.activity(250.0));
    }

    #[test]
    fn test_bilinear_continuous_at_peak() {
        // ---
        let just_before = bilinear_iob(74.999, 3.0);
        let just_after = bilinear_iob(75.001, 3.0);
        assert!((just_before - just_after).abs() < 1e-4);
        assert!((bilinear_iob(75.0, 3.0) - 7.0 / 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_activity_integrates_to_dose() {
        // ---
        for m in models() {
            let total: f64 = (0..(m.action_minutes() as usize))
                .map(|t| m.activity(t as f64 + 0.5))
                .sum();
            assert!((total - 1.0).abs() < 0.01, "{:?} total {}", m, total);
        }
    }

    #[test]
    fn test_dia_scales_bilinear() {
        // ---
        // 90 min into a 3h DIA matches 150 min into a 5h DIA
        assert!((bilinear_iob(90.0, 3.0) - bilinear_iob(150.0, 5.0)).abs() < 1e-12);
    }

    #[test]
    fn test_carb_curves() {
        // ---
        assert_eq!(carb_iob(-5.0, 180.0, 20.0), 0.0);
        assert_eq!(carb_iob(0.0, 180.0, 20.0), 1.0);
        assert_eq!(carb_iob(15.0, 180.0, 20.0), 1.0);
        assert_eq!(carb_activity(15.0, 180.0, 20.0), 0.0);
        assert!((carb_iob(110.0, 180.0, 20.0) - 0.5).abs() < 1e-12);
        assert_eq!(carb_iob(200.0, 180.0, 20.0), 0.0);
        assert_eq!(carb_activity(200.0, 180.0, 20.0), 0.0);

        let e = CarbModel::new(InsulinCurve::Exponential, 180.0, 0.0);
        assert_eq!(e.iob(0.0), 1.0);
        assert!(e.iob(90.0) > 0.0 && e.iob(90.0) < 1.0);
        assert_eq!(e.iob(180.0), 0.0);
    }

    #[test]
    fn test_curve_parsing() {
        // ---
        assert_eq!("Bilinear".parse::<InsulinCurve>(), Ok(InsulinCurve::Bilinear));
        assert_eq!(
            "exponential".parse::<InsulinCurve>(),
            Ok(InsulinCurve::Exponential)
        );
        assert!("linear".parse::<InsulinCurve>().is_err());
    }
}
