//! Effective basal delivery reconstruction.
//!
//! A [`BasalTimeline`] is built once from a treatment list with a
//! sort-and-sweep pass: temp basals are ordered by start time and every
//! event that starts before its predecessor's nominal end truncates it.
//! The truncation is recorded as explicit predecessor/successor links (and
//! the matching `cuttedby`/`cutting` ids) instead of by editing the input
//! records.

use serde::Serialize;
use tracing::warn;

use crate::error::InputDiagnostic;
use crate::models::{ActiveProfile, EventKind, Treatment, ONE_HOUR_MS, ONE_MINUTE_MS};

// ---

/// A temp basal after truncation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TempBasalSegment {
    // ---
    pub id: Option<String>,
    pub start: i64,
    /// Effective end after truncation by the next temp basal.
    pub end: i64,
    /// End implied by the record's own duration.
    pub nominal_end: i64,
    pub absolute: Option<f64>,
    pub percent: Option<f64>,
    /// Id of the temp basal that truncated this one.
    pub cuttedby: Option<String>,
    /// Id of the temp basal this one truncated.
    pub cutting: Option<String>,
    #[serde(skip)]
    pub predecessor: Option<usize>,
    #[serde(skip)]
    pub successor: Option<usize>,
}

impl TempBasalSegment {
    pub fn is_active(&self, at: i64) -> bool {
        self.start <= at && at < self.end
    }

    /// Effective rate in U/h given the scheduled rate at the same instant.
    pub fn rate(&self, scheduled: f64) -> f64 {
        // ---
        match (self.absolute, self.percent) {
            (Some(absolute), _) => absolute.max(0.0),
            (None, Some(percent)) => (scheduled * (100.0 + percent) / 100.0).max(0.0),
            (None, None) => scheduled,
        }
    }

    pub fn effective_minutes(&self) -> f64 {
        (self.end - self.start) as f64 / ONE_MINUTE_MS as f64
    }
}

/// Extended portion of a combo bolus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComboSegment {
    pub id: Option<String>,
    pub start: i64,
    pub end: i64,
    /// U/h delivered on top of basal.
    pub rate: f64,
}

impl ComboSegment {
    pub fn is_active(&self, at: i64) -> bool {
        self.start <= at && at < self.end
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SwitchSegment {
    start: i64,
    end: Option<i64>,
    percentage: f64,
    timeshift_ms: i64,
}

impl SwitchSegment {
    fn is_active(&self, at: i64) -> bool {
        self.start <= at && self.end.map_or(true, |end| at < end)
    }
}

/// Basal state at a single instant, with the legacy field names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempBasalResult {
    // ---
    /// Scheduled profile rate, U/h.
    pub basal: f64,
    /// Temp basal driving the rate, if any.
    pub treatment: Option<TempBasalSegment>,
    /// Rate after temp basal override, U/h.
    pub tempbasal: f64,
    pub combobolustreatment: Option<ComboSegment>,
    /// Extended combo-bolus rate, U/h.
    pub combobolusbasal: f64,
    /// `tempbasal + combobolusbasal`.
    pub totalbasal: f64,
}

/// Insulin delivered by basal over a window, units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BasalDelivery {
    // ---
    /// Delivered at the scheduled rate while no temp basal ran.
    pub scheduled: f64,
    /// Delivered while a temp basal ran.
    pub temp_basal: f64,
    /// Extended combo-bolus portions.
    pub combo_bolus: f64,
    pub total: f64,
}

/// Resolved basal-affecting events for one account.
#[derive(Debug, Clone, Default)]
pub struct BasalTimeline {
    temp_basals: Vec<TempBasalSegment>,
    combos: Vec<ComboSegment>,
    switches: Vec<SwitchSegment>,
    diagnostics: Vec<InputDiagnostic>,
}

impl BasalTimeline {
    /// Build the timeline from unsorted treatments.
    ///
    /// Records without a usable timestamp are skipped and reported through
    /// [`BasalTimeline::diagnostics`].
    pub fn build(treatments: &[Treatment]) -> Self {
        // ---
        let mut timeline = Self::default();
        let mut temps = Vec::new();
        let mut switches = Vec::new();

        for (index, t) in treatments.iter().enumerate() {
            let kind = t.kind();
            if !matches!(
                kind,
                EventKind::TempBasal | EventKind::ComboBolus | EventKind::ProfileSwitch
            ) {
                continue;
            }
            let start = match t.timestamp() {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(index, id = ?t.id, error = %e, "skipping basal treatment");
                    timeline
                        .diagnostics
                        .push(InputDiagnostic::new(index, t.id.as_deref(), &e));
                    continue;
                }
            };
            match kind {
                EventKind::TempBasal => temps.push((start, index, t)),
                EventKind::ComboBolus => {
                    let rate = t.relative.unwrap_or(0.0);
                    let duration = t.duration_ms();
                    if rate > 0.0 && duration > 0 {
                        timeline.combos.push(ComboSegment {
                            id: t.id.clone(),
                            start,
                            end: start + duration,
                            rate,
                        });
                    }
                }
                EventKind::ProfileSwitch => switches.push((start, index, t)),
                _ => {}
            }
        }

        timeline.temp_basals = sweep_temp_basals(temps);
        timeline.switches = sweep_switches(switches);
        timeline.combos.sort_by_key(|c| c.start);
        timeline
    }

    pub fn temp_basals(&self) -> &[TempBasalSegment] {
        &self.temp_basals
    }

    pub fn diagnostics(&self) -> &[InputDiagnostic] {
        &self.diagnostics
    }

    pub fn temp_basal_at(&self, at: i64) -> Option<&TempBasalSegment> {
        // Segments never overlap after the sweep.
        self.temp_basals.iter().rev().find(|s| s.is_active(at))
    }

    fn combo_at(&self, at: i64) -> (f64, Option<&ComboSegment>) {
        // ---
        let mut rate = 0.0;
        let mut latest = None;
        for c in self.combos.iter().filter(|c| c.is_active(at)) {
            rate += c.rate;
            latest = Some(c);
        }
        (rate, latest)
    }

    /// Scheduled profile rate, honoring profile-switch scaling and shift.
    pub fn scheduled_rate(&self, profile: &ActiveProfile, at: i64) -> f64 {
        // ---
        match self.switches.iter().rev().find(|s| s.is_active(at)) {
            Some(s) => profile.basal_at(at + s.timeshift_ms) * s.percentage / 100.0,
            None => profile.basal_at(at),
        }
    }

    /// Effective basal state at `at`.
    pub fn resolve(&self, profile: &ActiveProfile, at: i64) -> TempBasalResult {
        // ---
        let basal = self.scheduled_rate(profile, at);
        let treatment = self.temp_basal_at(at);
        let tempbasal = treatment.map_or(basal, |t| t.rate(basal));
        let (combobolusbasal, combo) = self.combo_at(at);

        TempBasalResult {
            basal,
            treatment: treatment.cloned(),
            tempbasal,
            combobolustreatment: combo.cloned(),
            combobolusbasal,
            totalbasal: tempbasal + combobolusbasal,
        }
    }

    /// Integrate delivered basal over `[start, end)`.
    ///
    /// The effective rate is piecewise constant between event and schedule
    /// boundaries, so evaluating each piece at its midpoint is exact.
    pub fn delivered(&self, profile: &ActiveProfile, start: i64, end: i64) -> BasalDelivery {
        // ---
        let mut out = BasalDelivery::default();
        if end <= start {
            return out;
        }

        let points = self.breakpoints(profile, start, end);
        for pair in points.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b <= a {
                continue;
            }
            let hours = (b - a) as f64 / ONE_HOUR_MS as f64;
            let r = self.resolve(profile, a + (b - a) / 2);
            if r.treatment.is_some() {
                out.temp_basal += r.tempbasal * hours;
            } else {
                out.scheduled += r.basal * hours;
            }
            out.combo_bolus += r.combobolusbasal * hours;
        }
        out.total = out.scheduled + out.temp_basal + out.combo_bolus;
        out
    }

    /// Net insulin above (or below) the scheduled rate, as micro-boluses.
    ///
    /// The window `[start, end)` is cut into `chunk_ms` pieces; each yields
    /// `(chunk midpoint, units)`. Low temps give negative units.
    pub fn net_basal_doses(
        &self,
        profile: &ActiveProfile,
        start: i64,
        end: i64,
        chunk_ms: i64,
    ) -> Vec<(i64, f64)> {
        // ---
        let mut doses = Vec::new();
        if end <= start || chunk_ms <= 0 {
            return doses;
        }
        let mut from = start;
        while from < end {
            let to = (from + chunk_ms).min(end);
            let delivered = self.delivered(profile, from, to);
            let scheduled = self.scheduled_only(profile, from, to);
            let net = delivered.total - scheduled;
            if net != 0.0 {
                doses.push((from + (to - from) / 2, net));
            }
            from = to;
        }
        doses
    }

    fn scheduled_only(&self, profile: &ActiveProfile, start: i64, end: i64) -> f64 {
        // ---
        let points = self.breakpoints(profile, start, end);
        points
            .windows(2)
            .filter(|p| p[1] > p[0])
            .map(|p| {
                let hours = (p[1] - p[0]) as f64 / ONE_HOUR_MS as f64;
                self.scheduled_rate(profile, p[0] + (p[1] - p[0]) / 2) * hours
            })
            .sum()
    }

    fn breakpoints(&self, profile: &ActiveProfile, start: i64, end: i64) -> Vec<i64> {
        // ---
        let mut points = vec![start, end];
        let mut push = |p: i64| {
            if p > start && p < end {
                points.push(p);
            }
        };

        for s in &self.temp_basals {
            push(s.start);
            push(s.end);
        }
        for c in &self.combos {
            push(c.start);
            push(c.end);
        }

        let mut shifts = vec![0i64];
        for s in &self.switches {
            push(s.start);
            if let Some(e) = s.end {
                push(e);
            }
            shifts.push(s.timeshift_ms);
        }

        // Schedule boundaries for every day touched by the window.
        let offset = i64::from(profile.utc_offset_minutes) * ONE_MINUTE_MS;
        for shift in shifts {
            let local_start = start + offset + shift;
            let first_day = local_start.div_euclid(24 * ONE_HOUR_MS) - 1;
            let last_day = (end + offset + shift).div_euclid(24 * ONE_HOUR_MS) + 1;
            for day in first_day..=last_day {
                for entry in &profile.basal {
                    let local = day * 24 * ONE_HOUR_MS + i64::from(entry.time_as_seconds) * 1000;
                    push(local - offset - shift);
                }
            }
        }

        points.sort_unstable();
        points.dedup();
        points
    }
}

/// Order temp basals by start and truncate each at its successor's start.
fn sweep_temp_basals(mut temps: Vec<(i64, usize, &Treatment)>) -> Vec<TempBasalSegment> {
    // ---
    // Equal starts keep input order, so the later record wins.
    temps.sort_by_key(|(start, index, _)| (*start, *index));

    let mut segments: Vec<TempBasalSegment> = temps
        .iter()
        .map(|(start, _, t)| {
            let nominal_end = start + t.duration_ms();
            TempBasalSegment {
                id: t.id.clone(),
                start: *start,
                end: nominal_end,
                nominal_end,
                absolute: t.absolute,
                percent: t.percent,
                cuttedby: None,
                cutting: None,
                predecessor: None,
                successor: None,
            }
        })
        .collect();

    for i in 1..segments.len() {
        let next_start = segments[i].start;
        let prev = &mut segments[i - 1];
        if next_start < prev.nominal_end {
            prev.end = next_start.max(prev.start);
            prev.successor = Some(i);
            let prev_id = prev.id.clone();
            segments[i - 1].cuttedby = segments[i].id.clone();
            segments[i].predecessor = Some(i - 1);
            segments[i].cutting = prev_id;
        }
    }
    segments
}

fn sweep_switches(mut switches: Vec<(i64, usize, &Treatment)>) -> Vec<SwitchSegment> {
    // ---
    switches.sort_by_key(|(start, index, _)| (*start, *index));
    let mut out: Vec<SwitchSegment> = switches
        .iter()
        .map(|(start, _, t)| {
            let duration = t.duration_ms();
            SwitchSegment {
                start: *start,
                end: (duration > 0).then_some(start + duration),
                percentage: t.percentage.unwrap_or(100.0).max(0.0),
                timeshift_ms: (t.timeshift.unwrap_or(0.0) * ONE_HOUR_MS as f64).round() as i64,
            }
        })
        .collect();

    // A new switch ends whatever was active before it.
    for i in 1..out.len() {
        let next_start = out[i].start;
        let prev = &mut out[i - 1];
        if prev.end.map_or(true, |e| e > next_start) {
            prev.end = Some(next_start);
        }
    }
    out
}
