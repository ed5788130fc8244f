//! Data models shared by the store boundary and the analytics engine.
//!
//! Field names mirror the legacy JSON documents (`sgv`, `eventType`,
//! `enteredinsulin`, `cuttedby`, ...) so records read from the store and
//! results written back keep client compatibility.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, InputError};

// ---

pub const ONE_MINUTE_MS: i64 = 60_000;
pub const ONE_HOUR_MS: i64 = 60 * ONE_MINUTE_MS;
pub const ONE_DAY_MS: i64 = 24 * ONE_HOUR_MS;

/// A single CGM glucose reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    // ---
    /// Milliseconds since the Unix epoch.
    pub mills: i64,
    /// Glucose in mg/dL.
    #[serde(rename = "sgv")]
    pub mgdl: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filtered: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unfiltered: Option<f64>,
}

impl GlucoseReading {
    pub fn new(mills: i64, mgdl: f64) -> Self {
        // ---
        Self {
            mills,
            mgdl,
            noise: None,
            filtered: None,
            unfiltered: None,
        }
    }
}

/// Row shape of the `entries` table.
#[derive(Debug, sqlx::FromRow)]
pub struct EntryRow {
    // ---
    pub mills: i64,
    pub sgv: f64,
    pub noise: Option<i16>,
    pub filtered: Option<f64>,
    pub unfiltered: Option<f64>,
}

impl EntryRow {
    pub fn to_reading(&self) -> GlucoseReading {
        // ---
        GlucoseReading {
            mills: self.mills,
            mgdl: self.sgv,
            noise: self.noise.and_then(|n| u8::try_from(n).ok()),
            filtered: self.filtered,
            unfiltered: self.unfiltered,
        }
    }
}

/// Sort by timestamp. Readings come from the store ordered, but callers are
/// allowed to hand over unordered series.
pub fn sort_readings(readings: &mut [GlucoseReading]) {
    readings.sort_by_key(|r| r.mills);
}

// ---

/// Classified treatment event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Bolus,
    TempBasal,
    ComboBolus,
    Carbs,
    ProfileSwitch,
    TempTarget,
    SiteChange,
    SensorChange,
    BatteryChange,
    BgCheck,
    Other,
}

impl EventKind {
    /// Map a legacy `eventType` string onto a kind.
    pub fn from_event_type(event_type: &str) -> Self {
        // ---
        match event_type {
            "Bolus" | "Meal Bolus" | "Snack Bolus" | "Correction Bolus" | "SMB" => Self::Bolus,
            "Temp Basal" | "Temp Basal Start" | "Temp Basal End" => Self::TempBasal,
            "Combo Bolus" => Self::ComboBolus,
            "Carbs" | "Carb Correction" => Self::Carbs,
            "Profile Switch" => Self::ProfileSwitch,
            "Temporary Target" => Self::TempTarget,
            "Site Change" => Self::SiteChange,
            "Sensor Change" | "Sensor Start" => Self::SensorChange,
            "Pump Battery Change" => Self::BatteryChange,
            "BG Check" => Self::BgCheck,
            _ => Self::Other,
        }
    }
}

/// A treatment record as stored by the legacy API.
///
/// Every numeric field is optional; which ones are meaningful depends on
/// `eventType`. Treatments are read-only inputs to the analytics engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
    // ---
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mills: Option<i64>,
    #[serde(rename = "created_at", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protein: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fat: Option<f64>,

    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Relative temp-basal change in percent (-100 = zero temp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    /// Absolute temp-basal rate, U/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absolute: Option<f64>,
    /// Extended combo-bolus rate, U/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_now: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_ext: Option<f64>,
    #[serde(rename = "enteredinsulin", default, skip_serializing_if = "Option::is_none")]
    pub entered_insulin: Option<f64>,

    /// Profile-switch scaling, percent of the scheduled basal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    /// Profile-switch schedule shift, hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeshift: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuttedby: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cutting: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Treatment {
    // ---
    pub fn kind(&self) -> EventKind {
        EventKind::from_event_type(&self.event_type)
    }

    /// Resolve the event time in epoch milliseconds.
    ///
    /// `mills` wins when present; otherwise `created_at` must be RFC 3339.
    pub fn timestamp(&self) -> Result<i64, InputError> {
        // ---
        if let Some(mills) = self.mills.filter(|m| *m > 0) {
            return Ok(mills);
        }
        match self.created_at.as_deref() {
            None | Some("") => Err(InputError::MissingTimestamp),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.timestamp_millis())
                .map_err(|_| InputError::MalformedTimestamp(raw.to_owned())),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        let minutes = self.duration.unwrap_or(0.0).max(0.0);
        (minutes * ONE_MINUTE_MS as f64).round() as i64
    }

    /// Immediately delivered insulin, units.
    pub fn bolus_units(&self) -> f64 {
        // ---
        match self.kind() {
            EventKind::Bolus | EventKind::ComboBolus | EventKind::Carbs | EventKind::Other => {
                self.insulin.unwrap_or(0.0).max(0.0)
            }
            _ => 0.0,
        }
    }

    pub fn carb_grams(&self) -> f64 {
        self.carbs.unwrap_or(0.0).max(0.0)
    }
}

/// Row shape of the `treatments` table; the document is stored as JSON text.
#[derive(Debug, sqlx::FromRow)]
pub struct TreatmentRow {
    pub id: String,
    pub doc: String,
}

// ---

/// Free-text fields that must be stripped of markup before display.
///
/// The list is spelled out per entity instead of being discovered at
/// runtime.
pub trait Sanitizable {
    fn text_fields_mut(&mut self) -> Vec<&mut Option<String>>;

    fn sanitize(&mut self) {
        // ---
        for field in self.text_fields_mut() {
            if let Some(text) = field.as_mut() {
                if text.contains(['<', '>']) {
                    *text = strip_markup(text);
                }
            }
        }
    }
}

impl Sanitizable for Treatment {
    fn text_fields_mut(&mut self) -> Vec<&mut Option<String>> {
        vec![&mut self.notes, &mut self.entered_by, &mut self.reason]
    }
}

fn strip_markup(text: &str) -> String {
    // ---
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

// ---

/// One entry of a time-of-day schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// `HH:MM`, informational.
    #[serde(default)]
    pub time: String,
    pub time_as_seconds: u32,
    pub value: f64,
}

impl ScheduleEntry {
    pub fn new(time_as_seconds: u32, value: f64) -> Self {
        // ---
        Self {
            time: format!(
                "{:02}:{:02}",
                time_as_seconds / 3600,
                (time_as_seconds % 3600) / 60
            ),
            time_as_seconds,
            value,
        }
    }
}

/// The profile in effect for an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveProfile {
    // ---
    /// Duration of insulin action, hours.
    pub dia: f64,
    /// Carb absorption rate, g/h.
    #[serde(default = "default_carbs_hr")]
    pub carbs_hr: f64,
    /// Minutes before carbs start absorbing.
    #[serde(default = "default_carb_delay")]
    pub delay: f64,
    pub basal: Vec<ScheduleEntry>,
    #[serde(default)]
    pub carbratio: Vec<ScheduleEntry>,
    #[serde(default)]
    pub sens: Vec<ScheduleEntry>,
    #[serde(default)]
    pub target_low: Vec<ScheduleEntry>,
    #[serde(default)]
    pub target_high: Vec<ScheduleEntry>,
    /// Offset of the profile's local time from UTC.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_carbs_hr() -> f64 {
    30.0
}

fn default_carb_delay() -> f64 {
    20.0
}

impl ActiveProfile {
    /// Flat profile with a single basal rate.
    pub fn with_flat_basal(dia: f64, basal: f64) -> Self {
        // ---
        Self {
            dia,
            carbs_hr: default_carbs_hr(),
            delay: default_carb_delay(),
            basal: vec![ScheduleEntry::new(0, basal)],
            carbratio: Vec::new(),
            sens: Vec::new(),
            target_low: Vec::new(),
            target_high: Vec::new(),
            utc_offset_minutes: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // ---
        if !(self.dia > 0.0) {
            return Err(ConfigError::NonPositive {
                name: "profile dia",
                value: self.dia,
            });
        }
        if !(self.carbs_hr > 0.0) {
            return Err(ConfigError::NonPositive {
                name: "profile carbs_hr",
                value: self.carbs_hr,
            });
        }
        if !(self.delay >= 0.0) {
            return Err(ConfigError::NonPositive {
                name: "profile delay",
                value: self.delay,
            });
        }
        Ok(())
    }

    /// Seconds since local midnight for an epoch instant.
    pub fn local_seconds_of_day(&self, mills: i64) -> u32 {
        // ---
        let local = mills + i64::from(self.utc_offset_minutes) * ONE_MINUTE_MS;
        (local.rem_euclid(ONE_DAY_MS) / 1000) as u32
    }

    pub fn basal_at(&self, mills: i64) -> f64 {
        schedule_value(&self.basal, self.local_seconds_of_day(mills)).unwrap_or(0.0)
    }
}

/// Value of the last entry starting at or before `seconds`.
///
/// Entries before the first listed start wrap around to the last entry of
/// the previous day.
pub fn schedule_value(schedule: &[ScheduleEntry], seconds: u32) -> Option<f64> {
    // ---
    schedule
        .iter()
        .filter(|e| e.time_as_seconds <= seconds)
        .max_by_key(|e| e.time_as_seconds)
        .or_else(|| schedule.iter().max_by_key(|e| e.time_as_seconds))
        .map(|e| e.value)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn create_test_treatment(event_type: &str) -> Treatment {
        // ---
        Treatment {
            id: Some("t-1".to_string()),
            event_type: event_type.to_string(),
            mills: Some(1_700_000_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn test_event_kind_mapping() {
        // ---
        assert_eq!(EventKind::from_event_type("Meal Bolus"), EventKind::Bolus);
        assert_eq!(EventKind::from_event_type("Temp Basal"), EventKind::TempBasal);
        assert_eq!(EventKind::from_event_type("Combo Bolus"), EventKind::ComboBolus);
        assert_eq!(EventKind::from_event_type("Sensor Start"), EventKind::SensorChange);
        assert_eq!(EventKind::from_event_type("Announcement"), EventKind::Other);
    }

    #[test]
    fn test_timestamp_resolution() {
        // ---
        let t = create_test_treatment("Bolus");
        assert_eq!(t.timestamp(), Ok(1_700_000_000_000));

        let from_iso = Treatment {
            mills: None,
            created_at: Some("2023-11-14T22:13:20Z".to_string()),
            ..create_test_treatment("Bolus")
        };
        assert_eq!(from_iso.timestamp(), Ok(1_700_000_000_000));

        let missing = Treatment {
            mills: None,
            ..create_test_treatment("Bolus")
        };
        assert_eq!(missing.timestamp(), Err(InputError::MissingTimestamp));

        let garbage = Treatment {
            mills: None,
            created_at: Some("yesterday-ish".to_string()),
            ..create_test_treatment("Bolus")
        };
        assert!(matches!(
            garbage.timestamp(),
            Err(InputError::MalformedTimestamp(_))
        ));
    }

    #[test]
    fn test_legacy_field_names() {
        // ---
        let json = r#"{
            "_id": "abc",
            "eventType": "Combo Bolus",
            "created_at": "2024-01-01T00:00:00Z",
            "insulin": 2.0,
            "enteredinsulin": 4.0,
            "splitNow": 50,
            "splitExt": 50,
            "relative": 2.0,
            "duration": 60,
            "cuttedby": "xyz"
        }"#;
        let t: Treatment = serde_json::from_str(json).unwrap();
        assert_eq!(t.kind(), EventKind::ComboBolus);
        assert_eq!(t.entered_insulin, Some(4.0));
        assert_eq!(t.split_now, Some(50.0));
        assert_eq!(t.cuttedby.as_deref(), Some("xyz"));
        assert_eq!(t.bolus_units(), 2.0);
        assert_eq!(t.duration_ms(), 60 * ONE_MINUTE_MS);
    }

    #[test]
    fn test_sanitize_strips_markup() {
        // ---
        let mut t = Treatment {
            notes: Some("<b>pizza</b> night".to_string()),
            entered_by: Some("loop".to_string()),
            ..create_test_treatment("Carbs")
        };
        t.sanitize();
        assert_eq!(t.notes.as_deref(), Some("pizza night"));
        assert_eq!(t.entered_by.as_deref(), Some("loop"));
    }

    #[test]
    fn test_schedule_lookup() {
        // ---
        let mut profile = ActiveProfile::with_flat_basal(3.0, 0.8);
        profile.basal = vec![
            ScheduleEntry::new(0, 0.8),
            ScheduleEntry::new(6 * 3600, 1.2),
            ScheduleEntry::new(22 * 3600, 0.6),
        ];

        // 07:00 UTC
        assert_eq!(profile.basal_at(7 * ONE_HOUR_MS), 1.2);
        // 23:30 UTC
        assert_eq!(profile.basal_at(23 * ONE_HOUR_MS + 30 * ONE_MINUTE_MS), 0.6);

        // Local time two hours ahead of UTC: 05:00 UTC is 07:00 local
        profile.utc_offset_minutes = 120;
        assert_eq!(profile.basal_at(5 * ONE_HOUR_MS), 1.2);
    }

    #[test]
    fn test_profile_validation() {
        // ---
        assert!(ActiveProfile::with_flat_basal(3.0, 1.0).validate().is_ok());
        assert!(ActiveProfile::with_flat_basal(0.0, 1.0).validate().is_err());
        assert!(ActiveProfile::with_flat_basal(-2.0, 1.0).validate().is_err());
    }
}
