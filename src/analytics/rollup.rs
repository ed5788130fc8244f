//! Multi-period rollups.
//!
//! A rollup fetches the widest window once (plus the treatment lookback
//! needed to capture decay already in progress), then slices it per period
//! and runs the statistics, data quality and treatment summary passes on
//! each slice independently. Cancellation is honored only while the fetch
//! is pending; once the series are in hand the computation runs to the end.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::quality::{self, DataQuality};
use crate::analytics::stats::{self, BasicGlucoseStats, TimeInRangeMetrics};
use crate::analytics::treatments::{self, TreatmentSummary};
use crate::analytics::variability::{self, GlycemicVariability};
use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, StoreError};
use crate::models::{sort_readings, ActiveProfile, GlucoseReading, Treatment, ONE_DAY_MS};

// ---

/// Source of raw series and sink for computed rollups.
#[async_trait]
pub trait GlucoseStore: Send + Sync {
    /// Readings with `start <= mills <= end`, in any order.
    async fn fetch_readings(
        &self,
        account: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<GlucoseReading>, StoreError>;

    /// Treatments with `start <= mills <= end`, in any order.
    async fn fetch_treatments(
        &self,
        account: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Treatment>, StoreError>;

    /// Timestamp of the newest stored reading.
    async fn latest_reading_mills(&self, account: &str) -> Result<Option<i64>, StoreError>;

    async fn fetch_profile(&self, account: &str) -> Result<Option<ActiveProfile>, StoreError>;

    async fn save_period_statistics(&self, stats: &PeriodStatistics) -> Result<(), StoreError>;
}

/// Everything computed for one account and period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStatistics {
    // ---
    pub id: Uuid,
    pub account_id: String,
    pub period_days: u32,
    /// Window end, epoch ms.
    pub as_of: i64,
    pub window_start: i64,
    /// Wall-clock time the statistics were computed, epoch ms.
    pub last_updated: i64,
    pub has_sufficient_data: bool,
    pub reading_count: usize,
    pub treatment_count: usize,
    pub basic: BasicGlucoseStats,
    pub time_in_range: TimeInRangeMetrics,
    pub variability: GlycemicVariability,
    pub data_quality: DataQuality,
    pub treatment_summary: TreatmentSummary,
}

impl PeriodStatistics {
    /// True when `mills` falls in the window this rollup summarizes, or
    /// after it (the window slides forward with new data).
    pub fn covers(&self, mills: i64) -> bool {
        mills >= self.window_start
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupReport {
    pub account_id: String,
    pub as_of: i64,
    pub periods: Vec<PeriodStatistics>,
}

struct Fetched {
    readings: Vec<GlucoseReading>,
    treatments: Vec<Treatment>,
    profile: Option<ActiveProfile>,
}

/// Runs rollups for every configured period.
pub struct RollupOrchestrator {
    store: Arc<dyn GlucoseStore>,
    config: AnalyticsConfig,
    cache: Arc<StatisticsCache>,
}

impl RollupOrchestrator {
    pub fn new(
        store: Arc<dyn GlucoseStore>,
        config: AnalyticsConfig,
        cache: Arc<StatisticsCache>,
    ) -> Self {
        // ---
        Self {
            store,
            config,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<StatisticsCache> {
        &self.cache
    }

    /// Compute every period as of `now` without persisting.
    ///
    /// `cancel` aborts the computation with [`AnalyticsError::Cancelled`] if
    /// it completes before the fetch does.
    pub async fn run<C>(
        &self,
        account: &str,
        now: i64,
        cancel: C,
    ) -> Result<RollupReport, AnalyticsError>
    where
        C: Future<Output = ()>,
    {
        // ---
        self.config.validate()?;

        let fetched = tokio::select! {
            biased;
            _ = cancel => {
                warn!(account, "rollup cancelled during fetch");
                return Err(AnalyticsError::Cancelled);
            }
            fetched = self.fetch(account, now) => fetched?,
        };
        if let Some(profile) = &fetched.profile {
            profile.validate()?;
        }

        let mut periods = self.config.periods_days.clone();
        periods.sort_unstable();
        periods.dedup();

        let periods = periods
            .into_iter()
            .map(|days| {
                compute_period(
                    account,
                    days,
                    now,
                    &fetched.readings,
                    &fetched.treatments,
                    fetched.profile.as_ref(),
                    &self.config,
                )
            })
            .collect::<Vec<_>>();

        info!(
            account,
            readings = fetched.readings.len(),
            treatments = fetched.treatments.len(),
            periods = periods.len(),
            "rollup computed"
        );

        Ok(RollupReport {
            account_id: account.to_string(),
            as_of: now,
            periods,
        })
    }

    /// Compute, persist every period, and publish to the cache.
    pub async fn refresh<C>(
        &self,
        account: &str,
        now: i64,
        cancel: C,
    ) -> Result<RollupReport, AnalyticsError>
    where
        C: Future<Output = ()>,
    {
        // ---
        let report = self.run(account, now, cancel).await?;
        for period in &report.periods {
            self.store.save_period_statistics(period).await?;
        }
        for period in &report.periods {
            self.cache.publish(period.clone());
        }
        Ok(report)
    }

    async fn fetch(&self, account: &str, now: i64) -> Result<Fetched, StoreError> {
        // ---
        let widest = self.config.periods_days.iter().copied().max().unwrap_or(1);
        let start = now - i64::from(widest) * ONE_DAY_MS;

        let profile = self.store.fetch_profile(account).await?;
        let dia_hours = profile.as_ref().map_or(self.config.dia_hours, |p| p.dia);
        let lookback = self.config.treatment_lookback_ms(dia_hours);

        let mut readings = self.store.fetch_readings(account, start, now).await?;
        let treatments = self
            .store
            .fetch_treatments(account, start - lookback, now)
            .await?;
        sort_readings(&mut readings);

        debug!(account, start, now, lookback, "rollup series fetched");
        Ok(Fetched {
            readings,
            treatments,
            profile,
        })
    }
}

/// Statistics for `[now - period_days, now]`.
///
/// `readings` must be sorted. `treatments` may extend before the window;
/// only the basal integration looks at the lookback. Below the minimum
/// reading count every derived statistic is zero and
/// `has_sufficient_data` is false.
pub fn compute_period(
    account: &str,
    period_days: u32,
    now: i64,
    readings: &[GlucoseReading],
    treatments: &[Treatment],
    profile: Option<&ActiveProfile>,
    config: &AnalyticsConfig,
) -> PeriodStatistics {
    // ---
    let window_start = now - i64::from(period_days) * ONE_DAY_MS;
    let from = readings.partition_point(|r| r.mills < window_start);
    let to = readings.partition_point(|r| r.mills <= now);
    let slice = &readings[from..to.max(from)];

    let treatment_count = treatments
        .iter()
        .filter_map(|t| t.timestamp().ok())
        .filter(|ts| *ts >= window_start && *ts <= now)
        .count();

    let mut out = PeriodStatistics {
        id: Uuid::new_v4(),
        account_id: account.to_string(),
        period_days,
        as_of: now,
        window_start,
        last_updated: chrono::Utc::now().timestamp_millis(),
        has_sufficient_data: slice.len() >= config.min_sufficient_readings,
        reading_count: slice.len(),
        treatment_count,
        basic: BasicGlucoseStats::default(),
        time_in_range: TimeInRangeMetrics::default(),
        variability: GlycemicVariability::default(),
        data_quality: DataQuality::default(),
        treatment_summary: TreatmentSummary::default(),
    };
    if !out.has_sufficient_data {
        debug!(account, period_days, readings = slice.len(), "insufficient data for period");
        return out;
    }

    out.basic = stats::basic_stats(slice);
    out.time_in_range = stats::time_in_range(slice, config);
    out.variability = variability::glycemic_variability(
        slice,
        out.time_in_range.percentages.target / 100.0,
        config.interval_ms(),
        config.utc_offset_minutes,
    );
    out.data_quality = quality::analyze(slice, treatments, window_start, now, config);
    out.treatment_summary = treatments::summarize(treatments, profile, window_start, now);
    out
}

// ---

/// Account-keyed cache of the latest rollup per period.
///
/// Entries are immutable once published; readers clone the `Arc` and never
/// observe a half-written rollup.
#[derive(Debug, Default)]
pub struct StatisticsCache {
    entries: RwLock<HashMap<(String, u32), Arc<PeriodStatistics>>>,
}

impl StatisticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, stats: PeriodStatistics) -> Arc<PeriodStatistics> {
        // ---
        let stats = Arc::new(stats);
        self.entries.write().insert(
            (stats.account_id.clone(), stats.period_days),
            Arc::clone(&stats),
        );
        stats
    }

    pub fn get(&self, account: &str, period_days: u32) -> Option<Arc<PeriodStatistics>> {
        self.entries
            .read()
            .get(&(account.to_string(), period_days))
            .cloned()
    }

    /// Cached rollups for every requested period, or `None` if any is
    /// missing or older than `max_age_ms` at `now`.
    pub fn get_all(
        &self,
        account: &str,
        periods: &[u32],
        now: i64,
        max_age_ms: i64,
    ) -> Option<Vec<Arc<PeriodStatistics>>> {
        // ---
        let entries = self.entries.read();
        let mut out = Vec::with_capacity(periods.len());
        for days in periods {
            let hit = entries.get(&(account.to_string(), *days))?;
            if now - hit.as_of > max_age_ms {
                return None;
            }
            out.push(Arc::clone(hit));
        }
        out.sort_by_key(|s| s.period_days);
        Some(out)
    }

    /// Drop every cached period of `account` whose window covers a reading
    /// that just arrived at `reading_mills`. Returns how many were dropped.
    pub fn invalidate(&self, account: &str, reading_mills: i64) -> usize {
        // ---
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(acct, _), stats| acct != account || !stats.covers(reading_mills));
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(account, reading_mills, dropped, "statistics invalidated");
        }
        dropped
    }
}
