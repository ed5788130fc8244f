//! PostgreSQL implementation of the analytics store boundary.
//!
//! Readings live in typed columns; treatments, profiles and computed
//! rollups are kept as JSON documents so legacy field names survive
//! untouched.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::analytics::rollup::{GlucoseStore, PeriodStatistics};
use crate::error::StoreError;
use crate::models::{
    ActiveProfile, EntryRow, GlucoseReading, Sanitizable, Treatment, TreatmentRow,
};

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GlucoseStore for PgStore {
    async fn fetch_readings(
        &self,
        account: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<GlucoseReading>, StoreError> {
        // ---
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT mills, sgv, noise, filtered, unfiltered
            FROM entries
            WHERE account_id = $1 AND mills BETWEEN $2 AND $3
            ORDER BY mills
            "#,
        )
        .bind(account)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        debug!(account, count = rows.len(), "readings fetched");
        Ok(rows.iter().map(EntryRow::to_reading).collect())
    }

    async fn fetch_treatments(
        &self,
        account: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Treatment>, StoreError> {
        // ---
        let rows: Vec<TreatmentRow> = sqlx::query_as(
            r#"
            SELECT id, doc
            FROM treatments
            WHERE account_id = $1 AND mills BETWEEN $2 AND $3
            ORDER BY mills
            "#,
        )
        .bind(account)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let mut treatments = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<Treatment>(&row.doc) {
                Ok(mut t) => {
                    if t.id.is_none() {
                        t.id = Some(row.id);
                    }
                    t.sanitize();
                    treatments.push(t);
                }
                // One unreadable document must not hide the rest.
                Err(e) => {
                    warn!(account, id = %row.id, error = %e, "skipping undecodable treatment");
                }
            }
        }

        debug!(account, count = treatments.len(), "treatments fetched");
        Ok(treatments)
    }

    async fn latest_reading_mills(&self, account: &str) -> Result<Option<i64>, StoreError> {
        // ---
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(mills) FROM entries WHERE account_id = $1")
                .bind(account)
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    async fn fetch_profile(&self, account: &str) -> Result<Option<ActiveProfile>, StoreError> {
        // ---
        let doc: Option<String> =
            sqlx::query_scalar("SELECT doc FROM profiles WHERE account_id = $1")
                .bind(account)
                .fetch_optional(&self.pool)
                .await?;

        doc.map(|doc| {
            serde_json::from_str::<ActiveProfile>(&doc).map_err(|source| StoreError::Decode {
                what: format!("profile of {}", account),
                source,
            })
        })
        .transpose()
    }

    async fn save_period_statistics(&self, stats: &PeriodStatistics) -> Result<(), StoreError> {
        // ---
        let doc = serde_json::to_string(stats).map_err(|source| StoreError::Encode {
            what: format!("{}-day statistics of {}", stats.period_days, stats.account_id),
            source,
        })?;

        sqlx::query(
            r#"
            INSERT INTO period_statistics (
                id, account_id, period_days, as_of, last_updated,
                has_sufficient_data, reading_count, doc
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id, period_days) DO UPDATE SET
                id = EXCLUDED.id,
                as_of = EXCLUDED.as_of,
                last_updated = EXCLUDED.last_updated,
                has_sufficient_data = EXCLUDED.has_sufficient_data,
                reading_count = EXCLUDED.reading_count,
                doc = EXCLUDED.doc
            "#,
        )
        .bind(stats.id)
        .bind(&stats.account_id)
        .bind(stats.period_days as i32)
        .bind(stats.as_of)
        .bind(stats.last_updated)
        .bind(stats.has_sufficient_data)
        .bind(stats.reading_count as i64)
        .bind(doc)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
