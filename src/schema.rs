//! Database schema management for `codemetal-glucoflow`.
//!
//! Ensures required tables and indexes exist before serving requests.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `entries` (CGM readings), `treatments` and `profiles` (JSON
/// documents with their legacy field names) and `period_statistics` (the
/// latest rollup per account and period). Safe to call on every startup.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id          BIGSERIAL PRIMARY KEY,
            account_id  TEXT             NOT NULL,
            mills       BIGINT           NOT NULL,
            sgv         DOUBLE PRECISION NOT NULL,
            noise       SMALLINT,
            filtered    DOUBLE PRECISION,
            unfiltered  DOUBLE PRECISION,
            UNIQUE (account_id, mills)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS treatments (
            id          TEXT    PRIMARY KEY,
            account_id  TEXT    NOT NULL,
            mills       BIGINT  NOT NULL,
            event_type  TEXT    NOT NULL,
            doc         TEXT    NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profiles (
            account_id  TEXT        PRIMARY KEY,
            doc         TEXT        NOT NULL,
            updated_at  TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS period_statistics (
            id                   UUID    PRIMARY KEY,
            account_id           TEXT    NOT NULL,
            period_days          INTEGER NOT NULL,
            as_of                BIGINT  NOT NULL,
            last_updated         BIGINT  NOT NULL,
            has_sufficient_data  BOOLEAN NOT NULL,
            reading_count        BIGINT  NOT NULL,
            doc                  TEXT    NOT NULL,
            UNIQUE (account_id, period_days)
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Window scans are always per account and time-ordered
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_entries_account_mills
            ON entries (account_id, mills);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_treatments_account_mills
            ON treatments (account_id, mills);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
