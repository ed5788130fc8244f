//! Application entry point for the `codemetal-glucoflow` analytics service.
//!
//! Startup sequence:
//! - Load configuration from environment variables or `.env`
//! - Initialize structured logging/tracing
//! - Establish a PostgreSQL connection pool
//! - Create the database schema if it does not exist
//! - Mount the analytics read routes via the `routes` gateway (EMBP)
//! - Bind the Axum HTTP server and serve requests
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `DB_POOL_MAX` (optional) – maximum number of DB connections (default: 5)
//! - `BIND_ADDR` (optional) – listen address (default: `0.0.0.0:8080`)
//! - `GLUCOFLOW_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `GLUCOFLOW_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! Analytics parameters are documented on [`glucoflow::config::load_from_env`].
use std::{env, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use glucoflow::routes::{self, AppState};
use glucoflow::{config, schema, PgStore};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!("Successfully connected to database");

    schema::create_schema(&pool).await?;

    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid BIND_ADDR '{}'", cfg.bind_addr))?;

    // Build app from routes gateway (EMBP)
    let state = AppState::new(Arc::new(PgStore::new(pool)), cfg);
    let app: Router = routes::router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// - Color output: `FORCE_COLOR=1|true|yes` forces it on,
///   `FORCE_COLOR=0|false|no` forces it off, otherwise TTY detection
/// - Span events via `GLUCOFLOW_SPAN_EVENTS`: `"full"`, `"enter_exit"`,
///   anything else emits CLOSE only
/// - Level via `RUST_LOG` if set, else `GLUCOFLOW_LOG_LEVEL`
fn init_tracing() {
    // ---
    let span_events = match env::var("GLUCOFLOW_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("GLUCOFLOW_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
