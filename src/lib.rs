//! Glucose and insulin analytics for legacy diabetes-data clients.
//!
//! The crate follows the Explicit Module Boundary Pattern (EMBP): each
//! top-level module is a gateway that re-exports what its siblings need,
//! and `main.rs` only wires startup.
//!
//! - [`analytics`]: the computation engine (decay curves, IOB/COB, temp
//!   basals, statistics, data quality, AR2 forecasting, rollups)
//! - [`config`]: environment-driven configuration
//! - [`store`]: PostgreSQL implementation of the store boundary
//! - [`schema`]: idempotent table creation
//! - [`routes`]: HTTP read surface

pub mod analytics;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod schema;
pub mod store;

pub use config::{AnalyticsConfig, Config, GlycemicThresholds};
pub use error::{AnalyticsError, ConfigError, InputDiagnostic, InputError, StoreError};
pub use models::{ActiveProfile, GlucoseReading, ScheduleEntry, Treatment};
pub use store::PgStore;
