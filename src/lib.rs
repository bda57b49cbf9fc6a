//! costpipe - Unified cost data pipeline for cloud billing reports
//!
//! This library provides functionality to:
//! - Query a low-latency aggregated cost API and an async SQL warehouse
//!   behind one normalized schema
//! - Gap-fill sparse series so every period in a range has a point
//! - Rank services into top-N leaders plus an aggregated remainder
//! - Compute period-over-period trends and fetch forecasts
//! - Memoize results with TTL caching, and guard upstreams with retry
//!   and per-dependency circuit breakers
//!
//! # Examples
//!
//! ```no_run
//! use costpipe::{
//!     config::PipelineConfig,
//!     cost_api::HttpCostApi,
//!     filters::{CostFilters, RangePreset},
//!     pipeline::CostPipeline,
//!     warehouse::HttpWarehouse,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> costpipe::Result<()> {
//!     let pipeline = CostPipeline::new(
//!         Arc::new(HttpCostApi::new("https://costs.internal")),
//!         Arc::new(HttpWarehouse::new("https://warehouse.internal")),
//!         PipelineConfig::default(),
//!     );
//!
//!     let today = chrono::Utc::now().date_naive();
//!     let filters = CostFilters::from_preset(RangePreset::Last12Months, today);
//!     let outcome = pipeline.get_timeseries(&filters).await?;
//!
//!     if let Some(series) = outcome.ready() {
//!         println!("total: {:.2}", series.total());
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod cost_api;
pub mod error;
pub mod filters;
pub mod gap_filler;
pub mod pipeline;
pub mod resilience;
pub mod top_n;
pub mod trend;
pub mod types;
pub mod warehouse;

// Re-export commonly used types
pub use error::{CostPipeError, Result};
pub use pipeline::{CostPipeline, SeriesOutcome};
pub use types::{CostPoint, CostSeries, DataSource, Granularity, TimePeriod};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
