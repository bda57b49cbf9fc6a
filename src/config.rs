//! Pipeline configuration
//!
//! All tunables live here so the pipeline and its shared services are
//! constructed explicitly at startup instead of reading globals. Upstream
//! endpoints come from the environment (or CLI flags) via
//! [`EndpointConfig::from_env`].

use crate::error::{CostPipeError, Result};
use crate::resilience::RetryPolicy;
use std::env;
use std::time::Duration;

/// Environment variable naming the aggregated cost API endpoint
pub const API_URL_ENV: &str = "COSTPIPE_API_URL";
/// Environment variable naming the warehouse query endpoint
pub const WAREHOUSE_URL_ENV: &str = "COSTPIPE_WAREHOUSE_URL";

/// Tunables for the pipeline and its shared services
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Currency for synthetic zero points and unit-less upstream values
    pub default_currency: String,
    /// TTL for cached query results
    pub cache_ttl: Duration,
    /// Interval of the background cache sweeper
    pub sweep_interval: Duration,
    /// Pause between warehouse status polls
    pub poll_interval: Duration,
    /// Polling ceiling per warehouse execution
    pub max_poll_attempts: u32,
    /// Retry policy applied to each upstream call chain
    pub retry: RetryPolicy,
    /// Consecutive failures before a breaker trips
    pub breaker_failure_threshold: u32,
    /// How long a tripped breaker stays open
    pub breaker_reset_timeout: Duration,
    /// Label of the aggregated top-N remainder bucket
    pub other_label: String,
    /// Tag keys accepted in filters; empty accepts any key
    pub allowed_tag_keys: Vec<String>,
    /// Prediction interval level for forecasts, in percent
    pub forecast_confidence: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            cache_ttl: crate::cache::DEFAULT_TTL,
            sweep_interval: Duration::from_secs(600),
            poll_interval: Duration::from_secs(5),
            max_poll_attempts: 60,
            retry: RetryPolicy::default(),
            breaker_failure_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(30),
            other_label: crate::top_n::DEFAULT_OTHER_LABEL.to_string(),
            allowed_tag_keys: Vec::new(),
            forecast_confidence: 80,
        }
    }
}

impl PipelineConfig {
    /// Set the default currency
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.default_currency = currency.into();
        self
    }

    /// Set the cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Restrict filterable tag keys
    pub fn with_allowed_tag_keys(mut self, keys: Vec<String>) -> Self {
        self.allowed_tag_keys = keys;
        self
    }
}

/// Upstream endpoints
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Base URL of the aggregated cost API
    pub api_url: String,
    /// Base URL of the warehouse query service
    pub warehouse_url: String,
}

impl EndpointConfig {
    /// Read both endpoints from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_url: require_env(API_URL_ENV)?,
            warehouse_url: require_env(WAREHOUSE_URL_ENV)?,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name)
        .map_err(|_| CostPipeError::Config(format!("environment variable {name} is not set")))
}
