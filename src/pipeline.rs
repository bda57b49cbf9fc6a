//! Pipeline orchestrator
//!
//! Composes the layers in order: cache -> circuit breaker -> retry ->
//! adapter -> gap fill -> aggregate -> trend. The cache store and the two
//! per-dependency breakers are the only process-wide shared state; they are
//! constructed here and injected, never global.
//!
//! Operations that exhaust retries or hit an open breaker resolve to
//! [`SeriesOutcome::Unavailable`] instead of an error, so dashboards can
//! render a specific "data temporarily unavailable" state. Validation
//! failures and terminal query failures still surface as errors.

use crate::cache::{CacheStats, ResilientCache};
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::cost_api::{AggregatedCostSource, CostApiAdapter, GroupBy};
use crate::error::{CostPipeError, Result};
use crate::filters::CostFilters;
use crate::resilience::{CircuitBreaker, RetryPolicy};
use crate::top_n::{TopNProcessor, TopNResult};
use crate::trend::{self, Trend};
use crate::types::{CostSeries, ForecastPoint};
use crate::warehouse::{QueryExecutor, WarehouseAdapter, WarehouseQuerySource};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of a pipeline operation
///
/// `Unavailable` is the degraded state for transient outages (retries
/// exhausted, circuit open); callers should render it as "temporarily
/// unavailable" rather than a generic failure, and must not retry it in a
/// tight loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SeriesOutcome<T> {
    /// The data, normalized and gap-filled
    Ready {
        /// Payload
        data: T,
    },
    /// Data temporarily unavailable due to an upstream outage
    Unavailable {
        /// Human-readable cause
        reason: String,
    },
}

impl<T> SeriesOutcome<T> {
    /// The payload, when ready
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready { data } => Some(data),
            Self::Unavailable { .. } => None,
        }
    }

    /// Whether the operation produced data
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// The unified cost data pipeline
pub struct CostPipeline {
    api: CostApiAdapter,
    warehouse: WarehouseAdapter,
    cache: Arc<ResilientCache>,
    api_breaker: CircuitBreaker,
    warehouse_breaker: CircuitBreaker,
    retry: RetryPolicy,
    top_n: TopNProcessor,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
}

impl CostPipeline {
    /// Build a pipeline over the two upstream sources with the real clock
    pub fn new(
        api_source: Arc<dyn AggregatedCostSource>,
        warehouse_source: Arc<dyn WarehouseQuerySource>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_clock(api_source, warehouse_source, config, Arc::new(SystemClock))
    }

    /// Build a pipeline with an injected clock; tests pass a manual clock so
    /// polling, backoff and TTLs run without real delay
    pub fn with_clock(
        api_source: Arc<dyn AggregatedCostSource>,
        warehouse_source: Arc<dyn WarehouseQuerySource>,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let api = CostApiAdapter::new(api_source, config.default_currency.clone());
        let executor = QueryExecutor::new(
            warehouse_source,
            clock.clone(),
            config.poll_interval,
            config.max_poll_attempts,
        );
        let warehouse = WarehouseAdapter::new(executor, config.default_currency.clone());
        let cache = Arc::new(ResilientCache::new(clock.clone(), config.cache_ttl));
        let api_breaker = CircuitBreaker::new(
            "cost-api",
            config.breaker_failure_threshold,
            config.breaker_reset_timeout,
            clock.clone(),
        );
        let warehouse_breaker = CircuitBreaker::new(
            "warehouse",
            config.breaker_failure_threshold,
            config.breaker_reset_timeout,
            clock.clone(),
        );
        let top_n = TopNProcessor::new().with_other_label(config.other_label.clone());

        Self {
            api,
            warehouse,
            cache,
            api_breaker,
            warehouse_breaker,
            retry: config.retry.clone(),
            top_n,
            clock,
            config,
        }
    }

    /// Start the background cache sweeper
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.cache.spawn_sweeper(self.config.sweep_interval)
    }

    // -- exposed operations -------------------------------------------------

    /// Gap-filled, cached per-period totals from the aggregated API
    pub async fn get_timeseries(
        &self,
        filters: &CostFilters,
    ) -> Result<SeriesOutcome<CostSeries>> {
        self.validate(filters)?;
        let request_id = Uuid::new_v4();
        debug!(%request_id, period = ?filters.period, "timeseries request");

        degrade(
            self.cache
                .wrap("timeseries", filters, Some(self.config.cache_ttl), || {
                    self.guarded_api(|| self.api.timeseries(filters))
                })
                .await,
        )
    }

    /// Per-period totals grouped by service
    pub async fn get_costs_by_service(
        &self,
        filters: &CostFilters,
    ) -> Result<SeriesOutcome<CostSeries>> {
        self.validate(filters)?;
        let group_by = GroupBy::Dimension("SERVICE".to_string());

        degrade(
            self.cache
                .wrap(
                    "service-breakdown",
                    filters,
                    Some(self.config.cache_ttl),
                    || self.guarded_api(|| self.api.grouped(filters, &group_by)),
                )
                .await,
        )
    }

    /// Per-period totals grouped by the values of a tag key
    pub async fn get_costs_by_tag(
        &self,
        filters: &CostFilters,
        tag_key: &str,
    ) -> Result<SeriesOutcome<CostSeries>> {
        self.validate(filters)?;
        self.check_tag_key(tag_key)?;
        let group_by = GroupBy::Tag(tag_key.to_string());
        let params = json!({ "filters": filters, "tag_key": tag_key });

        degrade(
            self.cache
                .wrap(
                    "tag-breakdown",
                    &params,
                    Some(self.config.cache_ttl),
                    || self.guarded_api(|| self.api.grouped(filters, &group_by)),
                )
                .await,
        )
    }

    /// Monthly totals from the raw-record warehouse
    pub async fn get_costs_from_warehouse(
        &self,
        filters: &CostFilters,
    ) -> Result<SeriesOutcome<CostSeries>> {
        self.validate(filters)?;

        degrade(
            self.cache
                .wrap("warehouse", filters, Some(self.config.cache_ttl), || {
                    self.warehouse_breaker.call(|| {
                        self.retry
                            .run(self.clock.as_ref(), || self.warehouse.monthly_costs(filters))
                    })
                })
                .await,
        )
    }

    /// Forecast with a prediction interval over the fixed forward horizon
    pub async fn get_forecast(
        &self,
        metric: &str,
    ) -> Result<SeriesOutcome<Vec<ForecastPoint>>> {
        if metric.is_empty() {
            return Err(CostPipeError::Validation("metric must not be empty".into()));
        }
        let confidence = self.config.forecast_confidence;
        let params = json!({ "metric": metric, "confidence": confidence });
        let today = chrono::Utc::now().date_naive();

        degrade(
            self.cache
                .wrap("forecast", &params, Some(self.config.cache_ttl), || {
                    self.guarded_api(|| self.api.forecast(metric, confidence, today))
                })
                .await,
        )
    }

    /// The N most expensive services of the latest period, plus a remainder
    pub async fn get_top_services(
        &self,
        filters: &CostFilters,
        n: usize,
    ) -> Result<SeriesOutcome<TopNResult>> {
        self.validate(filters)?;
        let group_by = GroupBy::Dimension("SERVICE".to_string());
        let params = json!({ "filters": filters, "n": n });

        degrade(
            self.cache
                .wrap("top-services", &params, Some(self.config.cache_ttl), || async {
                    let groups = self
                        .guarded_api(|| self.api.group_breakdown(filters, &group_by))
                        .await?;
                    Ok(self.top_n.reduce(&groups, &filters.metric, n))
                })
                .await,
        )
    }

    /// Period-over-period trend of a sorted series
    pub fn get_trend(&self, series: &CostSeries) -> Option<Trend> {
        trend::period_over_period(series)
    }

    // -- cache administration ----------------------------------------------

    /// Cache counters
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Clear cached entries, optionally only those whose key contains `pattern`
    pub async fn clear_cache(&self, pattern: Option<&str>) -> usize {
        self.cache.clear(pattern).await
    }

    /// Pre-populate the cache with the standard dashboard queries.
    ///
    /// Failures are logged and skipped; returns the number of queries that
    /// warmed successfully.
    pub async fn warmup(&self) -> usize {
        let today = chrono::Utc::now().date_naive();
        let twelve_months =
            CostFilters::from_preset(crate::filters::RangePreset::Last12Months, today);
        let last_30 = CostFilters::from_preset(crate::filters::RangePreset::Last30Days, today);

        type Warm<'a> = Pin<Box<dyn Future<Output = Result<SeriesOutcome<CostSeries>>> + 'a>>;
        let queries: Vec<Warm<'_>> = vec![
            Box::pin(self.get_timeseries(&twelve_months)),
            Box::pin(self.get_timeseries(&last_30)),
            Box::pin(self.get_costs_by_service(&twelve_months)),
        ];
        let results = join_all(queries).await;

        results
            .into_iter()
            .filter(|r| match r {
                Ok(outcome) => outcome.is_ready(),
                Err(e) => {
                    warn!(error = %e, "warmup query failed");
                    false
                }
            })
            .count()
    }

    // -- internals ----------------------------------------------------------

    async fn guarded_api<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.api_breaker
            .call(|| self.retry.run(self.clock.as_ref(), || op()))
            .await
    }

    fn validate(&self, filters: &CostFilters) -> Result<()> {
        if filters.metric.is_empty() {
            return Err(CostPipeError::Validation("metric must not be empty".into()));
        }
        for key in filters.tags.keys() {
            self.check_tag_key(key)?;
        }
        Ok(())
    }

    fn check_tag_key(&self, key: &str) -> Result<()> {
        if !self.config.allowed_tag_keys.is_empty()
            && !self.config.allowed_tag_keys.iter().any(|k| k == key)
        {
            return Err(CostPipeError::Validation(format!(
                "unsupported tag key: {key}"
            )));
        }
        Ok(())
    }
}

/// Map transient exhaustion and open circuits to the degraded outcome;
/// everything else stays an error or becomes `Ready`.
fn degrade<T>(result: Result<T>) -> Result<SeriesOutcome<T>> {
    match result {
        Ok(data) => Ok(SeriesOutcome::Ready { data }),
        Err(e) if matches!(e, CostPipeError::CircuitOpen { .. }) || e.is_transient() => {
            warn!(error = %e, "degrading to temporarily-unavailable");
            Ok(SeriesOutcome::Unavailable {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cost_api::{CostQueryRequest, CostQueryResponse, ForecastRequest, ForecastResponse};
    use crate::types::TimePeriod;
    use crate::warehouse::{ExecutionStatus, ResultPage};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Aggregated source that always fails with a transient error
    struct FlakyApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AggregatedCostSource for FlakyApi {
        async fn query_costs(&self, _request: &CostQueryRequest) -> Result<CostQueryResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CostPipeError::UpstreamTimeout("slow".into()))
        }

        async fn query_forecast(&self, _request: &ForecastRequest) -> Result<ForecastResponse> {
            Err(CostPipeError::UpstreamTimeout("slow".into()))
        }
    }

    /// Warehouse stub that is never reached in these tests
    struct IdleWarehouse;

    #[async_trait]
    impl WarehouseQuerySource for IdleWarehouse {
        async fn submit_query(&self, _sql: &str) -> Result<String> {
            Ok("unused".into())
        }

        async fn poll_status(&self, _id: &str) -> Result<ExecutionStatus> {
            Err(CostPipeError::UpstreamTimeout("unused".into()))
        }

        async fn fetch_results(&self, _id: &str, _token: Option<&str>) -> Result<ResultPage> {
            Ok(ResultPage::default())
        }
    }

    fn filters() -> CostFilters {
        CostFilters::new(
            TimePeriod::new(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .unwrap(),
        )
    }

    fn pipeline_with(api: Arc<dyn AggregatedCostSource>, config: PipelineConfig) -> CostPipeline {
        CostPipeline::with_clock(
            api,
            Arc::new(IdleWarehouse),
            config,
            Arc::new(ManualClock::new()),
        )
    }

    #[tokio::test]
    async fn test_unsupported_tag_key_is_a_validation_error() {
        let config =
            PipelineConfig::default().with_allowed_tag_keys(vec!["team".to_string()]);
        let pipeline = pipeline_with(
            Arc::new(FlakyApi {
                calls: AtomicU32::new(0),
            }),
            config,
        );

        let bad = filters().with_tag("owner", "alice");
        let err = pipeline.get_timeseries(&bad).await.unwrap_err();
        assert!(matches!(err, CostPipeError::Validation(_)));

        let err = pipeline
            .get_costs_by_tag(&filters(), "owner")
            .await
            .unwrap_err();
        assert!(matches!(err, CostPipeError::Validation(_)));
    }

    #[tokio::test]
    async fn test_transient_exhaustion_degrades_not_errors() {
        let api = Arc::new(FlakyApi {
            calls: AtomicU32::new(0),
        });
        let pipeline = pipeline_with(api.clone(), PipelineConfig::default());

        let outcome = pipeline.get_timeseries(&filters()).await.unwrap();
        assert!(!outcome.is_ready());
        // Default policy: 3 attempts against the upstream, then degrade.
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_and_degrades() {
        let api = Arc::new(FlakyApi {
            calls: AtomicU32::new(0),
        });
        let mut config = PipelineConfig::default();
        config.retry = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        let pipeline = pipeline_with(api.clone(), config);

        // Five failed call chains trip the breaker.
        for _ in 0..5 {
            let outcome = pipeline.get_timeseries(&filters()).await.unwrap();
            assert!(!outcome.is_ready());
            // Each degraded miss must not be cached, or the breaker would
            // never see the next failure.
        }
        let before = api.calls.load(Ordering::SeqCst);
        assert_eq!(before, 5);

        let outcome = pipeline.get_timeseries(&filters()).await.unwrap();
        assert!(matches!(outcome, SeriesOutcome::Unavailable { .. }));
        assert_eq!(api.calls.load(Ordering::SeqCst), before, "no upstream call");
    }
}
