//! Aggregated-API adapter for the low-latency cost query service
//!
//! This module owns the wire shapes of the aggregated cost service and
//! translates them into the normalized schema at the boundary. Grouped
//! responses expand into one point per (date, group) pair, ungrouped ones
//! into one point per date. Every series passes through the gap filler
//! before leaving this module, so callers never observe a sparse series.

use crate::error::{CostPipeError, Result};
use crate::filters::CostFilters;
use crate::gap_filler::GapFiller;
use crate::types::{
    CostPoint, CostSeries, DataSource, ForecastPoint, Granularity, GroupResult, TimePeriod,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Forward horizon of the forecast companion, in months
pub const FORECAST_HORIZON_MONTHS: u32 = 3;

// ---------------------------------------------------------------------------
// Wire shapes (private to this adapter boundary in spirit; exported for the
// trait seam and for test doubles)
// ---------------------------------------------------------------------------

/// Wire date range, ISO dates, inclusive start / exclusive end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WirePeriod {
    pub start: String,
    pub end: String,
}

/// Group-by clause: a dimension (e.g. SERVICE) or a tag key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireGroupBy {
    #[serde(rename = "Type")]
    pub kind: String,
    pub key: String,
}

/// Cost query request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostQueryRequest {
    pub time_period: WirePeriod,
    pub granularity: String,
    pub metrics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<WireGroupBy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<serde_json::Value>,
}

/// Metric value as the upstream reports it: stringly-typed amount + unit
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricAmount {
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub unit: String,
}

impl MetricAmount {
    /// Defensive numeric coercion: a missing or non-numeric amount is 0
    pub fn value(&self) -> f64 {
        self.amount.trim().parse().unwrap_or(0.0)
    }
}

/// One group bucket inside a period
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireGroup {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub metrics: HashMap<String, MetricAmount>,
}

/// Per-period slice of a cost query response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeriodResult {
    pub time_period: WirePeriod,
    #[serde(default)]
    pub total: HashMap<String, MetricAmount>,
    #[serde(default)]
    pub groups: Vec<WireGroup>,
    #[serde(default)]
    pub estimated: bool,
}

/// Cost query response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CostQueryResponse {
    #[serde(default)]
    pub results_by_time: Vec<PeriodResult>,
}

/// Forecast request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForecastRequest {
    pub time_period: WirePeriod,
    pub metric: String,
    pub granularity: String,
    pub prediction_interval_level: u8,
}

/// One forward-period estimate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireForecast {
    pub time_period: WirePeriod,
    #[serde(default)]
    pub mean_value: String,
    #[serde(default)]
    pub prediction_interval_lower_bound: String,
    #[serde(default)]
    pub prediction_interval_upper_bound: String,
}

/// Forecast response body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForecastResponse {
    #[serde(default)]
    pub forecast_results_by_time: Vec<WireForecast>,
}

// ---------------------------------------------------------------------------
// Trait seam + HTTP client
// ---------------------------------------------------------------------------

/// The low-latency aggregated cost query service
#[async_trait]
pub trait AggregatedCostSource: Send + Sync {
    /// Run a cost/usage query
    async fn query_costs(&self, request: &CostQueryRequest) -> Result<CostQueryResponse>;

    /// Run a forecast query
    async fn query_forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse>;
}

/// HTTP implementation of [`AggregatedCostSource`]
pub struct HttpCostApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCostApi {
    /// Create a client against `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl AggregatedCostSource for HttpCostApi {
    async fn query_costs(&self, request: &CostQueryRequest) -> Result<CostQueryResponse> {
        let url = format!("{}/v1/costs", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        decode_response(response).await
    }

    async fn query_forecast(&self, request: &ForecastRequest) -> Result<ForecastResponse> {
        let url = format!("{}/v1/forecast", self.base_url);
        let response = self.client.post(&url).json(request).send().await?;
        decode_response(response).await
    }
}

/// Map an HTTP response into the error taxonomy
pub(crate) async fn decode_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status.as_u16() {
        429 => CostPipeError::UpstreamThrottle(message),
        408 | 504 => CostPipeError::UpstreamTimeout(message),
        400 => CostPipeError::Validation(message),
        s => CostPipeError::Api { status: s, message },
    })
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Optional single group-by clause for a cost query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    /// Group by a dimension such as SERVICE or REGION
    Dimension(String),
    /// Group by the values of a tag key
    Tag(String),
}

impl GroupBy {
    fn to_wire(&self) -> WireGroupBy {
        match self {
            Self::Dimension(key) => WireGroupBy {
                kind: "DIMENSION".to_string(),
                key: key.clone(),
            },
            Self::Tag(key) => WireGroupBy {
                kind: "TAG".to_string(),
                key: key.clone(),
            },
        }
    }

    fn key(&self) -> &str {
        match self {
            Self::Dimension(key) | Self::Tag(key) => key,
        }
    }
}

/// Translates aggregated-API responses into normalized, gap-filled series
pub struct CostApiAdapter {
    source: Arc<dyn AggregatedCostSource>,
    gap_filler: GapFiller,
    default_currency: String,
}

impl CostApiAdapter {
    /// Create an adapter over `source`, emitting synthetic points in `default_currency`
    pub fn new(source: Arc<dyn AggregatedCostSource>, default_currency: impl Into<String>) -> Self {
        let default_currency = default_currency.into();
        Self {
            source,
            gap_filler: GapFiller::new(default_currency.clone()),
            default_currency,
        }
    }

    /// Ungrouped per-period totals, gap-filled across the requested range
    pub async fn timeseries(&self, filters: &CostFilters) -> Result<CostSeries> {
        let request = self.build_cost_request(filters, None);
        let response = self.source.query_costs(&request).await?;
        let series = self.expand_ungrouped(&response, filters);
        Ok(self
            .gap_filler
            .fill(&series, &filters.period, filters.granularity))
    }

    /// Grouped per-period totals, gap-filled per group
    pub async fn grouped(&self, filters: &CostFilters, group_by: &GroupBy) -> Result<CostSeries> {
        let request = self.build_cost_request(filters, Some(group_by));
        let response = self.source.query_costs(&request).await?;
        let series = self.expand_grouped(&response, filters, group_by);
        Ok(self
            .gap_filler
            .fill_grouped(&series, &filters.period, filters.granularity))
    }

    /// Group buckets of the latest period, for top-N reduction
    pub async fn group_breakdown(
        &self,
        filters: &CostFilters,
        group_by: &GroupBy,
    ) -> Result<Vec<GroupResult>> {
        let request = self.build_cost_request(filters, Some(group_by));
        let response = self.source.query_costs(&request).await?;

        let Some(latest) = response.results_by_time.last() else {
            return Ok(Vec::new());
        };
        Ok(latest
            .groups
            .iter()
            .map(|g| GroupResult {
                keys: g.keys.clone(),
                metrics: g
                    .metrics
                    .iter()
                    .map(|(name, amount)| (name.clone(), amount.value()))
                    .collect(),
                attributes: HashMap::new(),
            })
            .collect())
    }

    /// Point forecast with a prediction interval over a fixed forward horizon
    pub async fn forecast(
        &self,
        metric: &str,
        confidence_level: u8,
        today: NaiveDate,
    ) -> Result<Vec<ForecastPoint>> {
        let horizon_end = today
            .checked_add_months(chrono::Months::new(FORECAST_HORIZON_MONTHS))
            .unwrap_or(today);
        let request = ForecastRequest {
            time_period: wire_period(&TimePeriod {
                start: today,
                end: horizon_end,
            }),
            metric: metric.to_string(),
            granularity: Granularity::Monthly.to_string(),
            prediction_interval_level: confidence_level,
        };

        let response = self.source.query_forecast(&request).await?;
        debug!(
            periods = response.forecast_results_by_time.len(),
            metric, "forecast fetched"
        );

        Ok(response
            .forecast_results_by_time
            .iter()
            .map(|f| {
                ForecastPoint::new(
                    period_label(&f.time_period.start, Granularity::Monthly),
                    f.mean_value.trim().parse().unwrap_or(0.0),
                    f.prediction_interval_lower_bound.trim().parse().unwrap_or(0.0),
                    f.prediction_interval_upper_bound.trim().parse().unwrap_or(0.0),
                )
            })
            .collect())
    }

    fn build_cost_request(
        &self,
        filters: &CostFilters,
        group_by: Option<&GroupBy>,
    ) -> CostQueryRequest {
        CostQueryRequest {
            time_period: wire_period(&filters.period),
            granularity: filters.granularity.to_string(),
            metrics: vec![filters.metric.clone()],
            group_by: group_by.map(GroupBy::to_wire),
            filter: build_filter_expression(filters),
        }
    }

    fn expand_ungrouped(&self, response: &CostQueryResponse, filters: &CostFilters) -> CostSeries {
        let points = response
            .results_by_time
            .iter()
            .map(|period| {
                let (amount, unit) = period
                    .total
                    .get(&filters.metric)
                    .map(|m| (m.value(), nonempty_or(&m.unit, &self.default_currency)))
                    .unwrap_or((0.0, self.default_currency.clone()));
                CostPoint {
                    date: period_label(&period.time_period.start, filters.granularity),
                    amount,
                    unit,
                    estimated: period.estimated,
                    group: None,
                }
            })
            .collect();

        CostSeries {
            metric: filters.metric.clone(),
            group_key: None,
            points,
            source: DataSource::AggregatedApi,
        }
    }

    fn expand_grouped(
        &self,
        response: &CostQueryResponse,
        filters: &CostFilters,
        group_by: &GroupBy,
    ) -> CostSeries {
        let mut points = Vec::new();
        for period in &response.results_by_time {
            let date = period_label(&period.time_period.start, filters.granularity);
            for group in &period.groups {
                let Some(key) = group.keys.first() else {
                    continue;
                };
                let (amount, unit) = group
                    .metrics
                    .get(&filters.metric)
                    .map(|m| (m.value(), nonempty_or(&m.unit, &self.default_currency)))
                    .unwrap_or((0.0, self.default_currency.clone()));
                points.push(CostPoint {
                    date: date.clone(),
                    amount,
                    unit,
                    estimated: period.estimated,
                    group: Some(key.clone()),
                });
            }
        }

        CostSeries {
            metric: filters.metric.clone(),
            group_key: Some(group_by.key().to_string()),
            points,
            source: DataSource::AggregatedApi,
        }
    }
}

fn nonempty_or(value: &str, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn wire_period(period: &TimePeriod) -> WirePeriod {
    // The upstream range is exclusive at the end, the normalized one inclusive.
    let exclusive_end = period.end.succ_opt().unwrap_or(period.end);
    WirePeriod {
        start: period.start.format("%Y-%m-%d").to_string(),
        end: exclusive_end.format("%Y-%m-%d").to_string(),
    }
}

/// Normalized period label from a wire start date
fn period_label(start: &str, granularity: Granularity) -> String {
    match granularity {
        Granularity::Monthly if start.len() >= 7 => start[..7].to_string(),
        _ => start.to_string(),
    }
}

/// Compose the upstream filter expression from the filter sets.
///
/// Dimension and tag terms are AND'd together; values inside one term are
/// OR'd by the upstream. Returns `None` when no restriction applies.
fn build_filter_expression(filters: &CostFilters) -> Option<serde_json::Value> {
    let mut terms = Vec::new();

    for (dimension, values) in [
        ("SERVICE", &filters.services),
        ("LINKED_ACCOUNT", &filters.accounts),
        ("REGION", &filters.regions),
    ] {
        if !values.is_empty() {
            terms.push(json!({
                "Dimensions": { "Key": dimension, "Values": values }
            }));
        }
    }
    for (key, values) in &filters.tags {
        terms.push(json!({
            "Tags": { "Key": key, "Values": values }
        }));
    }

    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(json!({ "And": terms })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    struct StaticSource {
        costs: serde_json::Value,
        forecast: serde_json::Value,
    }

    #[async_trait]
    impl AggregatedCostSource for StaticSource {
        async fn query_costs(&self, _request: &CostQueryRequest) -> Result<CostQueryResponse> {
            Ok(serde_json::from_value(self.costs.clone())?)
        }

        async fn query_forecast(&self, _request: &ForecastRequest) -> Result<ForecastResponse> {
            Ok(serde_json::from_value(self.forecast.clone())?)
        }
    }

    fn filters() -> CostFilters {
        let period = TimePeriod::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap();
        CostFilters::new(period)
    }

    fn adapter(costs: serde_json::Value) -> CostApiAdapter {
        CostApiAdapter::new(
            Arc::new(StaticSource {
                costs,
                forecast: json!({"ForecastResultsByTime": []}),
            }),
            "USD",
        )
    }

    #[tokio::test]
    async fn test_ungrouped_expansion_is_gap_filled() {
        let adapter = adapter(json!({
            "ResultsByTime": [
                {
                    "TimePeriod": {"Start": "2024-01-01", "End": "2024-02-01"},
                    "Total": {"UnblendedCost": {"Amount": "12.50", "Unit": "USD"}},
                    "Estimated": false
                },
                {
                    "TimePeriod": {"Start": "2024-03-01", "End": "2024-04-01"},
                    "Total": {"UnblendedCost": {"Amount": "7.25", "Unit": "USD"}},
                    "Estimated": true
                }
            ]
        }));

        let series = adapter.timeseries(&filters()).await.unwrap();
        assert_eq!(series.points.len(), 3);
        assert_eq!(series.points[0].amount, 12.50);
        assert_eq!(series.points[1].date, "2024-02");
        assert_eq!(series.points[1].amount, 0.0);
        assert!(series.points[2].estimated);
        assert_eq!(series.source, DataSource::AggregatedApi);
    }

    #[tokio::test]
    async fn test_non_numeric_amount_coerces_to_zero() {
        let adapter = adapter(json!({
            "ResultsByTime": [{
                "TimePeriod": {"Start": "2024-01-01", "End": "2024-02-01"},
                "Total": {"UnblendedCost": {"Amount": "not-a-number", "Unit": ""}}
            }]
        }));

        let series = adapter.timeseries(&filters()).await.unwrap();
        assert_eq!(series.points[0].amount, 0.0);
        assert_eq!(series.points[0].unit, "USD");
    }

    #[tokio::test]
    async fn test_grouped_expansion_one_point_per_date_group() {
        let adapter = adapter(json!({
            "ResultsByTime": [{
                "TimePeriod": {"Start": "2024-01-01", "End": "2024-02-01"},
                "Groups": [
                    {"Keys": ["AmazonEC2"], "Metrics": {"UnblendedCost": {"Amount": "5.0", "Unit": "USD"}}},
                    {"Keys": ["AmazonS3"], "Metrics": {"UnblendedCost": {"Amount": "2.0", "Unit": "USD"}}}
                ]
            }]
        }));

        let series = adapter
            .grouped(&filters(), &GroupBy::Dimension("SERVICE".into()))
            .await
            .unwrap();

        assert_eq!(series.group_key.as_deref(), Some("SERVICE"));
        // 3 months x 2 groups after grouped gap fill
        assert_eq!(series.points.len(), 6);
        let january: Vec<_> = series.points.iter().filter(|p| p.date == "2024-01").collect();
        assert_eq!(january.len(), 2);
        assert!(january.iter().any(|p| p.group.as_deref() == Some("AmazonEC2")));
    }

    #[tokio::test]
    async fn test_group_breakdown_uses_latest_period() {
        let adapter = adapter(json!({
            "ResultsByTime": [
                {
                    "TimePeriod": {"Start": "2024-01-01", "End": "2024-02-01"},
                    "Groups": [{"Keys": ["Old"], "Metrics": {"UnblendedCost": {"Amount": "1.0", "Unit": "USD"}}}]
                },
                {
                    "TimePeriod": {"Start": "2024-02-01", "End": "2024-03-01"},
                    "Groups": [{"Keys": ["AmazonEC2"], "Metrics": {"UnblendedCost": {"Amount": "9.0", "Unit": "USD"}}}]
                }
            ]
        }));

        let groups = adapter
            .group_breakdown(&filters(), &GroupBy::Dimension("SERVICE".into()))
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].primary_key(), "AmazonEC2");
        assert_eq!(groups[0].metric_value("UnblendedCost"), 9.0);
    }

    #[tokio::test]
    async fn test_forecast_bounds_hold() {
        let source = StaticSource {
            costs: json!({"ResultsByTime": []}),
            forecast: json!({
                "ForecastResultsByTime": [{
                    "TimePeriod": {"Start": "2024-07-01", "End": "2024-08-01"},
                    "MeanValue": "100.0",
                    "PredictionIntervalLowerBound": "80.0",
                    "PredictionIntervalUpperBound": "120.0"
                }]
            }),
        };
        let adapter = CostApiAdapter::new(Arc::new(source), "USD");

        let points = adapter
            .forecast(
                "UnblendedCost",
                80,
                NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        let p = &points[0];
        assert!(p.lower <= p.mean && p.mean <= p.upper);
        assert_eq!(p.date, "2024-07");
    }

    #[test]
    fn test_filter_expression_composition() {
        let f = filters()
            .with_service("AmazonEC2")
            .with_tag("team", "platform");
        let expr = build_filter_expression(&f).unwrap();
        let terms = expr["And"].as_array().unwrap();
        assert_eq!(terms.len(), 2);

        let single = build_filter_expression(&filters().with_service("AmazonS3")).unwrap();
        assert_eq!(single["Dimensions"]["Key"], "SERVICE");

        assert!(build_filter_expression(&filters()).is_none());
    }

    #[test]
    fn test_wire_period_end_is_exclusive() {
        let period = TimePeriod::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        let wire = wire_period(&period);
        assert_eq!(wire.start, "2024-01-01");
        assert_eq!(wire.end, "2024-02-01");
    }
}
