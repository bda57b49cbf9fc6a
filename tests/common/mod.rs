//! Shared test doubles for integration tests

use async_trait::async_trait;
use costpipe::cost_api::{
    AggregatedCostSource, CostQueryRequest, CostQueryResponse, ForecastRequest, ForecastResponse,
};
use costpipe::error::{CostPipeError, Result};
use costpipe::warehouse::{ExecutionStatus, ResultPage, WarehouseQuerySource};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// Aggregated source returning canned JSON bodies, counting calls and
/// optionally failing the first `fail_first` calls with a transient error.
pub struct MockCostApi {
    costs: serde_json::Value,
    forecast: serde_json::Value,
    pub calls: AtomicU32,
    fail_first: u32,
}

impl MockCostApi {
    pub fn new(costs: serde_json::Value) -> Self {
        Self {
            costs,
            forecast: serde_json::json!({"ForecastResultsByTime": []}),
            calls: AtomicU32::new(0),
            fail_first: 0,
        }
    }

    pub fn with_forecast(mut self, forecast: serde_json::Value) -> Self {
        self.forecast = forecast;
        self
    }

    /// Fail the first `n` cost queries with a throttle error
    pub fn failing_first(mut self, n: u32) -> Self {
        self.fail_first = n;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AggregatedCostSource for MockCostApi {
    async fn query_costs(&self, _request: &CostQueryRequest) -> Result<CostQueryResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(CostPipeError::UpstreamThrottle("rate exceeded".into()));
        }
        Ok(serde_json::from_value(self.costs.clone())?)
    }

    async fn query_forecast(&self, _request: &ForecastRequest) -> Result<ForecastResponse> {
        Ok(serde_json::from_value(self.forecast.clone())?)
    }
}

/// Warehouse double that walks through scripted statuses, then serves pages
pub struct MockWarehouse {
    statuses: Mutex<Vec<ExecutionStatus>>,
    pages: Mutex<Vec<ResultPage>>,
    pub submissions: AtomicU32,
}

impl MockWarehouse {
    pub fn new(statuses: Vec<ExecutionStatus>, pages: Vec<ResultPage>) -> Self {
        Self {
            statuses: Mutex::new(statuses),
            pages: Mutex::new(pages),
            submissions: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl WarehouseQuerySource for MockWarehouse {
    async fn submit_query(&self, _sql: &str) -> Result<String> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("exec-{n}"))
    }

    async fn poll_status(&self, _execution_id: &str) -> Result<ExecutionStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            Ok(statuses.remove(0))
        } else {
            Ok(statuses[0].clone())
        }
    }

    async fn fetch_results(
        &self,
        _execution_id: &str,
        _page_token: Option<&str>,
    ) -> Result<ResultPage> {
        Ok(self.pages.lock().unwrap().remove(0))
    }
}

/// A monthly aggregated-API body with one bucket per ("YYYY-MM", amount) pair
pub fn monthly_body(months: &[(&str, f64)]) -> serde_json::Value {
    let results: Vec<serde_json::Value> = months
        .iter()
        .map(|(month, amount)| {
            let start = chrono::NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d")
                .expect("valid month in fixture");
            let end = start + chrono::Months::new(1);
            serde_json::json!({
                "TimePeriod": {
                    "Start": start.format("%Y-%m-%d").to_string(),
                    "End": end.format("%Y-%m-%d").to_string(),
                },
                "Total": {"UnblendedCost": {"Amount": amount.to_string(), "Unit": "USD"}},
                "Estimated": false
            })
        })
        .collect();
    serde_json::json!({ "ResultsByTime": results })
}
