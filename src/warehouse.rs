//! Async query executor for the raw-record warehouse
//!
//! The warehouse runs SQL asynchronously: a submission returns an opaque
//! execution id, status is polled until a terminal state, and results come
//! back as a paginated row grid with a header row. This module drives that
//! state machine (`SUBMITTED -> RUNNING -> {SUCCEEDED | FAILED | CANCELLED}`)
//! through the injectable clock, and parses the grid into the normalized
//! schema. Retry of a failed execution is a wrapping concern; a new
//! submission is a new query.

use crate::error::{CostPipeError, Result};
use crate::filters::CostFilters;
use crate::gap_filler::GapFiller;
use crate::types::{
    CostPoint, CostSeries, DataSource, ExecutionState, Granularity, QueryExecution, TimePeriod,
};
use crate::clock::Clock;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Status of a submitted execution as reported by the warehouse
#[derive(Debug, Clone)]
pub struct ExecutionStatus {
    /// Current state
    pub state: ExecutionState,
    /// Upstream-stated reason when the state is Failed or Cancelled
    pub reason: Option<String>,
}

/// One page of the result grid
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    /// Rows of cells; a cell is absent when the upstream reported null
    pub rows: Vec<Vec<Option<String>>>,
    /// Continuation token for the next page
    pub next_token: Option<String>,
}

/// The asynchronous warehouse query service
#[async_trait]
pub trait WarehouseQuerySource: Send + Sync {
    /// Submit SQL; returns the opaque execution id
    async fn submit_query(&self, sql: &str) -> Result<String>;

    /// Poll the status of an execution
    async fn poll_status(&self, execution_id: &str) -> Result<ExecutionStatus>;

    /// Fetch one page of results
    async fn fetch_results(
        &self,
        execution_id: &str,
        page_token: Option<&str>,
    ) -> Result<ResultPage>;
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Drives one submission to a terminal state and collects its pages
pub struct QueryExecutor {
    source: Arc<dyn WarehouseQuerySource>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl QueryExecutor {
    /// Create an executor polling every `poll_interval` up to `max_poll_attempts` times
    pub fn new(
        source: Arc<dyn WarehouseQuerySource>,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        max_poll_attempts: u32,
    ) -> Self {
        Self {
            source,
            clock,
            poll_interval,
            max_poll_attempts,
        }
    }

    /// Run `sql` to completion and return the concatenated row grid plus the
    /// terminal execution record.
    ///
    /// A reported failure surfaces as [`CostPipeError::QueryExecutionFailed`];
    /// exhausting the polling ceiling without a terminal state surfaces as the
    /// distinct [`CostPipeError::QueryExecutionTimeout`].
    pub async fn run(&self, sql: &str) -> Result<(Vec<Vec<Option<String>>>, QueryExecution)> {
        let id = self.source.submit_query(sql).await?;
        debug!(execution_id = %id, "query submitted");

        let mut polls = 0u32;
        while polls < self.max_poll_attempts {
            let status = self.source.poll_status(&id).await?;
            polls += 1;
            debug!(execution_id = %id, state = %status.state, polls, "execution status");

            match status.state {
                ExecutionState::Succeeded => {
                    let rows = self.collect_pages(&id).await?;
                    info!(execution_id = %id, rows = rows.len(), polls, "query succeeded");
                    return Ok((
                        rows,
                        QueryExecution {
                            id,
                            state: ExecutionState::Succeeded,
                            polls,
                            failure_reason: None,
                        },
                    ));
                }
                ExecutionState::Failed | ExecutionState::Cancelled => {
                    let reason = status
                        .reason
                        .unwrap_or_else(|| format!("execution ended in state {}", status.state));
                    warn!(execution_id = %id, state = %status.state, %reason, "query failed");
                    return Err(CostPipeError::QueryExecutionFailed { reason });
                }
                ExecutionState::Submitted | ExecutionState::Running => {
                    self.clock.sleep(self.poll_interval).await;
                }
            }
        }

        warn!(execution_id = %id, attempts = polls, "polling ceiling reached");
        Err(CostPipeError::QueryExecutionTimeout { attempts: polls })
    }

    async fn collect_pages(&self, execution_id: &str) -> Result<Vec<Vec<Option<String>>>> {
        let mut rows = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .source
                .fetch_results(execution_id, token.as_deref())
                .await?;
            rows.extend(page.rows);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Translates warehouse row grids into normalized, gap-filled series
pub struct WarehouseAdapter {
    executor: QueryExecutor,
    gap_filler: GapFiller,
    default_currency: String,
}

impl WarehouseAdapter {
    /// Create an adapter over `executor`, emitting points in `default_currency`
    pub fn new(executor: QueryExecutor, default_currency: impl Into<String>) -> Self {
        let default_currency = default_currency.into();
        Self {
            executor,
            gap_filler: GapFiller::new(default_currency.clone()),
            default_currency,
        }
    }

    /// Monthly cost totals from the raw billing records, gap-filled across
    /// the requested range.
    pub async fn monthly_costs(&self, filters: &CostFilters) -> Result<CostSeries> {
        let sql = build_monthly_sql(filters);
        let (rows, _execution) = self.executor.run(&sql).await?;

        let mut parsed = parse_month_rows(&rows);
        parsed.sort_by(|a, b| a.0.cmp(&b.0));

        let series = CostSeries {
            metric: filters.metric.clone(),
            group_key: None,
            points: parsed
                .into_iter()
                .map(|(month, amount)| CostPoint {
                    date: month,
                    amount,
                    unit: self.default_currency.clone(),
                    estimated: false,
                    group: None,
                })
                .collect(),
            source: DataSource::Warehouse,
        };

        Ok(self
            .gap_filler
            .fill(&series, &filters.period, Granularity::Monthly))
    }
}

/// SQL for per-month cost totals over the filtered range
fn build_monthly_sql(filters: &CostFilters) -> String {
    let mut conditions = vec![format!(
        "line_item_usage_start_date >= DATE '{}' AND line_item_usage_start_date <= DATE '{}'",
        filters.period.start.format("%Y-%m-%d"),
        filters.period.end.format("%Y-%m-%d"),
    )];
    if !filters.services.is_empty() {
        conditions.push(format!(
            "product_servicecode IN ({})",
            quote_list(&filters.services)
        ));
    }
    if !filters.accounts.is_empty() {
        conditions.push(format!(
            "line_item_usage_account_id IN ({})",
            quote_list(&filters.accounts)
        ));
    }
    if !filters.regions.is_empty() {
        conditions.push(format!(
            "product_region IN ({})",
            quote_list(&filters.regions)
        ));
    }

    format!(
        "SELECT date_format(line_item_usage_start_date, '%Y-%m') AS month, \
         SUM(line_item_unblended_cost) AS amount \
         FROM cost_usage_report WHERE {} GROUP BY 1 ORDER BY 1",
        conditions.join(" AND ")
    )
}

fn quote_list<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse (month, amount) pairs from the result grid.
///
/// The first row is the header and is skipped. Cells coerce defensively:
/// a missing or non-numeric amount becomes 0. Rows with a null or zero
/// month, or a non-positive amount, carry no signal for their period and
/// are dropped rather than treated as errors.
fn parse_month_rows(rows: &[Vec<Option<String>>]) -> Vec<(String, f64)> {
    rows.iter()
        .skip(1)
        .filter_map(|row| {
            let month = row
                .first()
                .and_then(|cell| cell.as_deref())
                .unwrap_or("")
                .trim();
            if month.is_empty() || month == "0" {
                return None;
            }
            let amount = row
                .get(1)
                .and_then(|cell| cell.as_deref())
                .and_then(|value| value.trim().parse::<f64>().ok())
                .unwrap_or(0.0);
            if amount <= 0.0 {
                return None;
            }
            Some((month.to_string(), amount))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    query_execution_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    state_change_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCell {
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireRow {
    #[serde(default)]
    data: Vec<WireCell>,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    next_token: Option<String>,
}

/// HTTP implementation of [`WarehouseQuerySource`]
pub struct HttpWarehouse {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWarehouse {
    /// Create a client against `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl WarehouseQuerySource for HttpWarehouse {
    async fn submit_query(&self, sql: &str) -> Result<String> {
        let url = format!("{}/v1/queries", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "query": sql }))
            .send()
            .await?;
        let body: SubmitResponse = crate::cost_api::decode_response(response).await?;
        Ok(body.query_execution_id)
    }

    async fn poll_status(&self, execution_id: &str) -> Result<ExecutionStatus> {
        let url = format!("{}/v1/queries/{}", self.base_url, execution_id);
        let response = self.client.get(&url).send().await?;
        let body: StatusResponse = crate::cost_api::decode_response(response).await?;
        Ok(ExecutionStatus {
            state: parse_state(&body.state)?,
            reason: body.state_change_reason,
        })
    }

    async fn fetch_results(
        &self,
        execution_id: &str,
        page_token: Option<&str>,
    ) -> Result<ResultPage> {
        let url = format!("{}/v1/queries/{}/results", self.base_url, execution_id);
        let mut request = self.client.get(&url);
        if let Some(token) = page_token {
            request = request.query(&[("page_token", token)]);
        }
        let response = request.send().await?;
        let body: ResultsResponse = crate::cost_api::decode_response(response).await?;
        Ok(ResultPage {
            rows: body
                .rows
                .into_iter()
                .map(|row| row.data.into_iter().map(|cell| cell.value).collect())
                .collect(),
            next_token: body.next_token,
        })
    }
}

fn parse_state(state: &str) -> Result<ExecutionState> {
    match state.to_uppercase().as_str() {
        "QUEUED" | "SUBMITTED" => Ok(ExecutionState::Submitted),
        "RUNNING" => Ok(ExecutionState::Running),
        "SUCCEEDED" => Ok(ExecutionState::Succeeded),
        "FAILED" => Ok(ExecutionState::Failed),
        "CANCELLED" => Ok(ExecutionState::Cancelled),
        other => Err(CostPipeError::InvalidArgument(format!(
            "unknown execution state: {other}"
        ))),
    }
}
