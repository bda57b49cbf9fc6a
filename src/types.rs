//! Normalized schema for costpipe
//!
//! Every source adapter translates its wire shapes into the types defined
//! here before the data reaches any other component. Downstream code never
//! inspects source-specific fields.
//!
//! # Examples
//! ```
//! use costpipe::types::{Granularity, TimePeriod};
//! use chrono::NaiveDate;
//!
//! let period = TimePeriod::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
//! ).unwrap();
//! assert_eq!(period.start.to_string(), "2024-01-01");
//! assert_eq!(Granularity::Monthly.to_string(), "MONTHLY");
//! ```

use crate::error::{CostPipeError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Period size of a cost series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    /// One point per calendar day
    Daily,
    /// One point per calendar month
    Monthly,
}

impl Granularity {
    /// Normalized period label for a date under this granularity
    /// (`YYYY-MM-DD` for daily, `YYYY-MM` for monthly).
    pub fn label_for(&self, date: NaiveDate) -> String {
        match self {
            Self::Daily => date.format("%Y-%m-%d").to_string(),
            Self::Monthly => date.format("%Y-%m").to_string(),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "DAILY"),
            Self::Monthly => write!(f, "MONTHLY"),
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = CostPipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "DAILY" => Ok(Self::Daily),
            "MONTHLY" => Ok(Self::Monthly),
            _ => Err(CostPipeError::InvalidArgument(format!(
                "unsupported granularity: {s}"
            ))),
        }
    }
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    /// First date of the range
    pub start: NaiveDate,
    /// Last date of the range
    pub end: NaiveDate,
}

impl TimePeriod {
    /// Create a new period, validating that start does not follow end
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(CostPipeError::Validation(format!(
                "period start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// The last `months` full calendar months ending at `today`'s month
    pub fn last_months(today: NaiveDate, months: u32) -> Self {
        let end = today;
        let start = first_of_month(today)
            .checked_sub_months(chrono::Months::new(months.saturating_sub(1)))
            .unwrap_or(today);
        Self { start, end }
    }

    /// The last `days` days ending at `today` inclusive
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let start = today - chrono::Duration::days(i64::from(days.saturating_sub(1)));
        Self { start, end: today }
    }
}

/// First day of the month containing `date`
pub(crate) fn first_of_month(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// Which upstream produced a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    /// Low-latency aggregated-query API
    AggregatedApi,
    /// High-latency raw-record warehouse (async SQL)
    Warehouse,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AggregatedApi => write!(f, "aggregated-api"),
            Self::Warehouse => write!(f, "warehouse"),
        }
    }
}

/// One period's cost value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostPoint {
    /// Normalized period label (`YYYY-MM` or `YYYY-MM-DD`)
    pub date: String,
    /// Cost amount; non-negative unless the point is a credit or refund
    pub amount: f64,
    /// Currency code, e.g. "USD"
    pub unit: String,
    /// Whether the upstream flagged this period as estimated
    pub estimated: bool,
    /// Group key for grouped series (service code, tag value)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl CostPoint {
    /// Synthetic zero-value point for a period with no upstream signal
    pub fn zero(date: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            amount: 0.0,
            unit: unit.into(),
            estimated: false,
            group: None,
        }
    }
}

/// Ordered sequence of cost points for one metric
///
/// Invariants: points ascend by date label, with at most one point per
/// (date, group) pair. Construction through the adapters and the gap filler
/// guarantees this by walking periods in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSeries {
    /// Metric name, e.g. "UnblendedCost"
    pub metric: String,
    /// Grouping dimension if the series is grouped (e.g. "SERVICE" or a tag key)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// The points, ascending by date label
    pub points: Vec<CostPoint>,
    /// Which upstream produced the series
    pub source: DataSource,
}

impl CostSeries {
    /// Create an empty ungrouped series for a metric
    pub fn empty(metric: impl Into<String>, source: DataSource) -> Self {
        Self {
            metric: metric.into(),
            group_key: None,
            points: Vec::new(),
            source,
        }
    }

    /// Sum of all point amounts
    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.amount).sum()
    }
}

/// One dimension bucket from an upstream grouped query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    /// Group keys; `keys[0]` is the grouping dimension value
    pub keys: Vec<String>,
    /// Metric name to value
    pub metrics: HashMap<String, f64>,
    /// Source-provided attributes (display name, etc.)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl GroupResult {
    /// The grouping dimension value, or an empty string for malformed buckets
    pub fn primary_key(&self) -> &str {
        self.keys.first().map(String::as_str).unwrap_or("")
    }

    /// Value of a metric, zero when absent
    pub fn metric_value(&self, metric: &str) -> f64 {
        self.metrics.get(metric).copied().unwrap_or(0.0)
    }
}

/// Forecast estimate for one forward period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// Normalized period label
    pub date: String,
    /// Point estimate
    pub mean: f64,
    /// Lower bound of the prediction interval
    pub lower: f64,
    /// Upper bound of the prediction interval
    pub upper: f64,
}

impl ForecastPoint {
    /// Build a forecast point, normalizing so that lower <= mean <= upper
    pub fn new(date: impl Into<String>, mean: f64, lower: f64, upper: f64) -> Self {
        let (lower, upper) = if lower <= upper {
            (lower, upper)
        } else {
            (upper, lower)
        };
        Self {
            date: date.into(),
            mean: mean.clamp(lower, upper),
            lower,
            upper,
        }
    }
}

/// State of one asynchronous SQL submission
///
/// Transitions are monotonic: once a terminal state is observed the
/// execution never resurrects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    /// Accepted by the warehouse, not yet running
    Submitted,
    /// Running
    Running,
    /// Completed successfully; results can be fetched
    Succeeded,
    /// Rejected or failed with an upstream-stated reason
    Failed,
    /// Cancelled upstream
    Cancelled,
}

impl ExecutionState {
    /// Whether this state ends the execution lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Terminal record of one async query submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecution {
    /// Opaque execution id assigned by the warehouse
    pub id: String,
    /// Last observed state
    pub state: ExecutionState,
    /// Number of status polls performed
    pub polls: u32,
    /// Failure reason when the state is Failed or Cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}
