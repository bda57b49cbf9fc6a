//! CLI interface for costpipe
//!
//! This module defines the command-line interface using clap. Global flags
//! select the period, granularity and filters; subcommands pick the report.
//!
//! # Example
//!
//! ```bash
//! # Monthly totals for the last 12 months
//! costpipe timeseries --last 12m
//!
//! # Daily per-service breakdown for January 2024
//! costpipe by-service --since 2024-01-01 --until 2024-01-31 --granularity daily
//!
//! # Top 5 services of the current month, tagged team=platform
//! costpipe top-services -n 5 --last mtd --tag team=platform
//! ```

use crate::config::{API_URL_ENV, WAREHOUSE_URL_ENV};
use crate::error::{CostPipeError, Result};
use crate::filters::{CostFilters, DEFAULT_METRIC, RangePreset};
use crate::types::{Granularity, TimePeriod};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Unified cloud cost reporting pipeline
#[derive(Parser, Debug, Clone)]
#[command(name = "costpipe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the aggregated cost API
    #[arg(long, env = API_URL_ENV, global = true)]
    pub api_url: Option<String>,

    /// Base URL of the warehouse query service
    #[arg(long, env = WAREHOUSE_URL_ENV, global = true)]
    pub warehouse_url: Option<String>,

    /// Suppress informational output (only warnings and errors)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Start date (YYYY-MM-DD or YYYY-MM)
    #[arg(long, global = true)]
    pub since: Option<String>,

    /// End date (YYYY-MM-DD or YYYY-MM)
    #[arg(long, global = true)]
    pub until: Option<String>,

    /// Named range preset: 7d, 30d, 12m or mtd (ignored when --since is given)
    #[arg(long, global = true, default_value = "12m")]
    pub last: String,

    /// Period size: daily or monthly
    #[arg(long, global = true, default_value = "monthly")]
    pub granularity: String,

    /// Cost metric to query
    #[arg(long, global = true, default_value = DEFAULT_METRIC)]
    pub metric: String,

    /// Restrict to a service code (repeatable)
    #[arg(long, global = true)]
    pub service: Vec<String>,

    /// Restrict to a linked account id (repeatable)
    #[arg(long, global = true)]
    pub account: Vec<String>,

    /// Restrict to a region (repeatable)
    #[arg(long, global = true)]
    pub region: Vec<String>,

    /// Tag filter as key=value (repeatable)
    #[arg(long, global = true)]
    pub tag: Vec<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available reports
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Per-period cost totals from the aggregated API
    Timeseries,

    /// Per-period totals broken down by service
    ByService,

    /// Per-period totals broken down by the values of a tag key
    ByTag {
        /// Tag key to group by
        #[arg(long)]
        key: String,
    },

    /// Monthly totals recomputed from the raw-record warehouse
    Warehouse,

    /// Cost forecast with a prediction interval
    Forecast,

    /// The most expensive services of the latest period
    TopServices {
        /// Number of leading services to keep
        #[arg(long, short = 'n', default_value = "5")]
        count: usize,
    },

    /// Period-over-period trend of the cost timeseries
    Trend,

    /// Pre-populate the cache with the standard dashboard queries
    Warmup,
}

impl Cli {
    /// Resolve the global flags into a filter set, `today` anchoring presets
    pub fn build_filters(&self, today: NaiveDate) -> Result<CostFilters> {
        let period = match (&self.since, &self.until) {
            (Some(since), until) => {
                let start = parse_date_filter(since, true)?;
                let end = match until {
                    Some(until) => parse_date_filter(until, false)?,
                    None => today,
                };
                TimePeriod::new(start, end)?
            }
            (None, Some(_)) => {
                return Err(CostPipeError::InvalidArgument(
                    "--until requires --since".to_string(),
                ));
            }
            (None, None) => parse_range_preset(&self.last)?.resolve(today),
        };

        let mut filters = CostFilters::new(period)
            .with_granularity(self.granularity.parse::<Granularity>()?)
            .with_metric(self.metric.clone());
        for service in &self.service {
            filters = filters.with_service(service);
        }
        for account in &self.account {
            filters = filters.with_account(account);
        }
        for region in &self.region {
            filters = filters.with_region(region);
        }
        for tag in &self.tag {
            let (key, value) = parse_tag(tag)?;
            filters = filters.with_tag(key, value);
        }
        Ok(filters)
    }
}

/// Parse a date filter in `YYYY-MM-DD` or `YYYY-MM` form.
///
/// A month-only value resolves to the first day when used as a start and the
/// last day when used as an end.
pub fn parse_date_filter(value: &str, is_start: bool) -> Result<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(first) = NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d") {
        if is_start {
            return Ok(first);
        }
        let last = first
            .checked_add_months(chrono::Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(first);
        return Ok(last);
    }
    Err(CostPipeError::InvalidArgument(format!(
        "invalid date filter '{value}', expected YYYY-MM-DD or YYYY-MM"
    )))
}

/// Parse a `--tag key=value` argument
pub fn parse_tag(value: &str) -> Result<(&str, &str)> {
    match value.split_once('=') {
        Some((key, tag_value)) if !key.is_empty() && !tag_value.is_empty() => {
            Ok((key, tag_value))
        }
        _ => Err(CostPipeError::InvalidArgument(format!(
            "invalid tag filter '{value}', expected key=value"
        ))),
    }
}

fn parse_range_preset(value: &str) -> Result<RangePreset> {
    match value.to_lowercase().as_str() {
        "7d" => Ok(RangePreset::Last7Days),
        "30d" => Ok(RangePreset::Last30Days),
        "12m" => Ok(RangePreset::Last12Months),
        "mtd" => Ok(RangePreset::MonthToDate),
        _ => Err(CostPipeError::InvalidArgument(format!(
            "unknown range preset '{value}', expected 7d, 30d, 12m or mtd"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
    }

    #[test]
    fn test_parse_date_filter_full_date() {
        let date = parse_date_filter("2024-03-07", true).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
    }

    #[test]
    fn test_parse_date_filter_month_resolves_by_position() {
        let start = parse_date_filter("2024-02", true).unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());

        let end = parse_date_filter("2024-02", false).unwrap();
        assert_eq!(end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn test_parse_date_filter_rejects_garbage() {
        assert!(parse_date_filter("yesterday", true).is_err());
        assert!(parse_date_filter("2024-13", true).is_err());
    }

    #[test]
    fn test_parse_tag() {
        assert_eq!(parse_tag("team=platform").unwrap(), ("team", "platform"));
        assert!(parse_tag("team").is_err());
        assert!(parse_tag("=platform").is_err());
        assert!(parse_tag("team=").is_err());
    }

    #[test]
    fn test_build_filters_from_preset_and_flags() {
        let cli = Cli::parse_from([
            "costpipe",
            "--last",
            "30d",
            "--granularity",
            "daily",
            "--service",
            "AmazonEC2",
            "--tag",
            "team=platform",
            "timeseries",
        ]);
        let filters = cli.build_filters(today()).unwrap();

        assert_eq!(filters.granularity, Granularity::Daily);
        assert_eq!(
            filters.period.start,
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
        );
        assert_eq!(filters.period.end, today());
        assert!(filters.services.contains("AmazonEC2"));
        assert!(filters.tags["team"].contains("platform"));
    }

    #[test]
    fn test_build_filters_until_requires_since() {
        let cli = Cli::parse_from(["costpipe", "--until", "2024-06-01", "timeseries"]);
        assert!(cli.build_filters(today()).is_err());
    }

    #[test]
    fn test_build_filters_explicit_range() {
        let cli = Cli::parse_from([
            "costpipe",
            "--since",
            "2024-01",
            "--until",
            "2024-03",
            "timeseries",
        ]);
        let filters = cli.build_filters(today()).unwrap();
        assert_eq!(
            filters.period.start,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            filters.period.end,
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap()
        );
    }
}
