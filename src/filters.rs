//! Query filters for cost requests
//!
//! This module provides the immutable filter set that callers construct per
//! request. Filters carry the requested period (explicit or from a preset),
//! granularity, metric, and optional service/account/region/tag restrictions.
//!
//! # Examples
//!
//! ```
//! use costpipe::filters::CostFilters;
//! use costpipe::types::{Granularity, TimePeriod};
//! use chrono::NaiveDate;
//!
//! let period = TimePeriod::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
//! ).unwrap();
//!
//! let filters = CostFilters::new(period)
//!     .with_granularity(Granularity::Monthly)
//!     .with_service("AmazonEC2")
//!     .with_tag("team", "platform");
//! ```

use crate::types::{Granularity, TimePeriod};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Default metric when a request does not name one
pub const DEFAULT_METRIC: &str = "UnblendedCost";

/// Named date-range presets resolved against a reference date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangePreset {
    /// Previous 7 days including today
    Last7Days,
    /// Previous 30 days including today
    Last30Days,
    /// Previous 12 calendar months including the current one
    Last12Months,
    /// First of the current month through today
    MonthToDate,
}

impl RangePreset {
    /// Resolve the preset into a concrete period ending at `today`
    pub fn resolve(&self, today: NaiveDate) -> TimePeriod {
        match self {
            Self::Last7Days => TimePeriod::last_days(today, 7),
            Self::Last30Days => TimePeriod::last_days(today, 30),
            Self::Last12Months => TimePeriod::last_months(today, 12),
            Self::MonthToDate => TimePeriod {
                start: crate::types::first_of_month(today),
                end: today,
            },
        }
    }
}

/// Immutable per-request filter set
///
/// Tag filters are a map of tag key to a set of accepted values; values
/// within one key are OR'd, keys are AND'd against each other. Sets are
/// ordered (BTree) so serialization is deterministic, which the cache key
/// derivation relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostFilters {
    /// Requested date range, inclusive on both ends
    pub period: TimePeriod,
    /// Period size
    pub granularity: Granularity,
    /// Cost metric to query
    pub metric: String,
    /// Restrict to these service codes (empty = all)
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub services: BTreeSet<String>,
    /// Restrict to these linked account ids (empty = all)
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub accounts: BTreeSet<String>,
    /// Restrict to these regions (empty = all)
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub regions: BTreeSet<String>,
    /// Tag key to accepted values (OR within a key)
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

impl CostFilters {
    /// Create filters for a period with monthly granularity and the default metric
    pub fn new(period: TimePeriod) -> Self {
        Self {
            period,
            granularity: Granularity::Monthly,
            metric: DEFAULT_METRIC.to_string(),
            services: BTreeSet::new(),
            accounts: BTreeSet::new(),
            regions: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }

    /// Create filters from a preset resolved at `today`
    pub fn from_preset(preset: RangePreset, today: NaiveDate) -> Self {
        Self::new(preset.resolve(today))
    }

    /// Set the granularity
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Set the metric
    pub fn with_metric(mut self, metric: impl Into<String>) -> Self {
        self.metric = metric.into();
        self
    }

    /// Restrict to a service code
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }

    /// Restrict to a linked account
    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.accounts.insert(account.into());
        self
    }

    /// Restrict to a region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.regions.insert(region.into());
        self
    }

    /// Accept a value for a tag key
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(key.into()).or_default().insert(value.into());
        self
    }
}
