//! Gap filling for sparse cost series
//!
//! Upstream responses omit periods with no recorded spend. The gap filler
//! guarantees that every series handed to callers has exactly one point per
//! period in the requested range, inserting synthetic zero-value points for
//! the missing ones so charts can always render a full axis.
//!
//! # Examples
//!
//! ```
//! use costpipe::gap_filler::GapFiller;
//! use costpipe::types::{CostSeries, DataSource, Granularity, TimePeriod};
//! use chrono::NaiveDate;
//!
//! let period = TimePeriod::new(
//!     NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
//! ).unwrap();
//!
//! let filler = GapFiller::new("USD");
//! let empty = CostSeries::empty("UnblendedCost", DataSource::AggregatedApi);
//! let filled = filler.fill(&empty, &period, Granularity::Monthly);
//! assert_eq!(filled.points.len(), 3);
//! assert!(filled.points.iter().all(|p| p.amount == 0.0));
//! ```

use crate::types::{CostPoint, CostSeries, Granularity, TimePeriod, first_of_month};
use std::collections::{BTreeSet, HashMap};

/// Fills period gaps with zero-value points
#[derive(Debug, Clone)]
pub struct GapFiller {
    default_currency: String,
}

impl GapFiller {
    /// Create a filler emitting synthetic points in `default_currency`
    pub fn new(default_currency: impl Into<String>) -> Self {
        Self {
            default_currency: default_currency.into(),
        }
    }

    /// Produce a series with exactly one point per period in the range.
    ///
    /// Existing points are kept as-is; missing periods get a zero-value
    /// point. The output is sorted by construction because periods are
    /// walked in order. Filling an already-complete series returns an
    /// equivalent series; filling an empty one returns a full zero series.
    pub fn fill(
        &self,
        series: &CostSeries,
        period: &TimePeriod,
        granularity: Granularity,
    ) -> CostSeries {
        let by_label: HashMap<&str, &CostPoint> = series
            .points
            .iter()
            .map(|p| (p.date.as_str(), p))
            .collect();

        let points = period_labels(period, granularity)
            .into_iter()
            .map(|label| match by_label.get(label.as_str()) {
                Some(existing) => (*existing).clone(),
                None => CostPoint::zero(label, &self.default_currency),
            })
            .collect();

        CostSeries {
            metric: series.metric.clone(),
            group_key: series.group_key.clone(),
            points,
            source: series.source,
        }
    }

    /// Gap-fill a grouped series so every group has one point per period.
    ///
    /// The input may interleave groups; the output lists periods in order
    /// and, within each period, groups in ascending label order.
    pub fn fill_grouped(
        &self,
        series: &CostSeries,
        period: &TimePeriod,
        granularity: Granularity,
    ) -> CostSeries {
        let groups: BTreeSet<&str> = series
            .points
            .iter()
            .filter_map(|p| p.group.as_deref())
            .collect();
        if groups.is_empty() {
            return self.fill(series, period, granularity);
        }

        let by_key: HashMap<(&str, &str), &CostPoint> = series
            .points
            .iter()
            .filter_map(|p| p.group.as_deref().map(|g| ((p.date.as_str(), g), p)))
            .collect();

        let mut points = Vec::new();
        for label in period_labels(period, granularity) {
            for group in &groups {
                match by_key.get(&(label.as_str(), group)) {
                    Some(existing) => points.push((*existing).clone()),
                    None => {
                        let mut zero = CostPoint::zero(label.clone(), &self.default_currency);
                        zero.group = Some((*group).to_string());
                        points.push(zero);
                    }
                }
            }
        }

        CostSeries {
            metric: series.metric.clone(),
            group_key: series.group_key.clone(),
            points,
            source: series.source,
        }
    }
}

/// Normalized labels for every period in the range, start to end inclusive
pub fn period_labels(period: &TimePeriod, granularity: Granularity) -> Vec<String> {
    let mut labels = Vec::new();
    match granularity {
        Granularity::Daily => {
            let mut date = period.start;
            while date <= period.end {
                labels.push(granularity.label_for(date));
                match date.succ_opt() {
                    Some(next) => date = next,
                    None => break,
                }
            }
        }
        Granularity::Monthly => {
            let mut date = first_of_month(period.start);
            let last = first_of_month(period.end);
            while date <= last {
                labels.push(granularity.label_for(date));
                match date.checked_add_months(chrono::Months::new(1)) {
                    Some(next) => date = next,
                    None => break,
                }
            }
        }
    }
    labels
}
