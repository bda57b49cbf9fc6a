//! Period-over-period trend calculation
//!
//! Takes the last two points of a sorted series and reports the absolute
//! change, percentage change and a direction classification. A series with
//! fewer than two points has no trend, which is reported as `None` rather
//! than a default zero.

use crate::types::CostSeries;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a period-over-period change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    /// Current period costs more than the previous one
    Increase,
    /// Current period costs less than the previous one
    Decrease,
    /// No change
    Stable,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increase => write!(f, "increase"),
            Self::Decrease => write!(f, "decrease"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Period-over-period delta between the last two points of a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trend {
    /// current - previous
    pub change: f64,
    /// Percentage change relative to the previous period. When the previous
    /// period was zero and the current one is not, this is `f64::INFINITY`.
    pub change_percent: f64,
    /// Direction classification
    pub direction: TrendDirection,
}

/// Compute the trend from the last two points of a sorted series.
///
/// Returns `None` when the series has fewer than two points.
pub fn period_over_period(series: &CostSeries) -> Option<Trend> {
    let len = series.points.len();
    if len < 2 {
        return None;
    }

    let previous = series.points[len - 2].amount;
    let current = series.points[len - 1].amount;
    let change = current - previous;

    let change_percent = if previous > 0.0 {
        change / previous * 100.0
    } else if current > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let direction = if current > previous {
        TrendDirection::Increase
    } else if current < previous {
        TrendDirection::Decrease
    } else {
        TrendDirection::Stable
    };

    Some(Trend {
        change,
        change_percent,
        direction,
    })
}
