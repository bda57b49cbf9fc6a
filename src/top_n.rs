//! Top-N reduction with an aggregated "Other" bucket
//!
//! Dashboards show the N largest cost buckets and collapse the long tail
//! into a single remainder. Percentages are computed against the total of
//! the full input so the displayed shares always sum to 100.

use crate::types::GroupResult;
use serde::{Deserialize, Serialize};

/// Default label for the aggregated remainder bucket
pub const DEFAULT_OTHER_LABEL: &str = "Other Services";

/// One ranked bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    /// Group label (service code, tag value, or the "Other" label)
    pub label: String,
    /// Metric value
    pub value: f64,
    /// Share of the full input total, 0..=100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

/// Result of a top-N reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopNResult {
    /// The N largest buckets, descending by value
    pub items: Vec<RankedItem>,
    /// Aggregated remainder, absent when nothing was left over
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other: Option<RankedItem>,
}

/// Reduces grouped results to N leaders plus a remainder bucket
#[derive(Debug, Clone)]
pub struct TopNProcessor {
    other_label: String,
}

impl TopNProcessor {
    /// Create a processor using the default "Other" label
    pub fn new() -> Self {
        Self {
            other_label: DEFAULT_OTHER_LABEL.to_string(),
        }
    }

    /// Override the remainder bucket label
    pub fn with_other_label(mut self, label: impl Into<String>) -> Self {
        self.other_label = label.into();
        self
    }

    /// Reduce `groups` to the top `n` by `metric`, with percentages.
    ///
    /// Sorting is descending by value with an ascending tie-break on label,
    /// so the output is deterministic regardless of input order. Percentages
    /// are computed over the full input total; when the total is zero they
    /// are reported as zero.
    pub fn reduce(&self, groups: &[GroupResult], metric: &str, n: usize) -> TopNResult {
        let mut ranked: Vec<(String, f64)> = groups
            .iter()
            .map(|g| (g.primary_key().to_string(), g.metric_value(metric)))
            .collect();
        if ranked.is_empty() {
            return TopNResult {
                items: Vec::new(),
                other: None,
            };
        }

        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let total: f64 = ranked.iter().map(|(_, v)| v).sum();
        let percent_of = |value: f64| {
            if total > 0.0 {
                Some(value / total * 100.0)
            } else {
                Some(0.0)
            }
        };

        let tail = ranked.split_off(n.min(ranked.len()));
        let items = ranked
            .into_iter()
            .map(|(label, value)| RankedItem {
                label,
                value,
                percent: percent_of(value),
            })
            .collect();

        let other = if tail.is_empty() {
            None
        } else {
            let value: f64 = tail.iter().map(|(_, v)| v).sum();
            Some(RankedItem {
                label: self.other_label.clone(),
                value,
                percent: percent_of(value),
            })
        };

        TopNResult { items, other }
    }
}

impl Default for TopNProcessor {
    fn default() -> Self {
        Self::new()
    }
}
