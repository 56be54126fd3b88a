//! Report view models

use serde::Serialize;

use super::aggregate::AggregatedRecord;

/// A labeled series handed to a chart sink
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ChartSeries {
    /// Chart title
    pub title: String,
    /// Dataset label
    pub label: String,
    /// One label per bar
    pub labels: Vec<String>,
    /// One value per bar
    pub values: Vec<f64>,
}

impl ChartSeries {
    /// Whether the series has no points
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Headline totals over the aggregated rows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct Totals {
    /// Total estimated earnings
    pub earnings: f64,
    /// Total clicks
    pub clicks: f64,
    /// Total estimated clicks
    pub estimated_clicks: f64,
}

/// Totals for one agency
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AgencyTotals {
    /// Agency name
    pub agency: String,
    /// Estimated earnings
    pub earnings: f64,
    /// Clicks
    pub clicks: f64,
    /// Estimated clicks
    pub estimated_clicks: f64,
    /// Number of sites
    pub sites: usize,
}

/// Everything a report view needs
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Report {
    /// Rows before filtering
    pub total_rows: usize,
    /// Rows after filtering
    pub filtered_rows: usize,
    /// Aggregated rows, sorted by key
    pub rows: Vec<AggregatedRecord>,
    /// Top rows by the ranking field
    pub top: Vec<AggregatedRecord>,
    /// Chart data for the top rows
    pub chart: ChartSeries,
    /// Headline totals
    pub totals: Totals,
    /// Per-agency totals, in first-seen order
    pub by_agency: Vec<AgencyTotals>,
}

/// Formatted table: aliased headers and display strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct TableView {
    /// Column headers
    pub headers: Vec<String>,
    /// Rows of display cells
    pub rows: Vec<Vec<String>>,
}
