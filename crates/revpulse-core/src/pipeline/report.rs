//! Report assembly: filter, aggregate, rank and summarize in one pass

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::debug;

use crate::config::ReportConfig;
use crate::models::{
    AgencyTotals, AggregatedRecord, AggregationSpec, CategoryFilter, ChartSeries, FilterCriteria,
    KeySearch, Record, Report, TableView, Totals, UNKNOWN_AGENCY,
};

use super::aggregate::{aggregate, sort_by_key};
use super::filter::filter;
use super::format::TableLayout;
use super::rank::top_n;

/// Builds report views from raw records
#[derive(Debug, Clone)]
pub struct ReportBuilder {
    spec: AggregationSpec,
    rank_field: String,
    top_n: usize,
    timezone: Tz,
    layout: TableLayout,
    chart_title: String,
    chart_label: String,
    earnings_field: String,
    clicks_field: String,
    estimated_clicks_field: String,
}

impl ReportBuilder {
    /// Create a builder from report configuration
    pub fn from_config(config: &ReportConfig, timezone: Tz) -> Self {
        Self {
            spec: config.aggregation.clone().normalized(),
            rank_field: config.rank_field.to_lowercase(),
            top_n: config.top_n,
            timezone,
            layout: config.table.clone(),
            chart_title: config.chart_title.clone(),
            chart_label: config.chart_label.clone(),
            earnings_field: config.earnings_field.to_lowercase(),
            clicks_field: config.clicks_field.to_lowercase(),
            estimated_clicks_field: config.estimated_clicks_field.to_lowercase(),
        }
    }

    /// Override the leaderboard size
    #[must_use]
    pub fn with_top_n(mut self, n: usize) -> Self {
        self.top_n = n;
        self
    }

    /// The aggregation spec in use
    pub fn spec(&self) -> &AggregationSpec {
        &self.spec
    }

    /// Build filter criteria from user-facing selectors.
    ///
    /// `agency` may be `all`, an agency name, or an agency id.
    pub fn criteria(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
        agency: Option<&str>,
        search: Option<&str>,
    ) -> FilterCriteria {
        let category = agency.and_then(|selector| match &self.spec.lookup {
            Some(lookup) => {
                let id = lookup.directory.id_for(selector).unwrap_or(selector);
                CategoryFilter::new(&lookup.source, id)
            }
            None => None,
        });

        FilterCriteria::none()
            .in_timezone(self.timezone)
            .between(from, to)
            .with_category(category)
            .with_search(search.and_then(|s| KeySearch::new(&self.spec.group_key, s)))
    }

    /// Build the full report for `records`
    pub fn build(&self, records: &[Record], criteria: &FilterCriteria) -> Report {
        let filtered = filter(records, criteria);
        let mut rows = aggregate(&filtered, &self.spec);
        sort_by_key(&mut rows);

        let top = top_n(&rows, &self.rank_field, self.top_n);
        let chart = self.chart(&top);
        let totals = self.totals(&rows);
        let by_agency = self.by_agency(&rows);

        debug!(
            total = records.len(),
            filtered = filtered.len(),
            groups = rows.len(),
            "Built report"
        );

        Report {
            total_rows: records.len(),
            filtered_rows: filtered.len(),
            rows,
            top,
            chart,
            totals,
            by_agency,
        }
    }

    /// Render the detail table for a report
    pub fn table(&self, report: &Report) -> TableView {
        self.layout.render(&report.rows, &self.spec)
    }

    fn agency_of(&self, row: &AggregatedRecord) -> String {
        self.spec
            .lookup
            .as_ref()
            .and_then(|lookup| row.label(&lookup.target))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_AGENCY.to_string())
    }

    fn chart(&self, top: &[AggregatedRecord]) -> ChartSeries {
        ChartSeries {
            title: self.chart_title.clone(),
            label: self.chart_label.clone(),
            labels: top
                .iter()
                .map(|row| format!("{} ({})", row.key, self.agency_of(row)))
                .collect(),
            values: top.iter().map(|row| row.metric(&self.rank_field)).collect(),
        }
    }

    fn totals(&self, rows: &[AggregatedRecord]) -> Totals {
        rows.iter().fold(Totals::default(), |mut acc, row| {
            acc.earnings += row.metric(&self.earnings_field);
            acc.clicks += row.metric(&self.clicks_field);
            acc.estimated_clicks += row.metric(&self.estimated_clicks_field);
            acc
        })
    }

    fn by_agency(&self, rows: &[AggregatedRecord]) -> Vec<AgencyTotals> {
        let mut out: Vec<AgencyTotals> = Vec::new();
        for row in rows {
            let agency = self.agency_of(row);
            let slot = match out.iter().position(|a| a.agency == agency) {
                Some(i) => i,
                None => {
                    out.push(AgencyTotals {
                        agency,
                        ..Default::default()
                    });
                    out.len() - 1
                }
            };
            let entry = &mut out[slot];
            entry.earnings += row.metric(&self.earnings_field);
            entry.clicks += row.metric(&self.clicks_field);
            entry.estimated_clicks += row.metric(&self.estimated_clicks_field);
            entry.sites += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn builder() -> ReportBuilder {
        ReportBuilder::from_config(&ReportConfig::default(), Tz::UTC)
    }

    fn row(tkid: &str, agid: &str, earnings: f64, clicks: f64, updated: &str) -> Record {
        Record::new()
            .with("TKID", tkid)
            .with("AGID", agid)
            .with("ESTIMATED_EARNINGS", earnings)
            .with("CLICKS", clicks)
            .with("ESTIMATED_CLICKS", clicks / 2.0)
            .with("updatedAt", updated)
    }

    fn sample() -> Vec<Record> {
        vec![
            row("s1", "6864116138", 10.0, 20.0, "2025-03-01T10:00:00Z"),
            row("s2", "8177198441", 30.0, 10.0, "2025-03-02T10:00:00Z"),
            row("s1", "6864116138", 5.0, 10.0, "2025-03-03T10:00:00Z"),
            row("s3", "999", 1.0, 0.0, "2025-03-04T10:00:00Z"),
        ]
    }

    #[test]
    fn test_full_report() {
        let builder = builder();
        let report = builder.build(&sample(), &FilterCriteria::none());

        assert_eq!(report.total_rows, 4);
        assert_eq!(report.filtered_rows, 4);
        assert_eq!(report.rows.len(), 3);

        let keys: Vec<_> = report.top.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["s2", "s1", "s3"]);

        assert_eq!(
            report.chart.labels,
            vec!["s2 (EveryKnown)", "s1 (Travado)", "s3 (999)"]
        );
        assert_eq!(report.chart.values, vec![30.0, 15.0, 1.0]);

        assert_eq!(
            report.totals,
            Totals {
                earnings: 46.0,
                clicks: 40.0,
                estimated_clicks: 20.0,
            }
        );

        let agencies: Vec<_> = report
            .by_agency
            .iter()
            .map(|a| (a.agency.as_str(), a.sites))
            .collect();
        assert_eq!(agencies, vec![("Travado", 1), ("EveryKnown", 1), ("999", 1)]);
    }

    #[test]
    fn test_agency_selector_by_name() {
        let builder = builder();
        let criteria = builder.criteria(None, None, Some("travado"), None);

        let report = builder.build(&sample(), &criteria);

        assert_eq!(report.filtered_rows, 2);
        assert_eq!(report.rows.len(), 1);
        assert_eq!(report.rows[0].sum("estimated_earnings"), 15.0);
    }

    #[test]
    fn test_all_selector_and_date_range() {
        let builder = builder();
        let criteria = builder.criteria(
            NaiveDate::from_ymd_opt(2025, 3, 2),
            NaiveDate::from_ymd_opt(2025, 3, 3),
            Some("all"),
            None,
        );

        let report = builder.build(&sample(), &criteria);

        assert_eq!(report.filtered_rows, 2);
        let keys: Vec<_> = report.rows.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["s1", "s2"]);
    }

    #[test]
    fn test_search_and_table() {
        let builder = builder();
        let criteria = builder.criteria(None, None, None, Some("S2"));

        let report = builder.build(&sample(), &criteria);
        let table = builder.table(&report);

        assert_eq!(report.rows.len(), 1);
        assert_eq!(
            table.headers,
            vec![
                "Site ID",
                "Agency ID",
                "Agency",
                "Est. Earnings",
                "Ad Requests",
                "Matched Requests",
                "Impressions",
                "Ad Impressions",
                "Clicks",
                "Est. Clicks",
                "RPC"
            ]
        );
        assert_eq!(table.rows[0][0], "s2");
        assert_eq!(table.rows[0][2], "EveryKnown");
        assert_eq!(table.rows[0][3], "$30.00");
        assert_eq!(table.rows[0][10], "$3.00");
    }

    #[test]
    fn test_empty_input() {
        let report = builder().build(&[], &FilterCriteria::none());
        assert!(report.rows.is_empty());
        assert!(report.chart.is_empty());
        assert!(report.by_agency.is_empty());
    }
}
