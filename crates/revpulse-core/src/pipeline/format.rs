//! Display formatting
//!
//! Aggregation keeps raw numbers; this is the separate step that turns them
//! into display strings and tables.

use serde::{Deserialize, Serialize};

use crate::models::{
    normalize_field, AggregatedRecord, AggregationSpec, DerivedFormat, FieldValue, Record,
    TableView,
};

/// Format a currency amount with two decimals (`$12.50`)
pub fn money(value: f64) -> String {
    if !value.is_finite() {
        return "$0.00".to_string();
    }
    format!("${:.2}", clean_zero((value * 100.0).round() / 100.0))
}

/// Format a count with thousands separators and at most three decimals
pub fn count(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let rounded = clean_zero((value * 1000.0).round() / 1000.0);
    let negative = rounded < 0.0;
    let text = format!("{:.3}", rounded.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), ""));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let frac = frac_part.trim_end_matches('0');
    let sign = if negative { "-" } else { "" };
    if frac.is_empty() {
        format!("{sign}{grouped}")
    } else {
        format!("{sign}{grouped}.{frac}")
    }
}

fn clean_zero(value: f64) -> f64 {
    if value == 0.0 {
        0.0
    } else {
        value
    }
}

/// Render a derived value in its configured format
pub fn derived_value(value: f64, format: DerivedFormat) -> FieldValue {
    match format {
        DerivedFormat::Currency => FieldValue::Text(money(value)),
        DerivedFormat::Raw => FieldValue::Number(value),
    }
}

/// Flatten an aggregated row for display: carried fields, numeric sums, and
/// derived fields rendered in their configured format
pub fn present(row: &AggregatedRecord, spec: &AggregationSpec) -> Record {
    let mut record = row.to_record();
    for derived in &spec.derived {
        if let Some(value) = row.derived(&derived.name) {
            record.insert(&derived.name, derived_value(value, derived.format));
        }
    }
    record
}

/// How a column's cells are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    /// Currency amount
    Money,
    /// Thousands-separated number
    Count,
    /// Plain text
    #[default]
    Text,
}

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Source field
    pub field: String,
    /// Header shown instead of the field name
    pub header: String,
    /// Cell rendering
    #[serde(default)]
    pub kind: ColumnKind,
}

impl ColumnSpec {
    /// Create a column
    pub fn new(field: &str, header: &str, kind: ColumnKind) -> Self {
        Self {
            field: normalize_field(field),
            header: header.to_string(),
            kind,
        }
    }
}

/// Column order, headers and exclusions for the detail table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableLayout {
    /// Known columns, in display order
    pub columns: Vec<ColumnSpec>,
    /// Fields never shown
    pub excluded: Vec<String>,
}

impl Default for TableLayout {
    fn default() -> Self {
        use ColumnKind::{Count, Money, Text};
        Self {
            columns: vec![
                ColumnSpec::new("tkid", "Site ID", Text),
                ColumnSpec::new("agid", "Agency ID", Text),
                ColumnSpec::new("agency", "Agency", Text),
                ColumnSpec::new("estimated_earnings", "Est. Earnings", Money),
                ColumnSpec::new("ad_requests", "Ad Requests", Count),
                ColumnSpec::new("matched_ad_requests", "Matched Requests", Count),
                ColumnSpec::new("impressions", "Impressions", Count),
                ColumnSpec::new("individual_ad_impressions", "Ad Impressions", Count),
                ColumnSpec::new("clicks", "Clicks", Count),
                ColumnSpec::new("estimated_clicks", "Est. Clicks", Count),
                ColumnSpec::new("rpc", "RPC", Text),
            ],
            excluded: [
                "funnel_requests",
                "funnel_impressions",
                "funnel_clicks",
                "date_uploaded",
                "__v",
                "createdat",
                "updatedat",
                "recordid",
                "page_views",
                "_id",
                "date",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl TableLayout {
    fn is_excluded(&self, field: &str) -> bool {
        self.excluded.iter().any(|f| f == field)
    }

    /// Visible columns for a set of presented rows.
    ///
    /// Known columns come first in layout order, then any other field of the
    /// first row in name order.
    pub fn visible_columns(&self, first: &Record) -> Vec<ColumnSpec> {
        let mut columns: Vec<ColumnSpec> = self
            .columns
            .iter()
            .filter(|c| first.get(&c.field).is_some() && !self.is_excluded(&c.field))
            .cloned()
            .collect();

        for (field, _) in first.fields() {
            if self.is_excluded(field) || columns.iter().any(|c| c.field == field) {
                continue;
            }
            columns.push(ColumnSpec::new(field, field, ColumnKind::Text));
        }
        columns
    }

    /// Build the detail table for aggregated rows
    pub fn render(&self, rows: &[AggregatedRecord], spec: &AggregationSpec) -> TableView {
        let presented: Vec<Record> = rows.iter().map(|r| present(r, spec)).collect();
        let Some(first) = presented.first() else {
            return TableView::default();
        };

        let columns = self.visible_columns(first);
        TableView {
            headers: columns.iter().map(|c| c.header.clone()).collect(),
            rows: presented
                .iter()
                .map(|record| columns.iter().map(|c| cell(record, c)).collect())
                .collect(),
        }
    }
}

fn cell(record: &Record, column: &ColumnSpec) -> String {
    match column.kind {
        ColumnKind::Money => money(record.number(&column.field)),
        ColumnKind::Count => count(record.number(&column.field)),
        ColumnKind::Text => record.text(&column.field).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::aggregate;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, "$0.00")]
    #[case(10.0 / 15.0, "$0.67")]
    #[case(1234.5, "$1234.50")]
    #[case(-0.001, "$0.00")]
    #[case(f64::NAN, "$0.00")]
    fn test_money(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(money(value), expected);
    }

    #[rstest]
    #[case(0.0, "0")]
    #[case(999.0, "999")]
    #[case(1000.0, "1,000")]
    #[case(1_234_567.0, "1,234,567")]
    #[case(1234.5, "1,234.5")]
    #[case(0.12345, "0.123")]
    #[case(-12_000.0, "-12,000")]
    #[case(f64::INFINITY, "0")]
    fn test_count(#[case] value: f64, #[case] expected: &str) {
        assert_eq!(count(value), expected);
    }

    #[test]
    fn test_present_formats_currency_ratio() {
        let spec = AggregationSpec::new("tkid")
            .sum("clicks")
            .sum("earnings")
            .derive("rpc", "earnings", "clicks", DerivedFormat::Currency)
            .derive("ctr", "clicks", "earnings", DerivedFormat::Raw);
        let records = vec![
            Record::new().with("tkid", "A").with("clicks", 10).with("earnings", 5),
            Record::new().with("tkid", "A").with("clicks", 5).with("earnings", 5),
        ];

        let row = present(&aggregate::aggregate(&records, &spec)[0], &spec);

        assert_eq!(row.get("rpc"), Some(&FieldValue::Text("$0.67".into())));
        assert_eq!(row.get("ctr"), Some(&FieldValue::Number(1.5)));
        assert_eq!(row.number("clicks"), 15.0);
    }

    #[test]
    fn test_table_orders_aliases_and_excludes() {
        let spec = AggregationSpec::new("tkid").sum("clicks").sum("estimated_earnings");
        let records = vec![Record::new()
            .with("tkid", "A")
            .with("clicks", 1500)
            .with("estimated_earnings", 12.346)
            .with("createdAt", "2025-01-01")
            .with("_id", "x")
            .with("channel", "search")];

        let table = TableLayout::default().render(&aggregate::aggregate(&records, &spec), &spec);

        assert_eq!(table.headers, vec!["Site ID", "Est. Earnings", "Clicks", "channel"]);
        assert_eq!(table.rows, vec![vec!["A", "$12.35", "1,500", "search"]]);
    }

    #[test]
    fn test_empty_table() {
        let spec = AggregationSpec::new("tkid");
        assert_eq!(TableLayout::default().render(&[], &spec), TableView::default());
    }
}
