//! Top-N ranking

use crate::models::AggregatedRecord;

/// Order rows descending by `field` and keep at most `n`.
///
/// Missing or non-finite values rank as 0. Ties keep their input order.
pub fn top_n(records: &[AggregatedRecord], field: &str, n: usize) -> Vec<AggregatedRecord> {
    let mut ranked: Vec<(f64, &AggregatedRecord)> =
        records.iter().map(|r| (r.metric(field), r)).collect();

    // stable: equal metrics keep relative order
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    ranked.into_iter().take(n).map(|(_, r)| r.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FieldValue;
    use pretty_assertions::assert_eq;

    fn row(key: &str, earnings: f64) -> AggregatedRecord {
        let mut row = AggregatedRecord {
            key: key.into(),
            ..Default::default()
        };
        row.sums.insert("estimated_earnings".into(), earnings);
        row
    }

    fn keys(rows: &[AggregatedRecord]) -> Vec<&str> {
        rows.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_descending_and_truncated() {
        let rows = vec![row("a", 1.0), row("b", 5.0), row("c", 3.0), row("d", 4.0)];

        let top = top_n(&rows, "estimated_earnings", 2);

        assert_eq!(keys(&top), vec!["b", "d"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let rows = vec![row("x", 2.0), row("y", 7.0), row("z", 2.0), row("w", 2.0)];

        let top = top_n(&rows, "estimated_earnings", 10);

        assert_eq!(keys(&top), vec!["y", "x", "z", "w"]);
    }

    #[test]
    fn test_missing_and_nan_rank_as_zero() {
        let mut nan = row("nan", f64::NAN);
        nan.fields.insert("note".into(), FieldValue::Text("x".into()));
        let missing = AggregatedRecord {
            key: "missing".into(),
            ..Default::default()
        };
        let rows = vec![nan, row("neg", -1.0), missing, row("pos", 1.0)];

        let top = top_n(&rows, "estimated_earnings", 4);

        assert_eq!(keys(&top), vec!["pos", "nan", "missing", "neg"]);
    }

    #[test]
    fn test_negative_zero_ties_with_missing() {
        let mut negative_zero = AggregatedRecord {
            key: "negzero".into(),
            ..Default::default()
        };
        negative_zero.fields.insert("score".into(), FieldValue::Text("-0".into()));
        let missing = AggregatedRecord {
            key: "missing".into(),
            ..Default::default()
        };

        let top = top_n(&[negative_zero, missing], "score", 2);

        assert_eq!(keys(&top), vec!["negzero", "missing"]);
    }

    #[test]
    fn test_n_zero_and_empty() {
        assert!(top_n(&[row("a", 1.0)], "estimated_earnings", 0).is_empty());
        assert!(top_n(&[], "estimated_earnings", 8).is_empty());
    }
}
