//! Group-by-key aggregation
//!
//! Folds raw records into one [`AggregatedRecord`] per distinct group key.
//! Sums start at zero, derived ratios are computed once after every record has
//! been folded in, and carried fields come from the first record seen for a
//! key. The lookup field is the exception: it is recomputed on every record so
//! the latest mapping wins.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{
    AggregatedRecord, AggregationSpec, DerivedField, FieldValue, Record, UNKNOWN_KEY,
};

/// Aggregate records according to `spec`.
///
/// Output is in first-seen key order, but callers that need a stable display
/// order should sort explicitly ([`sort_by_key`] or the ranker).
pub fn aggregate(records: &[Record], spec: &AggregationSpec) -> Vec<AggregatedRecord> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<AggregatedRecord> = Vec::new();

    for record in records {
        let key = record
            .text(&spec.group_key)
            .unwrap_or_else(|| UNKNOWN_KEY.to_string());

        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                index.insert(key.clone(), rows.len());
                rows.push(empty_row(key, spec));
                rows.len() - 1
            }
        };

        fold(&mut rows[slot], record, spec);
    }

    for row in &mut rows {
        finish(row, spec);
    }

    debug!(
        records = records.len(),
        groups = rows.len(),
        key = %spec.group_key,
        "Aggregated records"
    );
    rows
}

/// Aggregate a raw JSON payload.
///
/// Fails with `InvalidInput` when the payload is not an array.
pub fn aggregate_payload(
    payload: &serde_json::Value,
    spec: &AggregationSpec,
) -> Result<Vec<AggregatedRecord>> {
    let records = Record::batch_from_json(payload)?;
    Ok(aggregate(&records, spec))
}

/// Aggregate a raw JSON payload, treating invalid input as an empty result
pub fn aggregate_payload_or_empty(
    payload: &serde_json::Value,
    spec: &AggregationSpec,
) -> Vec<AggregatedRecord> {
    aggregate_payload(payload, spec).unwrap_or_else(|e| {
        warn!(error = %e, "Aggregation input rejected, using empty result");
        Vec::new()
    })
}

/// Sort aggregated rows by group key, the default display order
pub fn sort_by_key(rows: &mut [AggregatedRecord]) {
    rows.sort_by(|a, b| a.key.cmp(&b.key));
}

fn empty_row(key: String, spec: &AggregationSpec) -> AggregatedRecord {
    AggregatedRecord {
        key,
        sums: spec.summable.iter().map(|f| (f.clone(), 0.0)).collect(),
        ..Default::default()
    }
}

fn fold(row: &mut AggregatedRecord, record: &Record, spec: &AggregationSpec) {
    for field in &spec.summable {
        if let Some(sum) = row.sums.get_mut(field) {
            *sum += record.number(field);
        }
    }

    for (name, value) in record.fields() {
        if spec.is_summable(name) || is_derived(spec, name) {
            continue;
        }
        // first non-absent value wins; later records only fill gaps
        if !row.fields.contains_key(name) {
            row.fields.insert(name.to_string(), value.clone());
        }
    }

    if let Some(lookup) = &spec.lookup {
        row.fields
            .insert(lookup.target.clone(), FieldValue::Text(lookup.resolve(record)));
    }
}

fn finish(row: &mut AggregatedRecord, spec: &AggregationSpec) {
    for derived in &spec.derived {
        let numerator = row.sums.get(&derived.numerator).copied().unwrap_or(0.0);
        let denominator = row.sums.get(&derived.denominator).copied().unwrap_or(0.0);
        row.derived
            .insert(derived.name.clone(), DerivedField::compute(numerator, denominator));
    }
}

fn is_derived(spec: &AggregationSpec, field: &str) -> bool {
    spec.derived.iter().any(|d| d.name == field)
}
