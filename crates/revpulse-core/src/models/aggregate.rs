//! Aggregation models

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::record::{normalize_field, FieldValue, Record};

/// Group key used for records that lack the key field
pub const UNKNOWN_KEY: &str = "__UNKNOWN_TKID__";

/// Agency name used when a record carries no agency id
pub const UNKNOWN_AGENCY: &str = "Unknown";

/// How a derived ratio is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DerivedFormat {
    /// Currency string with two decimals (`$0.67`)
    #[default]
    Currency,
    /// Raw number
    Raw,
}

/// A ratio computed from two summed fields after folding completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedField {
    /// Output field name
    pub name: String,
    /// Summed field used as numerator
    pub numerator: String,
    /// Summed field used as denominator
    pub denominator: String,
    /// Presentation format
    #[serde(default)]
    pub format: DerivedFormat,
}

impl DerivedField {
    /// Compute the ratio, `0.0` when the denominator is not positive
    pub fn compute(numerator_sum: f64, denominator_sum: f64) -> f64 {
        if denominator_sum > 0.0 {
            let value = numerator_sum / denominator_sum;
            if value.is_finite() {
                return value;
            }
        }
        0.0
    }
}

/// Maps agency ids to display names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct AgencyDirectory {
    names: BTreeMap<String, String>,
}

impl AgencyDirectory {
    /// Create a directory from `(id, name)` pairs
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            names: entries
                .into_iter()
                .map(|(id, name)| (id.into(), name.into()))
                .collect(),
        }
    }

    /// Resolve an id to its agency name.
    ///
    /// Unmapped ids resolve to themselves; a missing id is `Unknown`.
    pub fn resolve(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => self.names.get(id).cloned().unwrap_or_else(|| id.to_string()),
            None => UNKNOWN_AGENCY.to_string(),
        }
    }

    /// Find the id for a selector, which may be an agency name (any case) or an id
    pub fn id_for(&self, selector: &str) -> Option<&str> {
        let wanted = selector.trim();
        self.names
            .iter()
            .find(|(id, name)| name.eq_ignore_ascii_case(wanted) || id.as_str() == wanted)
            .map(|(id, _)| id.as_str())
    }

    /// Iterate `(id, name)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.names.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// A field recomputed from another field on every contributing record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupField {
    /// Identifier field read from each record
    pub source: String,
    /// Field written on the aggregated record
    pub target: String,
    /// Id to name mapping
    pub directory: AgencyDirectory,
}

impl LookupField {
    /// Resolve the lookup value for one record
    pub fn resolve(&self, record: &Record) -> String {
        self.directory.resolve(record.text(&self.source).as_deref())
    }
}

/// What to group on, what to sum and what to derive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    /// Field whose value is the group key
    pub group_key: String,
    /// Fields summed across records of a group
    pub summable: Vec<String>,
    /// Ratios computed from the final sums
    #[serde(default)]
    pub derived: Vec<DerivedField>,
    /// Lookup recomputed per record, latest wins
    #[serde(default)]
    pub lookup: Option<LookupField>,
}

impl AggregationSpec {
    /// Create a spec grouping on `group_key`
    pub fn new(group_key: &str) -> Self {
        Self {
            group_key: normalize_field(group_key),
            summable: Vec::new(),
            derived: Vec::new(),
            lookup: None,
        }
    }

    /// Add a summable field
    #[must_use]
    pub fn sum(mut self, field: &str) -> Self {
        let field = normalize_field(field);
        if !self.summable.contains(&field) {
            self.summable.push(field);
        }
        self
    }

    /// Add a derived ratio `numerator / denominator`
    #[must_use]
    pub fn derive(
        mut self,
        name: &str,
        numerator: &str,
        denominator: &str,
        format: DerivedFormat,
    ) -> Self {
        self.derived.push(DerivedField {
            name: normalize_field(name),
            numerator: normalize_field(numerator),
            denominator: normalize_field(denominator),
            format,
        });
        self
    }

    /// Set the lookup field
    #[must_use]
    pub fn lookup(mut self, source: &str, target: &str, directory: AgencyDirectory) -> Self {
        self.lookup = Some(LookupField {
            source: normalize_field(source),
            target: normalize_field(target),
            directory,
        });
        self
    }

    /// Whether a field is summed
    pub fn is_summable(&self, field: &str) -> bool {
        self.summable.iter().any(|f| f == field)
    }

    /// Lower-case every field name
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.group_key = normalize_field(&self.group_key);
        for field in &mut self.summable {
            *field = normalize_field(field);
        }
        for derived in &mut self.derived {
            derived.name = normalize_field(&derived.name);
            derived.numerator = normalize_field(&derived.numerator);
            derived.denominator = normalize_field(&derived.denominator);
        }
        if let Some(lookup) = &mut self.lookup {
            lookup.source = normalize_field(&lookup.source);
            lookup.target = normalize_field(&lookup.target);
        }
        self
    }
}

/// Per-key summary of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AggregatedRecord {
    /// Group key value
    pub key: String,
    /// Running sums per summable field
    pub sums: BTreeMap<String, f64>,
    /// Ratios computed after folding
    pub derived: BTreeMap<String, f64>,
    /// Carried non-summable fields (and the lookup field)
    pub fields: BTreeMap<String, FieldValue>,
}

impl AggregatedRecord {
    /// Summed value of a field, 0 when not summed
    pub fn sum(&self, field: &str) -> f64 {
        self.sums.get(&normalize_field(field)).copied().unwrap_or(0.0)
    }

    /// Derived value of a field
    pub fn derived(&self, field: &str) -> Option<f64> {
        self.derived.get(&normalize_field(field)).copied()
    }

    /// Numeric view of any field for ranking; missing or non-finite is 0
    pub fn metric(&self, field: &str) -> f64 {
        let field = normalize_field(field);
        let value = self
            .sums
            .get(&field)
            .or_else(|| self.derived.get(&field))
            .copied()
            .or_else(|| self.fields.get(&field).and_then(FieldValue::as_f64))
            .unwrap_or(0.0);
        // `+ 0.0` folds -0.0 into 0.0 so signed zeros tie
        if value.is_finite() {
            value + 0.0
        } else {
            0.0
        }
    }

    /// Text view of a carried field
    pub fn label(&self, field: &str) -> Option<String> {
        self.fields.get(&normalize_field(field)).and_then(FieldValue::render)
    }

    /// Flatten into a single record: carried fields, then sums, then derived
    pub fn to_record(&self) -> Record {
        let mut record: Record = self.fields.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        for (name, value) in self.sums.iter().chain(self.derived.iter()) {
            record.insert(name, *value);
        }
        record
    }
}
