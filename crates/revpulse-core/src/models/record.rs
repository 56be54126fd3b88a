//! Raw record model
//!
//! A record is one flat observation row from the partner API or the backend
//! store. Records are built through an explicit projection: only scalar JSON
//! values survive, and field names are lower-cased so that sources disagreeing
//! on case still group together.

use std::collections::BTreeMap;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::{Error, Result};

/// Largest integer magnitude an `f64` represents exactly (2^53).
const MAX_EXACT_INT: f64 = 9_007_199_254_740_992.0;

/// A single scalar field value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    /// Explicit null or absent value
    #[default]
    Null,
    /// Numeric value
    Number(f64),
    /// Text value (booleans are carried as text)
    Text(String),
}

impl FieldValue {
    /// Best-effort numeric view.
    ///
    /// Numbers pass through, numeric strings are parsed, everything else is
    /// `None`. Non-finite values are never returned.
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
            Self::Null => return None,
        };
        value.is_finite().then_some(value)
    }

    /// Opaque string rendering, used for group keys and identifiers.
    ///
    /// Integral numbers render without a fractional part.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Number(n) => Some(render_number(*n)),
            Self::Text(s) => Some(s.clone()),
        }
    }

    /// Check for null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(Self::Null),
            serde_json::Value::Bool(b) => Some(Self::Text(b.to_string())),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < MAX_EXACT_INT => {
                serializer.serialize_i64(*n as i64)
            }
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Normalize a field name for lookup and grouping
pub fn normalize_field(name: &str) -> String {
    name.trim().to_lowercase()
}

/// One raw observation row
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Project a JSON object into a record.
    ///
    /// Returns `None` when the value is not an object. Nested objects and
    /// arrays are dropped.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let fields = object
            .iter()
            .filter_map(|(name, value)| {
                FieldValue::from_json(value).map(|v| (normalize_field(name), v))
            })
            .collect();
        Some(Self { fields })
    }

    /// Project a JSON payload into a batch of records.
    ///
    /// Fails with [`Error::InvalidInput`] when the payload is not an array.
    /// Array elements that are not objects are skipped.
    pub fn batch_from_json(payload: &serde_json::Value) -> Result<Vec<Self>> {
        let items = payload.as_array().ok_or_else(|| {
            Error::invalid_input(format!("expected an array of records, got {}", kind_of(payload)))
        })?;

        let records: Vec<Self> = items.iter().filter_map(Self::from_json).collect();
        if records.len() != items.len() {
            debug!(
                skipped = items.len() - records.len(),
                "Dropped non-object entries from payload"
            );
        }
        Ok(records)
    }

    /// Builder-style field insertion
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) {
        self.fields.insert(normalize_field(name), value.into());
    }

    /// Get a field by (case-insensitive) name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(&normalize_field(name))
    }

    /// Numeric value of a field, coerced; missing or unparseable values are 0
    pub fn number(&self, name: &str) -> f64 {
        self.get(name).and_then(FieldValue::as_f64).unwrap_or(0.0)
    }

    /// String rendering of a field, `None` for missing or null
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name).and_then(FieldValue::render)
    }

    /// Iterate over fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialize to a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl<K: AsRef<str>, V: Into<FieldValue>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = Self::new();
        for (name, value) in iter {
            record.insert(name.as_ref(), value);
        }
        record
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
