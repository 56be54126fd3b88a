//! Filter criteria

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::record::normalize_field;

/// Selector value meaning "no categorical filtering"
pub const SELECT_ALL: &str = "all";

/// Exact match on a normalized identifier field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFilter {
    /// Identifier field to compare
    pub field: String,
    /// Expected value (already normalized)
    pub value: String,
}

impl CategoryFilter {
    /// Build a categorical filter; `all` or a blank value means no filter
    pub fn new(field: &str, value: &str) -> Option<Self> {
        let value = normalize_value(value);
        if value.is_empty() || value == SELECT_ALL {
            return None;
        }
        Some(Self {
            field: normalize_field(field),
            value,
        })
    }
}

/// Case-insensitive substring search on a key field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySearch {
    /// Field searched
    pub field: String,
    /// Lower-cased needle
    pub needle: String,
}

impl KeySearch {
    /// Build a search; a blank needle means no search
    pub fn new(field: &str, needle: &str) -> Option<Self> {
        let needle = normalize_value(needle);
        (!needle.is_empty()).then(|| Self {
            field: normalize_field(field),
            needle,
        })
    }
}

/// Normalize an identifier value for comparison
pub fn normalize_value(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Which records a report view includes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Inclusive lower calendar date
    pub from: Option<NaiveDate>,
    /// Inclusive upper calendar date (through end of day)
    pub to: Option<NaiveDate>,
    /// Time zone the calendar dates are read in
    pub timezone: Tz,
    /// Optional categorical match
    pub category: Option<CategoryFilter>,
    /// Optional key search
    pub search: Option<KeySearch>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            timezone: Tz::UTC,
            category: None,
            search: None,
        }
    }
}

impl FilterCriteria {
    /// Criteria that keep everything
    pub fn none() -> Self {
        Self::default()
    }

    /// Set the date range
    #[must_use]
    pub fn between(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    /// Set the time zone used for date bounds
    #[must_use]
    pub fn in_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Set the categorical filter
    #[must_use]
    pub fn with_category(mut self, category: Option<CategoryFilter>) -> Self {
        self.category = category;
        self
    }

    /// Set the key search
    #[must_use]
    pub fn with_search(mut self, search: Option<KeySearch>) -> Self {
        self.search = search;
        self
    }

    /// Whether no predicate is active
    pub fn is_empty(&self) -> bool {
        self.from.is_none() && self.to.is_none() && self.category.is_none() && self.search.is_none()
    }
}
