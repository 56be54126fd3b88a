//! Record filtering by date range, category and key search
//!
//! Filtering is permissive: a record is only excluded when it positively
//! violates a predicate. Undated records pass the date range, and records
//! missing the categorical field pass the category match.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::{normalize_value, FieldValue, FilterCriteria, Record};

/// Timestamp fields, most preferred first
pub const DATE_FIELDS: [&str; 2] = ["updatedat", "createdat"];

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Keep the records satisfying every predicate in `criteria`
pub fn filter(records: &[Record], criteria: &FilterCriteria) -> Vec<Record> {
    if criteria.is_empty() {
        return records.to_vec();
    }

    let range = DateRange::from_criteria(criteria);
    records
        .iter()
        .filter(|record| matches_with(record, criteria, &range))
        .cloned()
        .collect()
}

fn matches_with(record: &Record, criteria: &FilterCriteria, range: &DateRange) -> bool {
    if let Some(date) = effective_date(record, criteria.timezone) {
        if !range.contains(date) {
            return false;
        }
    }

    if let Some(category) = &criteria.category {
        match record.text(&category.field) {
            Some(value) if normalize_value(&value) != category.value => return false,
            _ => {}
        }
    }

    if let Some(search) = &criteria.search {
        let key = record.text(&search.field).unwrap_or_default().to_lowercase();
        if !key.contains(&search.needle) {
            return false;
        }
    }

    true
}

/// Effective timestamp of a record, `None` when undated
pub fn effective_date(record: &Record, timezone: Tz) -> Option<DateTime<Utc>> {
    DATE_FIELDS
        .iter()
        .filter_map(|field| record.get(field))
        .find_map(|value| parse_timestamp(value, timezone))
}

/// Earliest and latest effective calendar dates in `timezone`
pub fn date_bounds(records: &[Record], timezone: Tz) -> Option<(NaiveDate, NaiveDate)> {
    let mut dates = records
        .iter()
        .filter_map(|r| effective_date(r, timezone))
        .map(|d| d.with_timezone(&timezone).date_naive());

    let first = dates.next()?;
    Some(dates.fold((first, first), |(lo, hi), d| (lo.min(d), hi.max(d))))
}

/// Parse a field value as a timestamp.
///
/// Numbers are epoch milliseconds. Text accepts RFC 3339, naive date-times and
/// plain dates; naive values are read in `timezone`.
pub fn parse_timestamp(value: &FieldValue, timezone: Tz) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Null => None,
        FieldValue::Number(ms) => {
            if !ms.is_finite() {
                return None;
            }
            Utc.timestamp_millis_opt(*ms as i64).single()
        }
        FieldValue::Text(raw) => parse_text(raw.trim(), timezone),
    }
}

fn parse_text(raw: &str, timezone: Tz) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return localize(naive, timezone);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return localize(date.and_hms_opt(0, 0, 0)?, timezone);
        }
    }
    None
}

fn localize(naive: NaiveDateTime, timezone: Tz) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Resolved instant bounds of a calendar date range
#[derive(Debug, Clone, Copy, Default)]
struct DateRange {
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

impl DateRange {
    fn from_criteria(criteria: &FilterCriteria) -> Self {
        let tz = criteria.timezone;
        Self {
            from: criteria
                .from
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .and_then(|n| localize(n, tz)),
            to: criteria
                .to
                .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
                .and_then(|n| localize(n, tz)),
        }
    }

    fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| instant >= from) && self.to.map_or(true, |to| instant <= to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryFilter, KeySearch};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn dated(tkid: &str, updated: &str) -> Record {
        Record::new().with("tkid", tkid).with("updatedAt", updated)
    }

    fn keys(records: &[Record]) -> Vec<String> {
        records.iter().filter_map(|r| r.text("tkid")).collect()
    }

    #[test]
    fn test_no_criteria_is_identity() {
        let records = vec![dated("a", "2025-03-01T10:00:00Z"), Record::new().with("x", 1)];
        assert_eq!(filter(&records, &FilterCriteria::none()), records);
    }

    #[test]
    fn test_range_is_inclusive_with_end_of_day() {
        let records = vec![
            dated("before", "2025-02-28T23:59:59Z"),
            dated("start", "2025-03-01T00:00:00Z"),
            dated("late", "2025-03-02T23:59:59.999Z"),
            dated("after", "2025-03-03T00:00:00Z"),
        ];
        let criteria =
            FilterCriteria::none().between(Some(date(2025, 3, 1)), Some(date(2025, 3, 2)));

        assert_eq!(keys(&filter(&records, &criteria)), vec!["start", "late"]);
    }

    #[test]
    fn test_undated_records_pass() {
        let records = vec![
            Record::new().with("tkid", "none"),
            dated("garbage", "not a date"),
            dated("old", "2020-01-01T00:00:00Z"),
        ];
        let criteria = FilterCriteria::none().between(Some(date(2025, 1, 1)), None);

        assert_eq!(keys(&filter(&records, &criteria)), vec!["none", "garbage"]);
    }

    #[test]
    fn test_updated_preferred_over_created() {
        let record = Record::new()
            .with("createdAt", "2020-01-01T00:00:00Z")
            .with("updatedAt", "2025-05-05T00:00:00Z");
        let found = effective_date(&record, Tz::UTC).unwrap();
        assert_eq!(found.date_naive(), date(2025, 5, 5));

        let fallback = Record::new()
            .with("createdAt", "2020-01-01T00:00:00Z")
            .with("updatedAt", "???");
        assert_eq!(effective_date(&fallback, Tz::UTC).unwrap().date_naive(), date(2020, 1, 1));
    }

    #[rstest]
    #[case("2025-03-01T12:30:00Z", "2025-03-01")]
    #[case("2025-03-01T12:30:00+02:00", "2025-03-01")]
    #[case("2025-03-01 12:30:00", "2025-03-01")]
    #[case("2025-03-01", "2025-03-01")]
    #[case("03/01/2025", "2025-03-01")]
    fn test_parse_text_formats(#[case] raw: &str, #[case] expected: &str) {
        let parsed = parse_timestamp(&FieldValue::Text(raw.into()), Tz::UTC).unwrap();
        assert_eq!(parsed.date_naive().to_string(), expected);
    }

    #[test]
    fn test_epoch_millis() {
        let parsed = parse_timestamp(&FieldValue::Number(1_735_689_600_000.0), Tz::UTC).unwrap();
        assert_eq!(parsed.date_naive(), date(2025, 1, 1));
    }

    #[test]
    fn test_bounds_follow_timezone() {
        // 07:30 UTC on the 2nd is still the 1st in Los Angeles
        let records = vec![dated("a", "2025-03-02T07:30:00Z")];
        let la = FilterCriteria::none()
            .in_timezone(chrono_tz::America::Los_Angeles)
            .between(None, Some(date(2025, 3, 1)));
        let utc = FilterCriteria::none().between(None, Some(date(2025, 3, 1)));

        assert_eq!(filter(&records, &la).len(), 1);
        assert_eq!(filter(&records, &utc).len(), 0);
    }

    #[test]
    fn test_category_match_is_permissive_on_missing_field() {
        let records = vec![
            Record::new().with("tkid", "t").with("agid", 6_864_116_138_i64),
            Record::new().with("tkid", "e").with("agid", "8177198441"),
            Record::new().with("tkid", "missing"),
            Record::new().with("tkid", "null").with("agid", FieldValue::Null),
        ];
        let criteria =
            FilterCriteria::none().with_category(CategoryFilter::new("agid", "6864116138"));

        assert_eq!(keys(&filter(&records, &criteria)), vec!["t", "missing", "null"]);
    }

    #[test]
    fn test_key_search() {
        let records = vec![
            Record::new().with("tkid", "Alpha-1"),
            Record::new().with("tkid", "beta-2"),
            Record::new(),
        ];
        let criteria = FilterCriteria::none().with_search(KeySearch::new("tkid", "ALPHA"));

        assert_eq!(keys(&filter(&records, &criteria)), vec!["Alpha-1"]);
    }

    #[test]
    fn test_date_bounds() {
        let records = vec![
            dated("a", "2025-03-04T00:00:00Z"),
            dated("b", "2025-03-01T00:00:00Z"),
            Record::new(),
            dated("c", "2025-03-09T00:00:00Z"),
        ];

        assert_eq!(
            date_bounds(&records, Tz::UTC),
            Some((date(2025, 3, 1), date(2025, 3, 9)))
        );
        assert_eq!(date_bounds(&[Record::new()], Tz::UTC), None);
    }
}
