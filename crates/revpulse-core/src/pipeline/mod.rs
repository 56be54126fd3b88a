//! Pipeline module - pure record processing
//!
//! Everything here is synchronous and side-effect free: filtering,
//! aggregation, ranking, display formatting, and the report builder that
//! chains them.

pub mod aggregate;
pub mod filter;
pub mod format;
pub mod rank;
mod report;

pub use aggregate::{aggregate, aggregate_payload, aggregate_payload_or_empty, sort_by_key};
pub use filter::{date_bounds, effective_date, filter};
pub use format::{count, money, present, ColumnKind, ColumnSpec, TableLayout};
pub use rank::top_n;
pub use report::ReportBuilder;
