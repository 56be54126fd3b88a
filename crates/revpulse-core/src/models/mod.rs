//! Data models for RevPulse

mod aggregate;
mod filter;
mod record;
mod report;

pub use aggregate::*;
pub use filter::*;
pub use record::*;
pub use report::*;
