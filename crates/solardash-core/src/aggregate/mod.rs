//! Aggregation
//!
//! Bucketing, per-range downsampling and latest-value extraction over the
//! telemetry log.

pub mod bucket;
mod latest;
mod range;

pub use bucket::{bucket_start, Bucket, BucketSet};
pub use latest::{latest_in_text, latest_record};
pub use range::{aggregate_slice, RangeAggregator, RangeDiagnostics, RangeResult};
