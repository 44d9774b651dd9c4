//! Fixed-width time buckets
//!
//! Records are folded into buckets keyed by `floor(ts / width) * width`.
//! Each metric keeps its own count so a sample that omits a metric does not
//! dilute that metric's mean.

use std::collections::BTreeMap;

use crate::telemetry::{Metric, TelemetryRecord};

/// Start of the bucket containing `timestamp_ms`
pub fn bucket_start(timestamp_ms: i64, bucket_ms: i64) -> i64 {
    timestamp_ms.div_euclid(bucket_ms) * bucket_ms
}

/// Accumulator for one interval. Only materialized once a record lands in it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    sums: [f64; Metric::COUNT],
    counts: [u32; Metric::COUNT],
}

impl Bucket {
    /// Fold a record into this bucket
    pub fn add(&mut self, record: &TelemetryRecord) {
        for (metric, value) in record.metrics.iter() {
            self.sums[metric.index()] += value;
            self.counts[metric.index()] += 1;
        }
    }

    /// Mean of `metric`, if any record in the bucket carried it
    pub fn average(&self, metric: Metric) -> Option<f64> {
        match self.counts[metric.index()] {
            0 => None,
            n => Some(self.sums[metric.index()] / n as f64),
        }
    }
}

/// Buckets for one pass over a slice, plus what the pass observed
#[derive(Debug, Clone)]
pub struct BucketSet {
    bucket_ms: i64,
    cutoff_ms: i64,
    buckets: BTreeMap<i64, Bucket>,
    in_window: usize,
    oldest_ms: Option<i64>,
    newest_ms: Option<i64>,
}

impl BucketSet {
    /// Create an empty set. `bucket_ms` must be positive.
    pub fn new(bucket_ms: i64, cutoff_ms: i64) -> Self {
        debug_assert!(bucket_ms > 0, "bucket width must be positive");
        Self {
            bucket_ms,
            cutoff_ms,
            buckets: BTreeMap::new(),
            in_window: 0,
            oldest_ms: None,
            newest_ms: None,
        }
    }

    /// Fold one record. Records older than the cutoff only move the
    /// oldest/newest markers.
    pub fn push(&mut self, record: &TelemetryRecord) {
        let ts = record.timestamp_ms;
        self.oldest_ms = Some(self.oldest_ms.map_or(ts, |o| o.min(ts)));
        self.newest_ms = Some(self.newest_ms.map_or(ts, |n| n.max(ts)));

        if ts < self.cutoff_ms {
            return;
        }

        self.in_window += 1;
        self.buckets
            .entry(bucket_start(ts, self.bucket_ms))
            .or_default()
            .add(record);
    }

    /// Buckets in ascending start order
    pub fn buckets(&self) -> &BTreeMap<i64, Bucket> {
        &self.buckets
    }

    /// Number of non-empty buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Check if no record fell inside the window
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Records that fell inside the window
    pub fn in_window(&self) -> usize {
        self.in_window
    }

    /// Oldest timestamp seen, in or out of the window
    pub fn oldest_ms(&self) -> Option<i64> {
        self.oldest_ms
    }

    /// Newest timestamp seen
    pub fn newest_ms(&self) -> Option<i64> {
        self.newest_ms
    }
}

impl<'a> Extend<&'a TelemetryRecord> for BucketSet {
    fn extend<I: IntoIterator<Item = &'a TelemetryRecord>>(&mut self, iter: I) {
        for record in iter {
            self.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MetricValues;

    fn power(ts_secs: i64, watts: f64) -> TelemetryRecord {
        TelemetryRecord::new(ts_secs * 1000, MetricValues::new().with(Metric::LoadPower, watts))
    }

    #[test]
    fn test_bucket_start_floors() {
        assert_eq!(bucket_start(0, 60_000), 0);
        assert_eq!(bucket_start(59_999, 60_000), 0);
        assert_eq!(bucket_start(60_000, 60_000), 60_000);
        assert_eq!(bucket_start(-1, 60_000), -60_000);
    }

    #[test]
    fn test_order_does_not_change_buckets() {
        let records = vec![power(0, 10.0), power(61, 12.0), power(30, 8.0), power(125, 9.0)];
        let mut forward = BucketSet::new(60_000, 0);
        forward.extend(&records);
        let mut reverse = BucketSet::new(60_000, 0);
        reverse.extend(records.iter().rev());

        assert_eq!(forward.buckets(), reverse.buckets());
        assert_eq!(forward.len(), 3);
        assert_eq!(forward.buckets()[&0].average(Metric::LoadPower), Some(9.0));
    }

    #[test]
    fn test_cutoff_excludes_but_tracks_oldest() {
        let mut set = BucketSet::new(60_000, 100_000);
        set.extend(&[power(50, 1.0), power(100, 2.0), power(160, 3.0)]);

        assert_eq!(set.in_window(), 2);
        assert_eq!(set.oldest_ms(), Some(50_000));
        assert_eq!(set.newest_ms(), Some(160_000));
        assert_eq!(set.buckets().keys().copied().collect::<Vec<_>>(), vec![60_000, 120_000]);
    }

    #[test]
    fn test_per_metric_counts() {
        let mut bucket = Bucket::default();
        bucket.add(&TelemetryRecord::new(
            0,
            MetricValues::new().with(Metric::Voltage, 13.0).with(Metric::CpuTemp, 40.0),
        ));
        bucket.add(&TelemetryRecord::new(1, MetricValues::new().with(Metric::Voltage, 12.0)));

        assert_eq!(bucket.average(Metric::Voltage), Some(12.5));
        assert_eq!(bucket.average(Metric::CpuTemp), Some(40.0));
        assert_eq!(bucket.average(Metric::Power), None);
    }
}
