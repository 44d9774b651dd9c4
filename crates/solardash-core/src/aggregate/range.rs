//! Range aggregation
//!
//! Drives tail read → parse → bucket for one [`TimeRangeConfig`] and emits a
//! sorted, sparse series with per-range averages. I/O failures end up in the
//! diagnostics block instead of propagating, so one bad range never stops
//! the others.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use super::bucket::BucketSet;
use crate::config::{TailBudget, TimeRangeConfig};
use crate::tail::{read_tail, TailError, TailSlice};
use crate::telemetry::{parse_lines, Metric};

/// What one aggregation pass saw
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RangeDiagnostics {
    /// Whether the log existed
    pub file_exists: bool,
    /// Log size at read time
    pub file_size: u64,
    /// Bytes read from the tail
    pub bytes_read: u64,
    /// Non-blank lines in the slice
    pub total_lines: usize,
    /// Lines that parsed into records
    pub parsed_entries: usize,
    /// Records at or after the window start
    pub entries_in_window: usize,
    /// Buckets emitted
    pub bucket_count: usize,
    /// Oldest record timestamp in the slice
    pub oldest_entry_ms: Option<i64>,
    /// Newest record timestamp in the slice
    pub newest_entry_ms: Option<i64>,
    /// Window start (inclusive)
    pub window_start_ms: i64,
    /// Window end ("now")
    pub window_end_ms: i64,
    /// Bucket width
    pub bucket_ms: i64,
    /// Why the series is empty, or why the read failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate output for one range
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeResult {
    /// Range key
    pub key: String,
    /// Ascending bucket start times
    pub timestamps: Vec<i64>,
    /// Per-metric bucket means, parallel to `timestamps`; `None` where a
    /// bucket lacked the metric
    pub series: BTreeMap<Metric, Vec<Option<f64>>>,
    /// Mean of the per-bucket means over the buckets that carry each metric
    pub averages: BTreeMap<Metric, f64>,
    /// Pass diagnostics
    pub diagnostics: RangeDiagnostics,
}

impl RangeResult {
    /// Empty result carrying an error
    pub fn failed(range: &TimeRangeConfig, now_ms: i64, error: impl Into<String>) -> Self {
        Self {
            key: range.key.clone(),
            timestamps: Vec::new(),
            series: BTreeMap::new(),
            averages: BTreeMap::new(),
            diagnostics: RangeDiagnostics {
                window_start_ms: now_ms.saturating_sub(range.window_ms),
                window_end_ms: now_ms,
                bucket_ms: range.bucket_ms,
                error: Some(error.into()),
                ..RangeDiagnostics::default()
            },
        }
    }

    /// Check if no bucket was produced
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Series for a metric
    pub fn series(&self, metric: Metric) -> Option<&[Option<f64>]> {
        self.series.get(&metric).map(Vec::as_slice)
    }

    /// Range average for a metric
    pub fn average(&self, metric: Metric) -> Option<f64> {
        self.averages.get(&metric).copied()
    }
}

/// Aggregate an already-read slice. Pure in (slice, range, now).
pub fn aggregate_slice(slice: &TailSlice, range: &TimeRangeConfig, now_ms: i64) -> RangeResult {
    let cutoff_ms = now_ms.saturating_sub(range.window_ms);
    let parsed = parse_lines(&slice.text);

    let mut buckets = BucketSet::new(range.bucket_ms, cutoff_ms);
    buckets.extend(&parsed.records);

    let timestamps: Vec<i64> = buckets.buckets().keys().copied().collect();

    let mut series = BTreeMap::new();
    let mut averages = BTreeMap::new();
    for metric in Metric::ALL {
        let means: Vec<Option<f64>> = buckets
            .buckets()
            .values()
            .map(|b| b.average(metric))
            .collect();

        let present: Vec<f64> = means.iter().flatten().copied().collect();
        if present.is_empty() {
            continue;
        }
        averages.insert(metric, present.iter().sum::<f64>() / present.len() as f64);

        let shown = if metric.display_abs() {
            means.into_iter().map(|m| m.map(f64::abs)).collect()
        } else {
            means
        };
        series.insert(metric, shown);
    }

    let error = if !slice.exists {
        Some("log file not found".to_string())
    } else if buckets.is_empty() {
        Some("no entries within window".to_string())
    } else {
        None
    };

    RangeResult {
        key: range.key.clone(),
        timestamps,
        series,
        averages,
        diagnostics: RangeDiagnostics {
            file_exists: slice.exists,
            file_size: slice.file_size,
            bytes_read: slice.bytes_read,
            total_lines: parsed.total_lines,
            parsed_entries: parsed.parsed(),
            entries_in_window: buckets.in_window(),
            bucket_count: buckets.len(),
            oldest_entry_ms: buckets.oldest_ms(),
            newest_entry_ms: buckets.newest_ms(),
            window_start_ms: cutoff_ms,
            window_end_ms: now_ms,
            bucket_ms: range.bucket_ms,
            error,
        },
    }
}

/// Runs range aggregations against one log
#[derive(Debug, Clone)]
pub struct RangeAggregator {
    log_path: PathBuf,
    budget: TailBudget,
}

impl RangeAggregator {
    /// Create an aggregator for a log
    pub fn new(log_path: impl Into<PathBuf>, budget: TailBudget) -> Self {
        Self {
            log_path: log_path.into(),
            budget,
        }
    }

    /// Aggregate one range as of `now_ms`. Never fails; read errors are
    /// reported through `diagnostics.error`.
    pub async fn aggregate(&self, range: &TimeRangeConfig, now_ms: i64) -> RangeResult {
        let budget = self.budget.bytes_for_window(range.window_ms);

        let slice = match read_tail(&self.log_path, budget).await {
            Ok(slice) => slice,
            Err(e) => {
                tracing::warn!(
                    range = %range.key,
                    path = %self.log_path.display(),
                    error = %e,
                    "range read failed"
                );
                let mut failed = RangeResult::failed(range, now_ms, e.to_string());
                // Not-found never reaches here; an I/O error means the log is there.
                if let TailError::Io { .. } = e {
                    failed.diagnostics.file_exists = true;
                    if let Ok(meta) = tokio::fs::metadata(&self.log_path).await {
                        failed.diagnostics.file_size = meta.len();
                    }
                }
                return failed;
            }
        };

        let result = aggregate_slice(&slice, range, now_ms);
        tracing::debug!(
            range = %range.key,
            budget,
            bytes_read = result.diagnostics.bytes_read,
            total_lines = result.diagnostics.total_lines,
            parsed = result.diagnostics.parsed_entries,
            in_window = result.diagnostics.entries_in_window,
            buckets = result.diagnostics.bucket_count,
            "range aggregated"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn slice(lines: &[String]) -> TailSlice {
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        TailSlice {
            exists: true,
            file_size: text.len() as u64,
            bytes_read: text.len() as u64,
            text,
            ..TailSlice::default()
        }
    }

    fn line(ts_secs: i64, fields: &str) -> String {
        format!("{{\"ms\":{},{}}}", ts_secs * 1000, fields)
    }

    #[test]
    fn test_sparse_metric_yields_null_not_zero() {
        let range = TimeRangeConfig::new("t", 300_000, 60_000, "t.json");
        let input = slice(&[
            line(0, r#""v":13.0,"cpu_temp_c":40"#),
            line(60, r#""v":12.0"#),
        ]);
        let result = aggregate_slice(&input, &range, 300_000);

        assert_eq!(result.timestamps, vec![0, 60_000]);
        assert_eq!(result.series(Metric::Voltage).unwrap(), &[Some(13.0), Some(12.0)]);
        assert_eq!(result.series(Metric::CpuTemp).unwrap(), &[Some(40.0), None]);
        assert_eq!(result.average(Metric::CpuTemp), Some(40.0));
        assert!(result.series(Metric::Power).is_none());
    }

    #[test]
    fn test_abs_applies_to_series_not_average() {
        let range = TimeRangeConfig::new("t", 300_000, 60_000, "t.json");
        let input = slice(&[line(0, r#""i":-400"#), line(60, r#""i":200"#)]);
        let result = aggregate_slice(&input, &range, 300_000);

        assert_eq!(result.series(Metric::Current).unwrap(), &[Some(400.0), Some(200.0)]);
        assert_eq!(result.average(Metric::Current), Some(-100.0));
    }

    #[test]
    fn test_missing_log_reports_error() {
        let range = TimeRangeConfig::new("t", 300_000, 60_000, "t.json");
        let result = aggregate_slice(&TailSlice::missing(), &range, 300_000);

        assert!(result.is_empty());
        assert!(result.averages.is_empty());
        assert!(!result.diagnostics.file_exists);
        assert_eq!(result.diagnostics.error.as_deref(), Some("log file not found"));
        assert_eq!(result.diagnostics.window_start_ms, 0);
    }

    #[test]
    fn test_all_records_expired() {
        let range = TimeRangeConfig::new("t", 60_000, 60_000, "t.json");
        let input = slice(&[line(0, r#""v":13.0"#)]);
        let result = aggregate_slice(&input, &range, 600_000);

        assert!(result.is_empty());
        assert_eq!(result.diagnostics.parsed_entries, 1);
        assert_eq!(result.diagnostics.entries_in_window, 0);
        assert_eq!(result.diagnostics.oldest_entry_ms, Some(0));
        assert_eq!(result.diagnostics.error.as_deref(), Some("no entries within window"));
    }

    #[tokio::test]
    async fn test_unreadable_log_is_reported_as_present() {
        let dir = tempfile::TempDir::new().unwrap();
        // Opening a directory succeeds; reading it fails.
        std::fs::write(dir.path().join("filler"), vec![b'x'; 4096]).unwrap();
        let range = TimeRangeConfig::new("t", 300_000, 60_000, "t.json");

        let result = RangeAggregator::new(dir.path(), TailBudget::default())
            .aggregate(&range, 300_000)
            .await;

        assert!(result.is_empty());
        assert!(result.diagnostics.file_exists);
        assert!(result.diagnostics.error.is_some());
    }

    #[test]
    fn test_failed_result_shape() {
        let range = TimeRangeConfig::new("7d", 7 * 86_400_000, 900_000, "x.json");
        let result = RangeResult::failed(&range, 1_000_000_000, "permission denied");
        assert_eq!(result.key, "7d");
        assert!(result.series.is_empty());
        assert_eq!(result.diagnostics.bucket_ms, 900_000);
        assert_eq!(result.diagnostics.error.as_deref(), Some("permission denied"));
    }
}
