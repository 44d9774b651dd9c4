//! Snapshot composition
//!
//! Merges the latest record, one range result and derived display fields
//! into the document the frontend polls. Missing upstream data degrades to
//! nulls and placeholders; composition itself never fails.

use std::collections::BTreeMap;

use chrono::{Local, TimeZone};
use serde::Serialize;

use super::format::FormattedValues;
use crate::aggregate::{RangeDiagnostics, RangeResult};
use crate::tail::TailError;
use crate::telemetry::{BatteryStatus, Metric, MetricValues, TelemetryRecord};

/// Data older than this many seconds is stale unless configured otherwise
pub const DEFAULT_STALE_THRESHOLD_SECS: u64 = 900;

const NO_DATA: &str = "No power data available";

/// The most recent record for this run, or why there is none
#[derive(Debug, Clone, Default)]
pub struct LatestSnapshot {
    pub record: Option<TelemetryRecord>,
    pub error: Option<String>,
}

impl LatestSnapshot {
    /// Wrap the outcome of the latest-value scan
    pub fn from_result(result: Result<Option<TelemetryRecord>, TailError>) -> Self {
        match result {
            Ok(record) => Self { record, error: None },
            Err(e) => Self {
                record: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl From<TelemetryRecord> for LatestSnapshot {
    fn from(record: TelemetryRecord) -> Self {
        Self {
            record: Some(record),
            error: None,
        }
    }
}

/// Where the top-level display values came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Instantaneous latest record (live range)
    Latest,
    /// Range averages (wider ranges)
    RangeAverage,
}

/// Sparkline block: timestamps plus one equal-length array per metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesBlock {
    pub timestamps: Vec<i64>,
    #[serde(flatten)]
    pub metrics: BTreeMap<Metric, Vec<Option<f64>>>,
}

/// One published snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotDocument {
    /// Range key
    pub range: String,
    /// Whether this is the live range
    pub primary: bool,
    /// Generation time, epoch ms
    pub generated_at_ms: i64,
    /// Generation time in the host's local zone
    pub local_time: String,
    /// Timestamp of the latest record
    pub latest_entry_ms: Option<i64>,
    /// Seconds between the latest record and generation
    pub data_age_seconds: Option<f64>,
    /// Latest record older than the threshold, or no record at all
    pub stale: bool,
    pub stale_threshold_secs: u64,
    pub status: Option<BatteryStatus>,
    pub uptime_secs: Option<f64>,
    pub value_source: ValueSource,
    /// Display values, one key per metric
    #[serde(flatten)]
    pub values: MetricValues,
    pub fmt: FormattedValues,
    pub series: SeriesBlock,
    pub averages: BTreeMap<Metric, f64>,
    pub diagnostics: RangeDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Builds snapshot documents
#[derive(Debug, Clone, Copy)]
pub struct SnapshotComposer {
    stale_threshold_secs: u64,
}

impl Default for SnapshotComposer {
    fn default() -> Self {
        Self::new(DEFAULT_STALE_THRESHOLD_SECS)
    }
}

impl SnapshotComposer {
    /// Create a composer with a staleness threshold
    pub fn new(stale_threshold_secs: u64) -> Self {
        Self {
            stale_threshold_secs,
        }
    }

    /// Compose one document.
    ///
    /// The live range shows the latest record; other ranges show their
    /// averages so a month view is not driven by one instantaneous sample.
    pub fn compose(
        &self,
        latest: &LatestSnapshot,
        range: RangeResult,
        primary: bool,
        now_ms: i64,
    ) -> SnapshotDocument {
        let record = latest.record.as_ref();
        let data_age_seconds = record
            .and_then(|r| now_ms.checked_sub(r.timestamp_ms))
            .map(|age_ms| age_ms as f64 / 1000.0);
        let stale = data_age_seconds.map_or(true, |age| age > self.stale_threshold_secs as f64);

        let (value_source, values) = if primary {
            (
                ValueSource::Latest,
                record.map(|r| r.metrics).unwrap_or_default(),
            )
        } else {
            (
                ValueSource::RangeAverage,
                range.averages.iter().map(|(m, v)| (*m, *v)).collect(),
            )
        };

        let status = record.and_then(|r| r.status);
        let uptime_secs = record.and_then(|r| r.uptime_secs);
        let fmt = FormattedValues::new(&values, status, uptime_secs, data_age_seconds);

        let error = match (&latest.error, record) {
            (Some(e), _) => Some(e.clone()),
            (None, None) => Some(NO_DATA.to_string()),
            (None, Some(_)) => None,
        };

        let RangeResult {
            key,
            timestamps,
            series,
            averages,
            diagnostics,
        } = range;

        SnapshotDocument {
            range: key,
            primary,
            generated_at_ms: now_ms,
            local_time: local_time(now_ms),
            latest_entry_ms: record.map(|r| r.timestamp_ms),
            data_age_seconds,
            stale,
            stale_threshold_secs: self.stale_threshold_secs,
            status,
            uptime_secs,
            value_source,
            values,
            fmt,
            series: SeriesBlock {
                timestamps,
                metrics: series,
            },
            averages,
            diagnostics,
            error,
        }
    }
}

fn local_time(now_ms: i64) -> String {
    Local
        .timestamp_millis_opt(now_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate_slice;
    use crate::config::TimeRangeConfig;
    use crate::snapshot::format::PLACEHOLDER;
    use crate::tail::TailSlice;
    use pretty_assertions::assert_eq;

    const NOW_MS: i64 = 10_000_000;

    fn range_result() -> RangeResult {
        let range = TimeRangeConfig::new("8h", 8 * 3_600_000, 300_000, "stats-8h.json");
        let text = [
            format!("{{\"ms\":{},\"load_W\":4.0,\"soc\":0.5}}", NOW_MS - 600_000),
            format!("{{\"ms\":{},\"load_W\":6.0,\"soc\":0.75}}", NOW_MS - 60_000),
        ]
        .join("\n");
        let slice = TailSlice {
            exists: true,
            text,
            ..TailSlice::default()
        };
        aggregate_slice(&slice, &range, NOW_MS)
    }

    fn latest(age_ms: i64) -> LatestSnapshot {
        let mut record = TelemetryRecord::new(
            NOW_MS - age_ms,
            MetricValues::new()
                .with(Metric::LoadPower, 6.5)
                .with(Metric::StateOfCharge, 71.0),
        );
        record.status = Some(BatteryStatus::Charging);
        record.into()
    }

    #[test]
    fn test_primary_uses_latest_record() {
        let doc = SnapshotComposer::default().compose(&latest(30_000), range_result(), true, NOW_MS);

        assert_eq!(doc.value_source, ValueSource::Latest);
        assert_eq!(doc.values.get(Metric::LoadPower), Some(6.5));
        assert_eq!(doc.fmt.soc, "71%");
        assert_eq!(doc.fmt.status, "Charging");
        assert_eq!(doc.data_age_seconds, Some(30.0));
        assert!(!doc.stale);
        assert_eq!(doc.error, None);
    }

    #[test]
    fn test_secondary_uses_range_averages() {
        let doc = SnapshotComposer::default().compose(&latest(30_000), range_result(), false, NOW_MS);

        assert_eq!(doc.value_source, ValueSource::RangeAverage);
        assert_eq!(doc.values.get(Metric::LoadPower), Some(5.0));
        assert_eq!(doc.fmt.soc, "63%");
        assert_eq!(doc.series.timestamps.len(), 2);
    }

    #[test]
    fn test_stale_threshold_is_exclusive() {
        let composer = SnapshotComposer::new(900);
        assert!(!composer.compose(&latest(900_000), range_result(), true, NOW_MS).stale);
        assert!(composer.compose(&latest(900_001), range_result(), true, NOW_MS).stale);
    }

    #[test]
    fn test_unrepresentable_age_is_stale() {
        let record = TelemetryRecord::new(i64::MIN, MetricValues::new().with(Metric::Voltage, 12.0));
        let doc = SnapshotComposer::default().compose(&record.into(), range_result(), true, NOW_MS);

        assert_eq!(doc.data_age_seconds, None);
        assert!(doc.stale);
        assert_eq!(doc.latest_entry_ms, Some(i64::MIN));
        assert_eq!(doc.fmt.data_age, PLACEHOLDER);
    }

    #[test]
    fn test_no_latest_record() {
        let doc = SnapshotComposer::default().compose(
            &LatestSnapshot::default(),
            range_result(),
            true,
            NOW_MS,
        );

        assert!(doc.stale);
        assert_eq!(doc.data_age_seconds, None);
        assert_eq!(doc.fmt.load, PLACEHOLDER);
        assert_eq!(doc.error.as_deref(), Some("No power data available"));
    }

    #[test]
    fn test_document_json_shape() {
        let doc = SnapshotComposer::default().compose(&latest(1_000), range_result(), true, NOW_MS);
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["range"], "8h");
        assert_eq!(json["load_w"], 6.5);
        assert!(json["voltage_v"].is_null());
        assert_eq!(json["fmt"]["load"], "6.50 W");
        assert_eq!(json["series"]["timestamps"].as_array().unwrap().len(), 2);
        assert_eq!(json["series"]["load_w"].as_array().unwrap().len(), 2);
        assert_eq!(json["averages"]["soc_pct"], 62.5);
        assert_eq!(json["diagnostics"]["bucket_count"], 2);
        assert!(json.get("error").is_none());
    }
}
