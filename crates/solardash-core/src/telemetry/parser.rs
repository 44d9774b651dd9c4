//! Log line parser
//!
//! Turns one JSON line into a [`TelemetryRecord`]. Malformed lines are
//! rejected with `None` and never abort a batch.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

use super::units::FIELDS;
use super::{BatteryStatus, Metric, MetricValues, TelemetryRecord};

/// Zone-less ISO-8601 layouts, read as UTC
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse one log line.
///
/// Returns `None` for blank lines, invalid JSON, non-object values and
/// records without a usable timestamp.
pub fn parse_line(line: &str) -> Option<TelemetryRecord> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_str(line).ok()?;
    let object = value.as_object()?;
    let timestamp_ms = record_timestamp(object)?;

    let mut metrics = MetricValues::new();
    for spec in FIELDS {
        if metrics.get(spec.metric).is_some() {
            continue;
        }
        if let Some(raw) = object.get(spec.field).and_then(number) {
            metrics.set(spec.metric, spec.scale.apply(raw));
        }
    }

    let status = object
        .get("status")
        .and_then(Value::as_str)
        .map(BatteryStatus::from_label)
        .filter(|s| *s != BatteryStatus::Unknown)
        .or_else(|| metrics.get(Metric::Current).map(BatteryStatus::from_current));

    Some(TelemetryRecord {
        timestamp_ms,
        metrics,
        status,
        uptime_secs: object.get("uptime").and_then(number),
    })
}

/// Result of parsing a slice of log text
#[derive(Debug, Clone, Default)]
pub struct ParsedSlice {
    /// Records in file order
    pub records: Vec<TelemetryRecord>,
    /// Non-blank lines seen
    pub total_lines: usize,
}

impl ParsedSlice {
    /// Number of lines that produced a record
    pub fn parsed(&self) -> usize {
        self.records.len()
    }

    /// Number of lines that were skipped as malformed
    pub fn malformed(&self) -> usize {
        self.total_lines - self.records.len()
    }
}

/// Parse every line of a text slice, skipping malformed lines
pub fn parse_lines(text: &str) -> ParsedSlice {
    let mut slice = ParsedSlice::default();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        slice.total_lines += 1;
        if let Some(record) = parse_line(line) {
            slice.records.push(record);
        }
    }
    slice
}

/// `ms` wins unless the device clock was unsynchronised, in which case
/// `ms` counts device uptime and only `ts` is meaningful.
fn record_timestamp(object: &Map<String, Value>) -> Option<i64> {
    let unsynced = object
        .get("unsynced")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if !unsynced {
        if let Some(ms) = object.get("ms").and_then(epoch_ms) {
            return Some(ms);
        }
    }

    object
        .get("ts")
        .and_then(Value::as_str)
        .and_then(parse_iso8601)
}

/// Epoch milliseconds, limited to instants a calendar date can express
fn epoch_ms(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
        .filter(|ms| DateTime::<Utc>::from_timestamp_millis(*ms).is_some())
}

/// Parse an ISO-8601 timestamp to epoch milliseconds
pub(crate) fn parse_iso8601(ts: &str) -> Option<i64> {
    let ts = ts.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(ts, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Finite number, or a string holding one. `null` and other types are absent.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collector_line() {
        let line = r#"{"ts":"2025-08-26T05:33:09.000Z","ms":1756186389000,"esp32_v_V":13.29,"esp32_i_mA":-45.8,"esp32_p_mW":-609.5,"esp32_soc":0.7076,"soc":0.7076,"status":"Discharging","p_in_W":0,"load_W":0.6095,"uptime":3600,"cpu_temp_c":48.3,"cpu_load_15min":0.42}"#;
        let record = parse_line(line).expect("valid line");

        assert_eq!(record.timestamp_ms, 1_756_186_389_000);
        assert_eq!(record.metrics.get(Metric::Voltage), Some(13.29));
        assert_eq!(record.metrics.get(Metric::Current), Some(-45.8));
        assert!((record.metrics.get(Metric::Power).unwrap() + 0.6095).abs() < 1e-9);
        assert!((record.metrics.get(Metric::StateOfCharge).unwrap() - 70.76).abs() < 1e-9);
        assert_eq!(record.metrics.get(Metric::InputPower), Some(0.0));
        assert_eq!(record.metrics.get(Metric::BackupBattery), None);
        assert_eq!(record.status, Some(BatteryStatus::Discharging));
        assert_eq!(record.uptime_secs, Some(3600.0));
    }

    #[test]
    fn test_timestamp_falls_back_to_iso() {
        let record = parse_line(r#"{"ts":"1970-01-01T00:01:00Z","v":12.5}"#).unwrap();
        assert_eq!(record.timestamp_ms, 60_000);

        let naive = parse_line(r#"{"ts":"1970-01-01T00:00:02.5","v":12.5}"#).unwrap();
        assert_eq!(naive.timestamp_ms, 2_500);

        let offset = parse_line(r#"{"ts":"1970-01-01T01:00:00+01:00"}"#).unwrap();
        assert_eq!(offset.timestamp_ms, 0);
    }

    #[test]
    fn test_unsynced_device_clock_uses_iso() {
        let line = r#"{"ms":264403221,"ts":"1970-01-01T00:00:10Z","unsynced":true,"v":13.0}"#;
        assert_eq!(parse_line(line).unwrap().timestamp_ms, 10_000);
    }

    #[test]
    fn test_zero_ms_is_a_valid_timestamp() {
        let record = parse_line(r#"{"ms":0,"load_W":10}"#).unwrap();
        assert_eq!(record.timestamp_ms, 0);
    }

    #[test]
    fn test_rejects_out_of_range_epoch() {
        assert!(parse_line(r#"{"ms":-9223372036854775808,"v":12.0}"#).is_none());
        assert!(parse_line(r#"{"ms":9223372036854775807,"v":12.0}"#).is_none());
        assert!(parse_line(r#"{"ms":9.0e18,"v":12.0}"#).is_none());

        let rescued = parse_line(r#"{"ms":-9223372036854775808,"ts":"1970-01-01T00:00:05Z"}"#).unwrap();
        assert_eq!(rescued.timestamp_ms, 5_000);
    }

    #[test]
    fn test_rejects_malformed_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("not json").is_none());
        assert!(parse_line("[1,2,3]").is_none());
        assert!(parse_line(r#"{"v":13.0}"#).is_none());
        assert!(parse_line(r#"{"ts":"yesterday","v":13.0}"#).is_none());
        assert!(parse_line(r#"{"ms":1000,"v":13."#).is_none());
    }

    #[test]
    fn test_absent_and_null_fields_are_not_zero() {
        let record = parse_line(r#"{"ms":1000,"v":null,"cpu_temp_c":"47.5","i":"n/a"}"#).unwrap();
        assert_eq!(record.metrics.get(Metric::Voltage), None);
        assert_eq!(record.metrics.get(Metric::CpuTemp), Some(47.5));
        assert_eq!(record.metrics.get(Metric::Current), None);
        assert_eq!(record.status, None);
    }

    #[test]
    fn test_legacy_fields_and_precedence() {
        let record = parse_line(r#"{"ms":1,"v":12.0,"esp32_v_V":13.0,"p":2500,"axp_batt_capacity":88}"#)
            .unwrap();
        assert_eq!(record.metrics.get(Metric::Voltage), Some(13.0));
        assert_eq!(record.metrics.get(Metric::Power), Some(2.5));
        assert_eq!(record.metrics.get(Metric::BackupBattery), Some(88.0));
    }

    #[test]
    fn test_status_derived_when_missing_or_unknown() {
        let charging = parse_line(r#"{"ms":1,"i":120}"#).unwrap();
        assert_eq!(charging.status, Some(BatteryStatus::Charging));

        let unknown = parse_line(r#"{"ms":1,"i":-300,"status":"unknown"}"#).unwrap();
        assert_eq!(unknown.status, Some(BatteryStatus::Discharging));
    }

    #[test]
    fn test_parse_lines_counts() {
        let text = "{\"ms\":1,\"v\":1}\ngarbage\n\n{\"ms\":2,\"v\":2}\n{\"v\":3}\n";
        let slice = parse_lines(text);
        assert_eq!(slice.total_lines, 4);
        assert_eq!(slice.parsed(), 2);
        assert_eq!(slice.malformed(), 2);
    }
}
