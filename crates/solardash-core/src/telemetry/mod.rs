//! Telemetry Records
//!
//! Typed view of one line of the append-only power log. Metrics form a
//! closed set so every summing, averaging and formatting site is checked
//! against the same list.

mod parser;
pub mod demo;
pub mod units;

pub use parser::{parse_line, parse_lines, ParsedSlice};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// A recognized telemetry metric, already normalized to its canonical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Metric {
    /// Battery voltage in volts
    #[serde(rename = "voltage_v")]
    Voltage,
    /// Battery current in milliamps (positive while charging)
    #[serde(rename = "current_ma")]
    Current,
    /// Battery power in watts (positive while charging)
    #[serde(rename = "power_w")]
    Power,
    /// State of charge in percent
    #[serde(rename = "soc_pct")]
    StateOfCharge,
    /// System load power in watts
    #[serde(rename = "load_w")]
    LoadPower,
    /// Solar input power in watts
    #[serde(rename = "input_w")]
    InputPower,
    /// CPU temperature in °C
    #[serde(rename = "cpu_temp_c")]
    CpuTemp,
    /// 15 minute CPU load average
    #[serde(rename = "cpu_load")]
    CpuLoad,
    /// Backup (PMIC) battery capacity in percent
    #[serde(rename = "backup_battery_pct")]
    BackupBattery,
}

impl Metric {
    /// Number of metrics
    pub const COUNT: usize = 9;

    /// All metrics in output order
    pub const ALL: [Metric; Metric::COUNT] = [
        Metric::Voltage,
        Metric::Current,
        Metric::Power,
        Metric::StateOfCharge,
        Metric::LoadPower,
        Metric::InputPower,
        Metric::CpuTemp,
        Metric::CpuLoad,
        Metric::BackupBattery,
    ];

    /// Stable key used in snapshot documents
    pub fn key(self) -> &'static str {
        match self {
            Metric::Voltage => "voltage_v",
            Metric::Current => "current_ma",
            Metric::Power => "power_w",
            Metric::StateOfCharge => "soc_pct",
            Metric::LoadPower => "load_w",
            Metric::InputPower => "input_w",
            Metric::CpuTemp => "cpu_temp_c",
            Metric::CpuLoad => "cpu_load",
            Metric::BackupBattery => "backup_battery_pct",
        }
    }

    /// Whether the series should be shown as a magnitude.
    ///
    /// Current and load power flip sign with charge direction; the
    /// sparkline only cares about how much.
    pub fn display_abs(self) -> bool {
        matches!(self, Metric::Current | Metric::LoadPower)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Sparse metric readings. Absent metrics are `None`, never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricValues([Option<f64>; Metric::COUNT]);

impl MetricValues {
    /// Create an empty set of readings
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a reading
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0[metric.index()]
    }

    /// Set a reading; non-finite values are dropped
    pub fn set(&mut self, metric: Metric, value: f64) {
        self.0[metric.index()] = value.is_finite().then_some(value);
    }

    /// Builder-style [`MetricValues::set`]
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, value);
        self
    }

    /// Iterate the present readings in metric order
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        Metric::ALL
            .into_iter()
            .filter_map(|m| self.get(m).map(|v| (m, v)))
    }

    /// Check if no metric is present
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

impl FromIterator<(Metric, f64)> for MetricValues {
    fn from_iter<I: IntoIterator<Item = (Metric, f64)>>(iter: I) -> Self {
        let mut values = MetricValues::new();
        for (metric, value) in iter {
            values.set(metric, value);
        }
        values
    }
}

// Every metric key is emitted, absent ones as null, so consumers see a
// stable shape.
impl Serialize for MetricValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Metric::COUNT))?;
        for metric in Metric::ALL {
            map.serialize_entry(metric.key(), &self.get(metric))?;
        }
        map.end()
    }
}

/// Battery charge state reported by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryStatus {
    /// Net current into the battery
    Charging,
    /// Net current out of the battery
    Discharging,
    /// Floating or idle
    Full,
    /// Unrecognized label
    Unknown,
}

/// Current magnitude (mA) below which the battery is considered idle
const IDLE_CURRENT_MA: f64 = 10.0;

impl BatteryStatus {
    /// Parse a collector status label (case-insensitive)
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "charging" => BatteryStatus::Charging,
            "discharging" => BatteryStatus::Discharging,
            "full" | "float" => BatteryStatus::Full,
            _ => BatteryStatus::Unknown,
        }
    }

    /// Derive a status from battery current when the collector sent none
    pub fn from_current(current_ma: f64) -> Self {
        if current_ma > IDLE_CURRENT_MA {
            BatteryStatus::Charging
        } else if current_ma < -IDLE_CURRENT_MA {
            BatteryStatus::Discharging
        } else {
            BatteryStatus::Full
        }
    }

    /// Display label
    pub fn label(self) -> &'static str {
        match self {
            BatteryStatus::Charging => "Charging",
            BatteryStatus::Discharging => "Discharging",
            BatteryStatus::Full => "Full",
            BatteryStatus::Unknown => "Unknown",
        }
    }
}

/// One observation line from the log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    /// Epoch milliseconds
    pub timestamp_ms: i64,
    /// Normalized metric readings
    pub metrics: MetricValues,
    /// Battery status, reported or derived
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BatteryStatus>,
    /// Host uptime in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<f64>,
}

impl TelemetryRecord {
    /// Create a record with no status or uptime
    pub fn new(timestamp_ms: i64, metrics: MetricValues) -> Self {
        Self {
            timestamp_ms,
            metrics,
            status: None,
            uptime_secs: None,
        }
    }
}
