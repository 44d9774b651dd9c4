//! Display formatting
//!
//! Pure functions from numeric fields to the strings the frontend shows.
//! Absent values render as [`PLACEHOLDER`].

use serde::Serialize;

use crate::telemetry::{BatteryStatus, Metric, MetricValues};

/// Text shown for an absent value
pub const PLACEHOLDER: &str = "—";

/// Fixed-decimal number with a unit suffix
pub fn fixed(value: Option<f64>, decimals: usize, unit: &str) -> String {
    match value.filter(|v| v.is_finite()) {
        Some(v) => format!("{:.*}{}", decimals, v, unit),
        None => PLACEHOLDER.to_string(),
    }
}

/// Whole-number percentage
pub fn percent(value: Option<f64>) -> String {
    match value.filter(|v| v.is_finite()) {
        Some(v) => format!("{}%", v.round() as i64),
        None => PLACEHOLDER.to_string(),
    }
}

/// Signed current: amps above 1 A, whole milliamps below
pub fn current(milliamps: Option<f64>) -> String {
    let Some(ma) = milliamps.filter(|v| v.is_finite()) else {
        return PLACEHOLDER.to_string();
    };
    let sign = if ma < 0.0 { "-" } else { "" };
    let abs = ma.abs();
    if abs >= 1000.0 {
        format!("{}{:.2} A", sign, abs / 1000.0)
    } else {
        format!("{}{:.0} mA", sign, abs)
    }
}

/// Host uptime as `"{d}d {h}h {m}m"`, dropping leading zero units
pub fn uptime(seconds: Option<f64>) -> String {
    let Some(secs) = seconds.filter(|s| s.is_finite() && *s >= 0.0) else {
        return PLACEHOLDER.to_string();
    };
    let secs = secs as u64;
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Age of the data, coarsest two units
pub fn age(seconds: Option<f64>) -> String {
    let Some(secs) = seconds.filter(|s| s.is_finite()) else {
        return PLACEHOLDER.to_string();
    };
    let secs = secs.max(0.0) as u64;
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3_599 => format!("{}m {}s", secs / 60, secs % 60),
        3_600..=86_399 => format!("{}h {}m", secs / 3_600, (secs % 3_600) / 60),
        _ => format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3_600),
    }
}

/// Format one metric in its display unit
pub fn metric(metric: Metric, value: Option<f64>) -> String {
    match metric {
        Metric::Voltage => fixed(value, 2, " V"),
        Metric::Current => current(value),
        Metric::Power | Metric::LoadPower | Metric::InputPower => fixed(value, 2, " W"),
        Metric::StateOfCharge | Metric::BackupBattery => percent(value),
        Metric::CpuTemp => fixed(value, 1, "°C"),
        Metric::CpuLoad => fixed(value, 2, ""),
    }
}

/// Pre-formatted strings for one snapshot document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormattedValues {
    pub voltage: String,
    pub current: String,
    pub power: String,
    pub load: String,
    pub input: String,
    pub soc: String,
    pub cpu_temp: String,
    pub cpu_load: String,
    pub backup_battery: String,
    pub status: String,
    pub uptime: String,
    pub data_age: String,
}

impl FormattedValues {
    /// Format every display field
    pub fn new(
        values: &MetricValues,
        status: Option<BatteryStatus>,
        uptime_secs: Option<f64>,
        data_age_secs: Option<f64>,
    ) -> Self {
        let m = |which: Metric| metric(which, values.get(which));
        Self {
            voltage: m(Metric::Voltage),
            current: m(Metric::Current),
            power: m(Metric::Power),
            load: m(Metric::LoadPower),
            input: m(Metric::InputPower),
            soc: m(Metric::StateOfCharge),
            cpu_temp: m(Metric::CpuTemp),
            cpu_load: m(Metric::CpuLoad),
            backup_battery: m(Metric::BackupBattery),
            status: status
                .map(|s| s.label().to_string())
                .unwrap_or_else(|| PLACEHOLDER.to_string()),
            uptime: uptime(uptime_secs),
            data_age: age(data_age_secs),
        }
    }
}
