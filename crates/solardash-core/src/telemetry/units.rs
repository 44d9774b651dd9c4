//! Unit Conversion Functions
//!
//! Scale factors applied to raw log fields at parse time:
//! - Milli-units → base units (mW → W)
//! - Fractions → percentages (0.71 → 71 %)

use super::Metric;

/// Convert a milli-unit reading to its base unit (mW → W, mA → A)
pub fn milli_to_base(milli: f64) -> f64 {
    milli / 1000.0
}

/// Convert a 0–1 fraction to a percentage
pub fn fraction_to_percent(fraction: f64) -> f64 {
    fraction * 100.0
}

/// How a raw field maps onto its canonical unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Already in the canonical unit
    Identity,
    /// Milli-units to base units
    MilliToBase,
    /// Fraction to percentage
    FractionToPercent,
}

impl Scale {
    /// Apply this scale to a raw value
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            Scale::Identity => raw,
            Scale::MilliToBase => milli_to_base(raw),
            Scale::FractionToPercent => fraction_to_percent(raw),
        }
    }
}

/// One raw log field feeding a metric
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Field name in the log line
    pub field: &'static str,
    /// Metric it feeds
    pub metric: Metric,
    /// Scale to the metric's canonical unit
    pub scale: Scale,
}

const fn spec(field: &'static str, metric: Metric, scale: Scale) -> FieldSpec {
    FieldSpec {
        field,
        metric,
        scale,
    }
}

/// Recognized log fields. For each metric the first present field wins,
/// so shunt-monitor fields take precedence over the legacy short names.
pub const FIELDS: &[FieldSpec] = &[
    spec("esp32_v_V", Metric::Voltage, Scale::Identity),
    spec("v", Metric::Voltage, Scale::Identity),
    spec("esp32_i_mA", Metric::Current, Scale::Identity),
    spec("i", Metric::Current, Scale::Identity),
    spec("esp32_p_mW", Metric::Power, Scale::MilliToBase),
    spec("p", Metric::Power, Scale::MilliToBase),
    spec("soc", Metric::StateOfCharge, Scale::FractionToPercent),
    spec("esp32_soc", Metric::StateOfCharge, Scale::FractionToPercent),
    spec("load_W", Metric::LoadPower, Scale::Identity),
    spec("p_in_W", Metric::InputPower, Scale::Identity),
    spec("cpu_temp_c", Metric::CpuTemp, Scale::Identity),
    spec("cpu_load_15min", Metric::CpuLoad, Scale::Identity),
    spec("axp_capacity", Metric::BackupBattery, Scale::Identity),
    spec("axp_batt_capacity", Metric::BackupBattery, Scale::Identity),
];
