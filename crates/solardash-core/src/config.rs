//! Generator configuration
//!
//! Static per run: the source log, the reporting ranges and their
//! destinations, the staleness threshold and the tail-read byte budgets.
//! Loaded from an optional JSON file where every field has a default, then
//! validated before any I/O happens.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One minute in milliseconds
pub const MINUTE_MS: i64 = 60 * 1000;
/// One hour in milliseconds
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
/// One day in milliseconds
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Upper bound on buckets per range, keeps memory proportional to output
pub const MAX_BUCKETS_PER_RANGE: i64 = 10_000;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No time ranges configured")]
    NoRanges,

    #[error("Invalid range '{key}': {message}")]
    InvalidRange { key: String, message: String },

    #[error("Duplicate range key '{0}'")]
    DuplicateRange(String),

    #[error("Ranges share destination {0}")]
    DuplicateDestination(PathBuf),

    #[error("Primary range '{0}' is not configured")]
    UnknownPrimary(String),

    #[error("Invalid byte budget: {0}")]
    InvalidBudget(String),
}

/// One reporting resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeConfig {
    /// Range identifier (e.g. "24h")
    pub key: String,
    /// Look-back horizon in milliseconds
    pub window_ms: i64,
    /// Bucket width in milliseconds
    pub bucket_ms: i64,
    /// Destination file; relative paths resolve against the output directory
    pub output: PathBuf,
}

impl TimeRangeConfig {
    /// Create a range config
    pub fn new(key: impl Into<String>, window_ms: i64, bucket_ms: i64, output: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            window_ms,
            bucket_ms,
            output: output.into(),
        }
    }

    /// Number of buckets the window spans (rounded up)
    pub fn bucket_span(&self) -> i64 {
        if self.bucket_ms <= 0 {
            return 0;
        }
        let whole = self.window_ms.div_euclid(self.bucket_ms);
        whole + i64::from(self.window_ms.rem_euclid(self.bucket_ms) != 0)
    }

    /// Check the range invariants
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidRange {
            key: self.key.clone(),
            message,
        };

        if self.key.trim().is_empty() {
            return Err(invalid("key must not be empty".to_string()));
        }
        if self.bucket_ms <= 0 {
            return Err(invalid(format!("bucket width must be positive, got {}", self.bucket_ms)));
        }
        if self.window_ms < self.bucket_ms {
            return Err(invalid(format!(
                "window {}ms is narrower than bucket {}ms",
                self.window_ms, self.bucket_ms
            )));
        }
        if self.bucket_span() > MAX_BUCKETS_PER_RANGE {
            return Err(invalid(format!(
                "{} buckets exceeds the limit of {}",
                self.bucket_span(),
                MAX_BUCKETS_PER_RANGE
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(invalid("output path must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Byte budget for tail reads, scaled linearly with the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailBudget {
    /// Bytes read for a window of `base_window_ms`
    pub base_bytes: u64,
    /// Window the base budget covers
    pub base_window_ms: i64,
}

impl Default for TailBudget {
    fn default() -> Self {
        Self {
            base_bytes: 2 * 1024 * 1024,
            base_window_ms: DAY_MS,
        }
    }
}

impl TailBudget {
    /// Budget for a window: `base_bytes * window / base_window`, at least 1
    pub fn bytes_for_window(&self, window_ms: i64) -> u64 {
        if self.base_window_ms <= 0 || window_ms <= 0 {
            return self.base_bytes.max(1);
        }
        let scaled = self.base_bytes as u128 * window_ms as u128 / self.base_window_ms as u128;
        scaled.clamp(1, u64::MAX as u128) as u64
    }
}

/// Complete generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Append-only telemetry log
    pub log_path: PathBuf,
    /// Directory relative range outputs resolve against
    pub output_dir: PathBuf,
    /// Reporting ranges
    pub ranges: Vec<TimeRangeConfig>,
    /// Key of the live range, whose display values come from the latest record
    pub primary_range: String,
    /// Data older than this is flagged stale
    pub stale_threshold_secs: u64,
    /// Tail budget for range aggregation
    pub tail_budget: TailBudget,
    /// Tail budget for the latest-value scan
    pub latest_tail_bytes: u64,
    /// Pretty-print snapshot JSON
    pub pretty: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("/var/lib/monitoring/power_metrics.jsonl"),
            output_dir: PathBuf::from("/var/www/html/api"),
            ranges: default_ranges(),
            primary_range: "24h".to_string(),
            stale_threshold_secs: 900,
            tail_budget: TailBudget::default(),
            latest_tail_bytes: 64 * 1024,
            pretty: false,
        }
    }
}

/// The four ranges the frontend offers
pub fn default_ranges() -> Vec<TimeRangeConfig> {
    vec![
        TimeRangeConfig::new("8h", 8 * HOUR_MS, 5 * MINUTE_MS, "stats-8h.json"),
        TimeRangeConfig::new("24h", DAY_MS, 5 * MINUTE_MS, "stats.json"),
        TimeRangeConfig::new("7d", 7 * DAY_MS, 15 * MINUTE_MS, "stats-7d.json"),
        TimeRangeConfig::new("30d", 30 * DAY_MS, HOUR_MS, "stats-30d.json"),
    ]
}

impl GeneratorConfig {
    /// Load a config file; missing fields take their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a JSON config document
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Resolved destination for a range
    pub fn output_path(&self, range: &TimeRangeConfig) -> PathBuf {
        if range.output.is_absolute() {
            range.output.clone()
        } else {
            self.output_dir.join(&range.output)
        }
    }

    /// Look up a range by key
    pub fn range(&self, key: &str) -> Option<&TimeRangeConfig> {
        self.ranges.iter().find(|r| r.key == key)
    }

    /// Whether `range` is the live range
    pub fn is_primary(&self, range: &TimeRangeConfig) -> bool {
        range.key == self.primary_range
    }

    /// Check every invariant; run before any I/O
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ranges.is_empty() {
            return Err(ConfigError::NoRanges);
        }

        let mut keys = HashSet::new();
        let mut destinations = HashSet::new();
        for range in &self.ranges {
            range.validate()?;
            if !keys.insert(range.key.as_str()) {
                return Err(ConfigError::DuplicateRange(range.key.clone()));
            }
            let dest = self.output_path(range);
            if !destinations.insert(dest.clone()) {
                return Err(ConfigError::DuplicateDestination(dest));
            }
        }

        if self.range(&self.primary_range).is_none() {
            return Err(ConfigError::UnknownPrimary(self.primary_range.clone()));
        }
        if self.tail_budget.base_bytes == 0 {
            return Err(ConfigError::InvalidBudget("tail base_bytes must be positive".to_string()));
        }
        if self.tail_budget.base_window_ms <= 0 {
            return Err(ConfigError::InvalidBudget(
                "tail base_window_ms must be positive".to_string(),
            ));
        }
        if self.latest_tail_bytes == 0 {
            return Err(ConfigError::InvalidBudget("latest_tail_bytes must be positive".to_string()));
        }
        Ok(())
    }
}
