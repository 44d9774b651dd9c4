//! # SolarDash Core Library
//!
//! Core functionality for the SolarDash home power dashboard.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Bounded tail reads of the append-only telemetry log
//! - Tolerant parsing of collector records into typed metrics
//! - Time bucketing and per-range downsampling
//! - Latest-value extraction and staleness detection
//! - Snapshot composition and atomic publication for the web frontend
//!
//! ## Example
//!
//! ```rust,ignore
//! use solardash_core::{config::GeneratorConfig, generator::Generator};
//!
//! let config = GeneratorConfig::from_file("/etc/solardash.json")?;
//! let generator = Generator::new(config)?;
//!
//! let report = generator.run().await;
//! println!("wrote {} snapshots", report.written.len());
//! ```

pub mod aggregate;
pub mod config;
pub mod generator;
pub mod snapshot;
pub mod tail;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregate::{RangeAggregator, RangeDiagnostics, RangeResult};
    pub use crate::config::{GeneratorConfig, TailBudget, TimeRangeConfig};
    pub use crate::generator::{Generator, RunReport};
    pub use crate::snapshot::{LatestSnapshot, SnapshotComposer, SnapshotDocument};
    pub use crate::tail::{read_tail, TailSlice};
    pub use crate::telemetry::{BatteryStatus, Metric, MetricValues, TelemetryRecord};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
