//! Demo Mode - Simulated collector for testing
//!
//! Generates realistic solar/battery log lines without the shunt monitor
//! attached, and appends them using the collector's lock-file protocol.
//! Simulates a small panel charging a battery through the day with random
//! passing clouds, and a constant-ish host load.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Peak panel output in watts
const PANEL_PEAK_W: f64 = 60.0;
/// Usable battery capacity in watt-hours
const BATTERY_WH: f64 = 1200.0;
/// Lock acquisition attempts before giving up
const LOCK_ATTEMPTS: u32 = 5;
/// Base back-off between lock attempts, multiplied by the attempt number
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Simulated collector that produces one power-log line per call
pub struct DemoCollector {
    /// State of charge, 0-1
    soc: f64,
    /// Host uptime in seconds
    uptime_secs: f64,
    /// Timestamp of the previous sample
    last_sample_ms: Option<i64>,
    /// Time of the next cloud (ms since epoch)
    next_cloud_at_ms: Option<i64>,
    /// Current sky state
    sky: Sky,
    /// Random number generator
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Sky {
    /// Full sun
    Clear,
    /// Panel output reduced by `shade` until `until_ms`
    Overcast { until_ms: i64, shade: f64 },
}

impl Default for DemoCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoCollector {
    /// Create a collector with a random seed
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a reproducible collector
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let soc = rng.gen_range(0.55..0.8);
        Self {
            soc,
            uptime_secs: 0.0,
            last_sample_ms: None,
            next_cloud_at_ms: None,
            sky: Sky::Clear,
            rng,
        }
    }

    /// Produce the log record for time `now_ms`
    pub fn sample(&mut self, now_ms: i64) -> Value {
        let delta_secs = self
            .last_sample_ms
            .map(|last| (now_ms - last).max(0) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.last_sample_ms = Some(now_ms);
        self.uptime_secs += delta_secs;

        self.update_sky(now_ms);

        let input_w = self.panel_output(now_ms);
        let t = now_ms as f64 / 1000.0;
        let load_w = 4.8 + 0.6 * (t / 97.0).sin() + self.rng.gen_range(-0.2..0.2);

        // Battery absorbs the surplus until it is full, then floats.
        let mut battery_w = input_w - load_w;
        let floating = self.soc >= 0.995 && battery_w > 0.0;
        if floating {
            battery_w = 0.0;
        }
        self.soc = (self.soc + battery_w * delta_secs / (BATTERY_WH * 3600.0)).clamp(0.05, 1.0);

        let voltage = 12.0 + 1.6 * self.soc + if battery_w > 0.0 { 0.25 } else { 0.0 };
        let current_ma = battery_w / voltage * 1000.0;
        let status = if floating {
            "Full"
        } else if current_ma > 10.0 {
            "Charging"
        } else if current_ma < -10.0 {
            "Discharging"
        } else {
            "Full"
        };

        let cpu_load = 0.35 + 0.15 * (t / 613.0).sin() + self.rng.gen_range(0.0..0.05);
        let cpu_temp = 44.0 + 8.0 * cpu_load + 0.1 * input_w;

        let ts = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));

        json!({
            "ts": ts,
            "ms": now_ms,
            "esp32_v_V": voltage,
            "esp32_i_mA": current_ma,
            "esp32_p_mW": battery_w * 1000.0,
            "esp32_soc": self.soc,
            "soc": self.soc,
            "status": status,
            "p_in_W": input_w,
            "load_W": load_w,
            "uptime": self.uptime_secs.round(),
            "cpu_temp_c": cpu_temp,
            "cpu_load_1min": cpu_load * 1.2,
            "cpu_load_5min": cpu_load * 1.1,
            "cpu_load_15min": cpu_load,
        })
    }

    /// Produce one serialized log line (without the trailing newline)
    pub fn line(&mut self, now_ms: i64) -> String {
        self.sample(now_ms).to_string()
    }

    fn update_sky(&mut self, now_ms: i64) {
        let next_cloud = *self
            .next_cloud_at_ms
            .get_or_insert_with(|| now_ms + self.rng.gen_range(600_000..3_600_000));

        match self.sky {
            Sky::Clear => {
                if now_ms >= next_cloud {
                    let until_ms = now_ms + self.rng.gen_range(300_000..1_800_000);
                    let shade = self.rng.gen_range(0.3..0.9);
                    self.sky = Sky::Overcast { until_ms, shade };
                }
            }
            Sky::Overcast { until_ms, .. } => {
                if now_ms >= until_ms {
                    self.sky = Sky::Clear;
                    self.next_cloud_at_ms = Some(now_ms + self.rng.gen_range(600_000..3_600_000));
                }
            }
        }
    }

    /// Panel output following a half-sine between 06:00 and 18:00 UTC
    fn panel_output(&self, now_ms: i64) -> f64 {
        let hour = now_ms.rem_euclid(86_400_000) as f64 / 3_600_000.0;
        if !(6.0..18.0).contains(&hour) {
            return 0.0;
        }
        let daylight = ((hour - 6.0) / 12.0 * std::f64::consts::PI).sin();
        let shade = match self.sky {
            Sky::Clear => 0.0,
            Sky::Overcast { shade, .. } => shade,
        };
        PANEL_PEAK_W * daylight * (1.0 - shade)
    }
}

/// Errors from the locked append
#[derive(Error, Debug)]
pub enum AppendError {
    #[error("could not acquire lock {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },

    #[error("{count} samples {interval_ms}ms apart do not fit before {end_ms}")]
    InvalidSchedule {
        count: usize,
        interval_ms: i64,
        end_ms: i64,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lock file guarding appends to `path`
pub fn lock_path(path: &Path) -> PathBuf {
    let mut lock: OsString = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}

/// Append one line to a log using the lock-file protocol.
///
/// The lock is an exclusively created `<log>.lock`; the line and its newline
/// go out in a single write so readers never see a torn record in the middle
/// of the file.
pub async fn append_line_locked(path: &Path, line: &str) -> Result<(), AppendError> {
    let lock = lock_path(path);

    for attempt in 0..LOCK_ATTEMPTS {
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .await
        {
            Ok(guard) => {
                let result = append_line(path, line).await;
                drop(guard);
                if let Err(e) = tokio::fs::remove_file(&lock).await {
                    tracing::warn!(lock = %lock.display(), error = %e, "failed to release log lock");
                }
                return result;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tokio::time::sleep(LOCK_RETRY_DELAY * (attempt + 1)).await;
            }
            Err(source) => return Err(AppendError::Io { path: lock, source }),
        }
    }

    Err(AppendError::LockTimeout {
        path: lock,
        attempts: LOCK_ATTEMPTS,
    })
}

async fn append_line(path: &Path, line: &str) -> Result<(), AppendError> {
    let io_err = |source| AppendError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;

    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line.trim_end_matches('\n'));
    buf.push('\n');

    file.write_all(buf.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)
}

/// Append `count` samples spaced `interval_ms` apart, the last at `end_ms`
pub async fn backfill(
    path: &Path,
    collector: &mut DemoCollector,
    count: usize,
    interval_ms: i64,
    end_ms: i64,
) -> Result<(), AppendError> {
    let start_ms = i64::try_from(count.saturating_sub(1))
        .ok()
        .and_then(|steps| interval_ms.checked_mul(steps))
        .and_then(|span| end_ms.checked_sub(span))
        .ok_or(AppendError::InvalidSchedule {
            count,
            interval_ms,
            end_ms,
        })?;
    for n in 0..count {
        let line = collector.line(start_ms + interval_ms * n as i64);
        append_line_locked(path, &line).await?;
    }
    tracing::debug!(path = %path.display(), count, "backfilled demo records");
    Ok(())
}
