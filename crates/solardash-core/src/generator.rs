//! Snapshot generation
//!
//! One run reads the log once per range plus once for the latest record,
//! all concurrently, composes a document per range and publishes each one
//! atomically. A failing range or destination only affects its own file.

use std::path::PathBuf;
use std::sync::Arc;

use crate::aggregate::{latest_record, RangeAggregator, RangeResult};
use crate::config::{ConfigError, GeneratorConfig, TimeRangeConfig};
use crate::snapshot::{
    write_json_atomic, LatestSnapshot, SnapshotComposer, SnapshotDocument, WriteError,
};

/// A document paired with where it will be published
#[derive(Debug, Clone)]
pub struct PlannedSnapshot {
    /// Resolved destination
    pub path: PathBuf,
    /// Document to publish
    pub document: SnapshotDocument,
}

/// Outcome of one generation run
#[derive(Debug, Default)]
pub struct RunReport {
    /// Timestamp every document was computed against
    pub generated_at_ms: i64,
    /// Newest record seen, if any
    pub latest_entry_ms: Option<i64>,
    /// Destinations replaced successfully
    pub written: Vec<PathBuf>,
    /// Ranges whose snapshot could not be published
    pub failures: Vec<(String, WriteError)>,
}

impl RunReport {
    /// No snapshot was published
    pub fn is_total_failure(&self) -> bool {
        self.written.is_empty()
    }
}

/// Single-shot snapshot generator
#[derive(Debug, Clone)]
pub struct Generator {
    config: Arc<GeneratorConfig>,
    aggregator: RangeAggregator,
    composer: SnapshotComposer,
}

impl Generator {
    /// Validate `config` and build a generator for it
    pub fn new(config: GeneratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let aggregator = RangeAggregator::new(config.log_path.clone(), config.tail_budget);
        let composer = SnapshotComposer::new(config.stale_threshold_secs);
        Ok(Self {
            config: Arc::new(config),
            aggregator,
            composer,
        })
    }

    /// The configuration this generator runs with
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Run once against the current wall clock
    pub async fn run(&self) -> RunReport {
        self.run_at(chrono::Utc::now().timestamp_millis()).await
    }

    /// Run once as of `now_ms`
    pub async fn run_at(&self, now_ms: i64) -> RunReport {
        let planned = self.build_documents(now_ms).await;
        let latest_entry_ms = planned.first().and_then(|p| p.document.latest_entry_ms);

        let pretty = self.config.pretty;
        let writes: Vec<_> = planned
            .into_iter()
            .map(|PlannedSnapshot { path, document }| {
                let range = document.range.clone();
                let task_path = path.clone();
                let handle = tokio::spawn(async move {
                    write_json_atomic(&task_path, &document, pretty).await
                });
                (range, path, handle)
            })
            .collect();

        let mut written = Vec::with_capacity(writes.len());
        let mut failures = Vec::new();
        for (range, path, handle) in writes {
            let outcome = handle.await.unwrap_or_else(|e| {
                Err(WriteError::Io {
                    path: path.clone(),
                    source: std::io::Error::other(e.to_string()),
                })
            });
            match outcome {
                Ok(()) => {
                    tracing::info!(range = %range, path = %path.display(), "snapshot published");
                    written.push(path);
                }
                Err(e) => {
                    tracing::warn!(range = %range, path = %path.display(), error = %e, "snapshot not published");
                    failures.push((range, e));
                }
            }
        }

        RunReport {
            generated_at_ms: now_ms,
            latest_entry_ms,
            written,
            failures,
        }
    }

    /// Compute every range and compose its document without writing anything
    pub async fn build_documents(&self, now_ms: i64) -> Vec<PlannedSnapshot> {
        let handles: Vec<_> = self
            .config
            .ranges
            .iter()
            .map(|range| {
                let aggregator = self.aggregator.clone();
                let range = range.clone();
                tokio::spawn(async move { aggregator.aggregate(&range, now_ms).await })
            })
            .collect();

        let latest = self.latest().await;

        let mut planned = Vec::with_capacity(handles.len());
        for (range, handle) in self.config.ranges.iter().zip(handles) {
            let result = join_range(range, now_ms, handle).await;
            let primary = self.config.is_primary(range);
            planned.push(PlannedSnapshot {
                path: self.config.output_path(range),
                document: self.composer.compose(&latest, result, primary, now_ms),
            });
        }
        planned
    }

    /// Aggregate one configured range; `None` if `key` is not configured
    pub async fn inspect(&self, key: &str, now_ms: i64) -> Option<RangeResult> {
        let range = self.config.range(key)?;
        Some(self.aggregator.aggregate(range, now_ms).await)
    }

    /// Latest valid record in the log
    pub async fn latest(&self) -> LatestSnapshot {
        let result = latest_record(&self.config.log_path, self.config.latest_tail_bytes).await;
        if let Err(e) = &result {
            tracing::warn!(path = %self.config.log_path.display(), error = %e, "latest-value read failed");
        }
        LatestSnapshot::from_result(result)
    }
}

async fn join_range(
    range: &TimeRangeConfig,
    now_ms: i64,
    handle: tokio::task::JoinHandle<RangeResult>,
) -> RangeResult {
    match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::warn!(range = %range.key, error = %e, "range task failed");
            RangeResult::failed(range, now_ms, format!("range task failed: {}", e))
        }
    }
}
