//! Latest-value extraction
//!
//! Finds the newest well-formed record by scanning a small tail backward.
//! A torn or garbage final line is skipped in favour of its nearest valid
//! predecessor.

use std::path::Path;

use crate::tail::{read_tail, TailError};
use crate::telemetry::{parse_line, TelemetryRecord};

/// Last valid record in a text slice, scanning from the end
pub fn latest_in_text(text: &str) -> Option<TelemetryRecord> {
    text.lines().rev().find_map(parse_line)
}

/// Last valid record within the final `budget` bytes of `path`.
///
/// `Ok(None)` when the log is missing or holds no valid record in range.
pub async fn latest_record(path: &Path, budget: u64) -> Result<Option<TelemetryRecord>, TailError> {
    let slice = read_tail(path, budget).await?;
    let latest = latest_in_text(&slice.text);
    if latest.is_none() && slice.exists {
        tracing::debug!(
            path = %path.display(),
            bytes_read = slice.bytes_read,
            "no valid record in latest-value tail"
        );
    }
    Ok(latest)
}
