//! Snapshot documents
//!
//! Composition of the per-range JSON the dashboard polls, its display
//! strings, and atomic publication to the web root.

mod compose;
pub mod format;
mod writer;

pub use compose::{
    LatestSnapshot, SeriesBlock, SnapshotComposer, SnapshotDocument, ValueSource,
    DEFAULT_STALE_THRESHOLD_SECS,
};
pub use format::{FormattedValues, PLACEHOLDER};
pub use writer::{temp_path_for, write_atomic, write_json_atomic, WriteError};
