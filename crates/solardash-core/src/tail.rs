//! Bounded tail reads
//!
//! Reads only the trailing bytes of an append-only log. A slice that starts
//! mid-line has its leading fragment dropped so no partial record ever
//! reaches the parser.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Errors from tail reads. A missing file is not an error.
#[derive(Error, Debug)]
pub enum TailError {
    #[error("Tail budget must be positive")]
    ZeroBudget,

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The text read from the end of a log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailSlice {
    /// Whether the file existed
    pub exists: bool,
    /// File size at stat time
    pub file_size: u64,
    /// Offset of the first byte considered
    pub start_offset: u64,
    /// Bytes actually read from disk
    pub bytes_read: u64,
    /// Whether a leading partial line was discarded
    pub truncated: bool,
    /// Complete lines (the final line may lack its newline)
    pub text: String,
}

impl TailSlice {
    /// Slice for a log that does not exist yet
    pub fn missing() -> Self {
        Self::default()
    }
}

/// Read at most the last `budget` bytes of `path`.
///
/// One extra byte before the budget boundary is fetched so that a boundary
/// landing exactly on a line start keeps that line; otherwise everything up
/// to and including the first newline is discarded.
pub async fn read_tail(path: &Path, budget: u64) -> Result<TailSlice, TailError> {
    if budget == 0 {
        return Err(TailError::ZeroBudget);
    }

    let io_err = |source| TailError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "log not found; treating as empty");
            return Ok(TailSlice::missing());
        }
        Err(e) => return Err(io_err(e)),
    };

    let file_size = file.metadata().await.map_err(io_err)?.len();
    let start = file_size.saturating_sub(budget);
    // Peek at the byte before `start` to learn whether it ends a line.
    let read_from = start.saturating_sub(1);

    file.seek(SeekFrom::Start(read_from)).await.map_err(io_err)?;
    let mut buf = Vec::with_capacity((file_size - read_from) as usize);
    // `take` bounds the read at the size we stat'ed, ignoring later appends,
    // and tolerates a concurrent truncation.
    (&mut file)
        .take(file_size - read_from)
        .read_to_end(&mut buf)
        .await
        .map_err(io_err)?;
    let bytes_read = buf.len() as u64;

    let body: &[u8] = if start == 0 {
        &buf
    } else {
        match buf.iter().position(|&b| b == b'\n') {
            Some(newline) => &buf[newline + 1..],
            None => &[],
        }
    };
    let truncated = start > 0 && buf.first() != Some(&b'\n');

    Ok(TailSlice {
        exists: true,
        file_size,
        start_offset: start,
        bytes_read,
        truncated,
        text: String::from_utf8_lossy(body).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("power.jsonl");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let slice = read_tail(&dir.path().join("nope.jsonl"), 1024).await.unwrap();
        assert!(!slice.exists);
        assert!(slice.text.is_empty());
    }

    #[tokio::test]
    async fn test_zero_budget_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "a\n");
        assert!(matches!(read_tail(&path, 0).await, Err(TailError::ZeroBudget)));
    }

    #[tokio::test]
    async fn test_small_file_read_whole() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "first\nsecond\n");
        let slice = read_tail(&path, 1024).await.unwrap();

        assert_eq!(slice.text, "first\nsecond\n");
        assert_eq!(slice.start_offset, 0);
        assert_eq!(slice.file_size, 13);
        assert!(!slice.truncated);
    }

    #[tokio::test]
    async fn test_leading_partial_line_dropped() {
        let dir = TempDir::new().unwrap();
        // "aaaa\n" "bbbb\n" "cccc\n" = 15 bytes; last 8 start inside "bbbb"
        let path = write_log(&dir, "aaaa\nbbbb\ncccc\n");
        let slice = read_tail(&path, 8).await.unwrap();

        assert_eq!(slice.start_offset, 7);
        assert_eq!(slice.text, "cccc\n");
        assert!(slice.truncated);
    }

    #[tokio::test]
    async fn test_boundary_on_line_start_keeps_line() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "aaaa\nbbbb\ncccc\n");
        let slice = read_tail(&path, 10).await.unwrap();

        assert_eq!(slice.start_offset, 5);
        assert_eq!(slice.text, "bbbb\ncccc\n");
        assert!(!slice.truncated);
    }

    #[tokio::test]
    async fn test_budget_inside_single_line() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir, "a-very-long-line-without-end");
        let slice = read_tail(&path, 5).await.unwrap();
        assert!(slice.text.is_empty());
        assert!(slice.truncated);
    }
}
