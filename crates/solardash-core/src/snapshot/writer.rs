//! Atomic snapshot writer
//!
//! Writes to a uniquely named temp file beside the destination, copies the
//! destination's mode and ownership when it already exists, then renames
//! over it. Readers see either the old file or the new one, never a partial
//! write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Disambiguates temp names within one process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Errors that can occur while publishing a snapshot
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Destination has no file name: {0}")]
    InvalidDestination(PathBuf),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Temp file path in the destination's directory: `.<name>.<pid>.<nanos>.<n>.tmp`
pub fn temp_path_for(dest: &Path) -> Result<PathBuf, WriteError> {
    let name = dest
        .file_name()
        .ok_or_else(|| WriteError::InvalidDestination(dest.to_path_buf()))?;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);

    let tmp_name = format!(
        ".{}.{}.{}.{}.tmp",
        name.to_string_lossy(),
        std::process::id(),
        nanos,
        n
    );
    Ok(dest.with_file_name(tmp_name))
}

/// Atomically replace `dest` with `bytes`.
///
/// On failure the temp file is removed and `dest` is left untouched.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let tmp = temp_path_for(dest)?;

    if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| WriteError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
    }

    if let Err(e) = write_and_rename(&tmp, dest, bytes).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(tmp = %tmp.display(), error = %cleanup, "failed to remove temp file");
            }
        }
        return Err(e);
    }

    tracing::debug!(path = %dest.display(), bytes = bytes.len(), "snapshot replaced");
    Ok(())
}

/// Serialize `value` as JSON and write it atomically
pub async fn write_json_atomic<T: Serialize>(dest: &Path, value: &T, pretty: bool) -> Result<(), WriteError> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    write_atomic(dest, &bytes).await
}

async fn write_and_rename(tmp: &Path, dest: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let tmp_err = |source| WriteError::Io {
        path: tmp.to_path_buf(),
        source,
    };

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(tmp)
        .await
        .map_err(tmp_err)?;
    file.write_all(bytes).await.map_err(tmp_err)?;
    file.sync_all().await.map_err(tmp_err)?;
    drop(file);

    match tokio::fs::metadata(dest).await {
        Ok(existing) => match_existing(tmp, dest, &existing).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::debug!(path = %dest.display(), error = %e, "cannot stat destination");
        }
    }

    tokio::fs::rename(tmp, dest)
        .await
        .map_err(|source| WriteError::Io {
            path: dest.to_path_buf(),
            source,
        })
}

/// Best effort: give the temp file the destination's mode and owner
async fn match_existing(tmp: &Path, dest: &Path, existing: &std::fs::Metadata) {
    if let Err(e) = tokio::fs::set_permissions(tmp, existing.permissions()).await {
        tracing::warn!(path = %dest.display(), error = %e, "could not copy snapshot permissions");
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        let (uid, gid) = (existing.uid(), existing.gid());
        let tmp = tmp.to_path_buf();
        let chown = tokio::task::spawn_blocking(move || std::os::unix::fs::chown(&tmp, Some(uid), Some(gid)))
            .await;
        match chown {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(path = %dest.display(), uid, gid, error = %e, "could not copy snapshot ownership")
            }
            Err(e) => tracing::warn!(error = %e, "ownership task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect()
    }

    #[test]
    fn test_temp_paths_are_unique_siblings() {
        let dest = Path::new("/var/www/html/api/stats.json");
        let a = temp_path_for(dest).unwrap();
        let b = temp_path_for(dest).unwrap();

        assert_ne!(a, b);
        assert_eq!(a.parent(), dest.parent());
        assert!(a.file_name().unwrap().to_string_lossy().starts_with(".stats.json."));
        assert!(temp_path_for(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_creates_directory_and_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("api").join("stats.json");

        write_atomic(&dest, b"{\"a\":1}").await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"{\"a\":1}");
        assert!(leftovers(dest.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("stats.json");
        std::fs::write(&dest, b"old and much longer content").unwrap();

        write_atomic(&dest, b"new").await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_preserves_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("stats.json");
        std::fs::write(&dest, b"old").unwrap();
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o640)).unwrap();

        write_atomic(&dest, b"new").await.unwrap();
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[tokio::test]
    async fn test_failed_rename_cleans_up_and_keeps_destination() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let dest = dir.path().join("stats.json");
        std::fs::create_dir(&dest).unwrap();
        std::fs::write(dest.join("keep"), b"x").unwrap();

        let err = write_atomic(&dest, b"new").await.unwrap_err();
        assert!(matches!(err, WriteError::Io { .. }));
        assert!(dest.join("keep").exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_write_json() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("doc.json");
        write_json_atomic(&dest, &serde_json::json!({"ok": true}), false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), r#"{"ok":true}"#);
    }
}
