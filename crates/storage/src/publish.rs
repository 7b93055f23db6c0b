//! Atomic file publication and tolerant reads.

use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use obs_common::{ObsError, ObsResult};

/// Replace `path` with `bytes` so concurrent readers never observe a partial file.
///
/// Writes a hidden temporary in the same directory, syncs it, then renames it
/// over the target. On failure the temporary is removed and the previous
/// version stays in place.
pub async fn publish_bytes(path: &Path, bytes: &[u8]) -> ObsResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| ObsError::write_failure(path, "path has no parent directory"))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| ObsError::write_failure(path, "path has no file name"))?
        .to_string_lossy();

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| ObsError::write_failure(path, e))?;

    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    if let Err(e) = write_synced(&tmp, bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ObsError::write_failure(path, e));
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(ObsError::write_failure(path, e));
    }

    Ok(())
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Serialize `value` as JSON and publish it atomically.
pub async fn publish_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> ObsResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| ObsError::write_failure(path, e))?;
    publish_bytes(path, &bytes).await
}

/// Read and parse a JSON file. A missing file is `Ok(None)`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> ObsResult<Option<T>> {
    let Some(bytes) = read_optional(path).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ObsError::corrupt_cache(path, e))
}

/// Read a file's bytes. A missing file is `Ok(None)`.
pub async fn read_optional(path: &Path) -> ObsResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
        Err(e) => Err(ObsError::corrupt_cache(path, e)),
    }
}
