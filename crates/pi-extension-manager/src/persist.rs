use std::io::Write;
use std::path::Path;

use crate::config::paths;
use crate::error::ExtMgrError;

/// Write `content` to a unique temp file next to `path`, then rename over it.
///
/// If the rename fails (e.g. across devices or a locked target on Windows) the
/// same content is written in place instead, so the caller's data still lands.
/// Created files are owner-only on Unix since settings may hold credentials.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), ExtMgrError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    paths::ensure_dir(dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "data".to_string());
    let unique = uuid::Uuid::new_v4();
    let tmp_path = dir.join(format!(".{file_name}.{unique}.tmp"));

    {
        #[cfg(unix)]
        let mut file = {
            use std::os::unix::fs::OpenOptionsExt;
            std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(&tmp_path)?
        };
        #[cfg(not(unix))]
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        if let Err(e) = file.write_all(content).and_then(|_| file.sync_all()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(ExtMgrError::Io(e));
        }
    }

    if let Err(rename_err) = std::fs::rename(&tmp_path, path) {
        tracing::debug!(
            "Rename {} -> {} failed ({rename_err}); writing in place",
            tmp_path.display(),
            path.display()
        );
        let fallback = std::fs::write(path, content);
        let _ = std::fs::remove_file(&tmp_path);
        fallback?;
    }
    Ok(())
}

/// Async wrapper running [`write_atomic`] on the blocking pool.
pub async fn write_atomic_async(path: &Path, content: Vec<u8>) -> Result<(), ExtMgrError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, &content))
        .await
        .map_err(|e| ExtMgrError::Other(format!("Write task failed: {e}")))?
}
