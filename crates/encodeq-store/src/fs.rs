//! Crash-safe file helpers.

use std::io;
use std::path::Path;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

pub(crate) const TMP_SUFFIX: &str = ".tmp";

/// Replace `dir/file_name` with `bytes` so that a crash leaves either the old
/// or the new content, never a torn file.
pub(crate) async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<()> {
    let tmp_path = dir.join(format!("{file_name}{TMP_SUFFIX}"));
    let final_path = dir.join(file_name);

    let result = async {
        let mut file = File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await?;
        sync_dir(dir).await
    }
    .await;

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path).await;
    }
    result
}

/// [`write_atomic`] for a file that must not exist unless the call succeeds.
///
/// If the rename landed but the directory could not be synced, the new file is
/// removed again. A crash while the medium keeps failing can still resurrect
/// it; the removal is best effort.
pub(crate) async fn create_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> io::Result<()> {
    let result = write_atomic(dir, file_name, bytes).await;
    if result.is_err() && fs::remove_file(dir.join(file_name)).await.is_ok() {
        let _ = sync_dir(dir).await;
    }
    result
}

/// Flush directory entries (creates, renames, unlinks) to disk.
#[cfg(unix)]
pub(crate) async fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
pub(crate) async fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
