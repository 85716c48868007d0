use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::info;
use tsort_core::WatermarkStateBlob;

use crate::error::Result;

/// Reads a checkpoint written by [store]. A missing file means there is nothing to restore.
pub(crate) async fn load(path: &Path) -> Result<Option<WatermarkStateBlob>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            info!(path = %path.display(), bytes = bytes.len(), "Loaded checkpoint");
            Ok(Some(WatermarkStateBlob::from(bytes)))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "No checkpoint found, starting without a high watermark");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Writes to a temporary file next to `path`, then renames it into place. `path` always holds a
/// complete checkpoint, old or new.
pub(crate) async fn store(path: &Path, blob: &WatermarkStateBlob) -> Result<()> {
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, blob.as_bytes()).await?;
    tokio::fs::rename(&tmp, path).await?;
    info!(path = %path.display(), bytes = blob.as_bytes().len(), "Stored checkpoint");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
