//! File system utilities.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Sibling temp path used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Replace `path` with `bytes` atomically (write to temp, sync, then rename).
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Load TOML data from a file
pub async fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await?;
    let data: T = toml::from_str(&content)?;
    Ok(data)
}
