// packages/rwnotify/src/persistence.rs
use crate::{error::AppError, types::StateImage};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// 整份覆盖写入：先写临时文件再 rename，避免写到一半时崩溃留下半个文件
pub async fn save_state(image: &StateImage, path: &Path) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let json = serde_json::to_vec_pretty(image)?;
    let tmp = tmp_path(path);
    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;

    debug!("[PERSIST] Wrote {} routes / {} users to {:?}", image.routes.len(), image.users.len(), path);
    Ok(())
}

pub async fn load_state(path: &Path) -> Result<StateImage, AppError> {
    let raw = fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}
