//! Small filesystem utilities for run artifacts.

use std::path::Path;

use crate::LoadflameResult;

/// Byte length of `path` if it exists and is a non-empty regular file.
pub fn non_empty_len(path: &Path) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Some(meta.len()),
        _ => None,
    }
}

/// Removes a leftover artifact from a previous run. A missing file is fine.
pub fn remove_stale(path: &Path) -> LoadflameResult<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!("removed stale artifact {}", path.display());
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err.into()),
    }
}

pub fn write_json(path: &Path, value: &impl serde::Serialize) -> LoadflameResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}
