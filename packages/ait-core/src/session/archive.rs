//! On-disk layout for generated audio, and the reset/archive move that
//! happens when a join key's session is reset.
//!
//! Generated audio for a live join key lives under
//! `generated-audio/active/<join_key>/`. Resetting a session never
//! deletes that directory outright — the files are moved into a
//! timestamped sibling under `generated-audio/inactive/` and the active
//! directory is left present but empty, ready for the next file the
//! session produces. Only the reaper, once a session's entry has been
//! fully evicted from the registry, may delete an active directory.

use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::{AitError, AitResult};

pub fn active_dir(base_dir: &Path, join_key: &str) -> PathBuf {
    base_dir.join("active").join(join_key)
}

pub fn inactive_dir(base_dir: &Path, join_key: &str, timestamp: &str) -> PathBuf {
    base_dir.join("inactive").join(format!("{join_key}_{timestamp}"))
}

/// Moves every file currently in `active/<join_key>/` into a fresh
/// `inactive/<join_key>_<YYYYMMDD-HHMMSS>/` directory, leaving the active
/// directory present but empty. A no-op (besides ensuring the active
/// directory exists) if there is nothing to archive.
pub fn reset_join_key(base_dir: &Path, join_key: &str) -> AitResult<()> {
    let active = active_dir(base_dir, join_key);
    std::fs::create_dir_all(&active)
        .map_err(|e| AitError::Internal(format!("creating {}: {e}", active.display())))?;

    let mut entries = std::fs::read_dir(&active)
        .map_err(|e| AitError::Internal(format!("reading {}: {e}", active.display())))?
        .filter_map(|entry| entry.ok())
        .peekable();

    if entries.peek().is_none() {
        return Ok(());
    }

    let timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
    let inactive = inactive_dir(base_dir, join_key, &timestamp);
    std::fs::create_dir_all(&inactive)
        .map_err(|e| AitError::Internal(format!("creating {}: {e}", inactive.display())))?;

    for entry in entries {
        let from = entry.path();
        let Some(name) = from.file_name() else { continue };
        let to = inactive.join(name);
        std::fs::rename(&from, &to)
            .map_err(|e| AitError::Internal(format!("archiving {} to {}: {e}", from.display(), to.display())))?;
    }

    Ok(())
}

/// Deletes an active directory outright. Callers must only invoke this
/// once the corresponding session no longer exists in the registry — the
/// reaper is the only caller.
pub fn delete_active_dir(base_dir: &Path, join_key: &str) -> AitResult<()> {
    let active = active_dir(base_dir, join_key);
    if active.exists() {
        std::fs::remove_dir_all(&active)
            .map_err(|e| AitError::Internal(format!("removing {}: {e}", active.display())))?;
    }
    Ok(())
}

/// Lists the join keys with an on-disk active directory, for the reaper
/// to reconcile against the live session registry.
pub fn active_join_keys(base_dir: &Path) -> AitResult<Vec<String>> {
    let active_root = base_dir.join("active");
    if !active_root.exists() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in std::fs::read_dir(&active_root)
        .map_err(|e| AitError::Internal(format!("reading {}: {e}", active_root.display())))?
    {
        let entry = entry.map_err(|e| AitError::Internal(e.to_string()))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            if let Some(name) = entry.file_name().to_str() {
                keys.push(name.to_string());
            }
        }
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reset_moves_files_into_timestamped_inactive_dir() {
        let dir = tempdir().unwrap();
        let active = active_dir(dir.path(), "room1");
        std::fs::create_dir_all(&active).unwrap();
        std::fs::write(active.join("000_a_m1_v_u.mp3"), b"data").unwrap();

        reset_join_key(dir.path(), "room1").unwrap();

        assert!(active.exists());
        assert!(std::fs::read_dir(&active).unwrap().next().is_none());

        let inactive_root = dir.path().join("inactive");
        let archived = std::fs::read_dir(&inactive_root).unwrap().next().unwrap().unwrap();
        assert!(archived.file_name().to_str().unwrap().starts_with("room1_"));
    }

    #[test]
    fn reset_with_no_files_is_a_noop() {
        let dir = tempdir().unwrap();
        reset_join_key(dir.path(), "room1").unwrap();
        assert!(active_dir(dir.path(), "room1").exists());
        assert!(!dir.path().join("inactive").exists());
    }

    #[test]
    fn delete_active_dir_removes_directory() {
        let dir = tempdir().unwrap();
        let active = active_dir(dir.path(), "room1");
        std::fs::create_dir_all(&active).unwrap();
        delete_active_dir(dir.path(), "room1").unwrap();
        assert!(!active.exists());
    }

    #[test]
    fn active_join_keys_lists_directories() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(active_dir(dir.path(), "room1")).unwrap();
        std::fs::create_dir_all(active_dir(dir.path(), "room2")).unwrap();
        let mut keys = active_join_keys(dir.path()).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["room1".to_string(), "room2".to_string()]);
    }
}
