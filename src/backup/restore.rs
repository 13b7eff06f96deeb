use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::manager::{calculate_checksum, BackupEntry, BackupManager};

/// Outcome of a restore, or of a restore preview (`status: "preview"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreResult {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_files: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_size: u64,
    pub restored_size: u64,
    pub status: String,
    pub restored_files: Vec<String>,
    pub failed_files: Vec<String>,
}

impl RestoreResult {
    fn new(session_id: &str, total_files: usize, status: &str) -> Self {
        RestoreResult {
            session_id: session_id.to_string(),
            start_time: Utc::now(),
            end_time: None,
            total_files,
            success_count: 0,
            failure_count: 0,
            total_size: 0,
            restored_size: 0,
            status: status.to_string(),
            restored_files: Vec::new(),
            failed_files: Vec::new(),
        }
    }
}

/// Restores files from backup sessions back to their original paths.
///
/// Conflicts (target already exists) are detected and reported, never
/// silently resolved; overwriting requires the explicit flag.
pub struct RestoreManager {
    backups: Arc<BackupManager>,
}

impl RestoreManager {
    pub fn new(backups: Arc<BackupManager>) -> Self {
        RestoreManager { backups }
    }

    /// Read-only preview: reports which files would restore and which would
    /// conflict, without writing anything. Idempotent for an unchanged
    /// filesystem. The session is pinned against cleanup for the duration.
    pub fn preview(
        &self,
        session_id: &str,
        subset: Option<&[String]>,
    ) -> Result<RestoreResult, String> {
        let _lock = self.backups.lock_session(session_id)?;
        let session = self.backups.get_session(session_id)?;

        let targets = select_entries(&session.entries, subset);
        let mut result = RestoreResult::new(session_id, targets.len(), "preview");

        for (path, entry) in targets {
            match entry {
                Some(entry) if entry.success => {
                    result.total_size += entry.size;
                    if Path::new(&entry.original_path).exists() {
                        result
                            .failed_files
                            .push(format!("{} (would conflict)", entry.original_path));
                        result.failure_count += 1;
                    } else {
                        result.restored_files.push(entry.original_path.clone());
                        result.success_count += 1;
                        result.restored_size += entry.size;
                    }
                }
                Some(entry) => {
                    result.total_size += entry.size;
                    result.failed_files.push(entry.original_path.clone());
                    result.failure_count += 1;
                }
                None => {
                    result.failed_files.push(path);
                    result.failure_count += 1;
                }
            }
        }

        Ok(result)
    }

    /// Restore all (or a subset of) files from a session. A conflicting
    /// target with `overwrite=false` is skipped and counted as a failure,
    /// not a fatal error. With `pre_restore_backup`, existing targets that
    /// will be overwritten are backed up into a `pre_restore` session first.
    pub fn restore(
        &self,
        session_id: &str,
        subset: Option<&[String]>,
        overwrite: bool,
        pre_restore_backup: bool,
    ) -> Result<RestoreResult, String> {
        let _lock = self.backups.lock_session(session_id)?;
        let session = self.backups.get_session(session_id)?;

        let targets = select_entries(&session.entries, subset);
        let mut result = RestoreResult::new(session_id, targets.len(), "in_progress");

        log::info!(
            "Starting restore from session {} ({} files, overwrite: {})",
            session_id,
            targets.len(),
            overwrite
        );

        if pre_restore_backup && overwrite {
            let conflicts: Vec<String> = targets
                .iter()
                .filter_map(|(_, entry)| entry.as_ref())
                .filter(|entry| entry.success && Path::new(&entry.original_path).exists())
                .map(|entry| entry.original_path.clone())
                .collect();
            if !conflicts.is_empty() {
                self.backups.backup_files(&conflicts, "pre_restore")?;
            }
        }

        for (path, entry) in targets {
            let entry = match entry {
                Some(entry) => entry,
                None => {
                    result.failed_files.push(path);
                    result.failure_count += 1;
                    continue;
                }
            };

            result.total_size += entry.size;
            if !entry.success {
                result.failed_files.push(entry.original_path.clone());
                result.failure_count += 1;
                continue;
            }

            match restore_single_file(&entry, overwrite) {
                Ok(()) => {
                    result.restored_files.push(entry.original_path.clone());
                    result.success_count += 1;
                    result.restored_size += entry.size;
                }
                Err(e) => {
                    log::warn!("Failed to restore {}: {}", entry.original_path, e);
                    result.failed_files.push(entry.original_path.clone());
                    result.failure_count += 1;
                }
            }
        }

        result.end_time = Some(Utc::now());
        result.status = "completed".to_string();

        log::info!(
            "Completed restore from session {}: {} restored, {} failed",
            session_id,
            result.success_count,
            result.failure_count
        );

        Ok(result)
    }
}

// Pair each requested path with its backup entry. Without a subset, every
// entry of the session is selected.
fn select_entries(
    entries: &[BackupEntry],
    subset: Option<&[String]>,
) -> Vec<(String, Option<BackupEntry>)> {
    match subset {
        None => entries
            .iter()
            .map(|entry| (entry.original_path.clone(), Some(entry.clone())))
            .collect(),
        Some(paths) => {
            let by_path: HashMap<&str, &BackupEntry> = entries
                .iter()
                .map(|entry| (entry.original_path.as_str(), entry))
                .collect();
            paths
                .iter()
                .map(|path| (path.clone(), by_path.get(path.as_str()).map(|e| (*e).clone())))
                .collect()
        }
    }
}

fn restore_single_file(entry: &BackupEntry, overwrite: bool) -> Result<(), String> {
    let target = Path::new(&entry.original_path);
    if target.exists() && !overwrite {
        return Err(format!(
            "file already exists and overwrite is disabled: {}",
            entry.original_path
        ));
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create destination directory: {}", e))?;
    }

    fs::copy(&entry.backup_path, target)
        .map_err(|e| format!("failed to copy file from backup: {}", e))?;

    // The restored bytes must match the checksum recorded at backup time.
    if !entry.checksum.is_empty() {
        let current = calculate_checksum(target)?;
        if current != entry.checksum {
            return Err(format!(
                "checksum verification failed: expected {}, got {}",
                entry.checksum, current
            ));
        }
    }

    Ok(())
}
