use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::backup::{BackupManager, BackupSession};
use crate::config::RUNTIME_CONFIG;
use crate::ops::{OperationRegistry, OperationSlot, OperationStatus};
use crate::safety::{SafetyClassifier, SafetyLevel};
use crate::scanner::probe_file;

/// Pre-deletion validation report. Blocked paths never abort the batch; they
/// are excluded from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub is_safe: bool,
    pub warnings: Vec<String>,
    pub blocked_files: Vec<String>,
    pub risky_files: Vec<String>,
    pub safe_files: Vec<String>,
    pub total_size: u64,
}

impl SafetyCheckResult {
    fn new() -> Self {
        SafetyCheckResult {
            is_safe: true,
            warnings: Vec::new(),
            blocked_files: Vec::new(),
            risky_files: Vec::new(),
            safe_files: Vec::new(),
            total_size: 0,
        }
    }
}

/// Executes confirmed deletions with a mandatory backup-before-delete
/// ordering guarantee: a path is removed only after its backup entry reached
/// `success=true`, unless the caller explicitly forced the deletion.
///
/// Exactly one deletion operation is active at a time; terminal progress
/// states stay pollable through the registry.
pub struct DeletionService {
    backups: Arc<BackupManager>,
    classifier: SafetyClassifier,
    slot: OperationSlot,
    registry: OperationRegistry,
    cancel_tokens: DashMap<String, CancellationToken>,
}

impl DeletionService {
    pub fn new(backups: Arc<BackupManager>, classifier: SafetyClassifier) -> Self {
        DeletionService {
            backups,
            classifier,
            slot: OperationSlot::new(),
            registry: OperationRegistry::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn is_deleting(&self) -> bool {
        self.slot.current().is_some()
    }

    /// Claim the deletion slot for an operation. Rejected, not queued, while
    /// another deletion is active.
    pub fn begin(&self, operation_id: &str) -> Result<(), String> {
        self.slot
            .try_acquire(operation_id)
            .map_err(|_| "deletion already in progress".to_string())
    }

    /// Request cooperative cancellation of a running deletion. Disabled by
    /// default: confirmed deletions run to completion unless
    /// `RuntimeConfig.allow_deletion_cancel` is set.
    pub fn stop(&self, operation_id: &str) -> Result<(), String> {
        if !RUNTIME_CONFIG.allow_deletion_cancel {
            return Err(
                "deletion cancellation is disabled; confirmed deletions run to completion"
                    .to_string(),
            );
        }
        match self.cancel_tokens.get(operation_id) {
            Some(token) => {
                token.cancel();
                log::info!("Deletion stop requested for {}", operation_id);
                Ok(())
            }
            None => Err(format!("operation not found: {}", operation_id)),
        }
    }

    /// Pure pre-deletion check: existence, write permission, protected-path
    /// membership, and (unless forced) safety classification. Failures block
    /// the specific path and are reported, never thrown.
    pub fn validate_request(&self, paths: &[String], force: bool) -> SafetyCheckResult {
        let mut result = SafetyCheckResult::new();

        log::info!(
            "Validating deletion request: {} files, force: {}",
            paths.len(),
            force
        );

        for path in paths {
            let entry = match probe_file(Path::new(path)) {
                Ok(entry) => entry,
                Err(_) => {
                    result.blocked_files.push(path.clone());
                    result.warnings.push(format!("File not found: {}", path));
                    continue;
                }
            };
            if !entry.is_dir {
                result.total_size += entry.size;
            }

            if !is_deletable(Path::new(path)) {
                result.blocked_files.push(path.clone());
                result
                    .warnings
                    .push(format!("Insufficient permissions: {}", path));
                continue;
            }

            if self.is_protected(path) {
                result.blocked_files.push(path.clone());
                result
                    .warnings
                    .push(format!("Protected system path blocked: {}", path));
                result.is_safe = false;
                continue;
            }

            if force {
                result.safe_files.push(path.clone());
                continue;
            }

            // Directories carry no classification; treat them as caution and
            // leave the decision to the user-visible warning.
            if entry.is_dir {
                result
                    .warnings
                    .push(format!("Directory selected for deletion: {}", path));
                result.safe_files.push(path.clone());
                continue;
            }

            let classification = self.classifier.classify(&entry);
            match classification.level {
                SafetyLevel::Risky => {
                    result.risky_files.push(path.clone());
                    result.warnings.push(format!("Risky file detected: {}", path));
                    result.is_safe = false;
                }
                SafetyLevel::Caution => {
                    result
                        .warnings
                        .push(format!("Caution file detected: {}", path));
                    result.safe_files.push(path.clone());
                }
                SafetyLevel::Safe => result.safe_files.push(path.clone()),
            }
        }

        log::info!(
            "Deletion validation completed: safe={}, risky={}, blocked={}, warnings={}",
            result.safe_files.len(),
            result.risky_files.len(),
            result.blocked_files.len(),
            result.warnings.len()
        );

        result
    }

    fn is_protected(&self, path: &str) -> bool {
        self.classifier
            .config()
            .system_critical_paths
            .iter()
            .any(|pattern| {
                let prefix = pattern.trim_end_matches('/');
                !prefix.is_empty() && Path::new(path).starts_with(prefix)
            })
    }

    /// Run the registered operation to its terminal state. The caller must
    /// have claimed the slot via [`DeletionService::begin`]; the slot is
    /// released here on terminal transition.
    pub async fn execute(&self, operation_id: &str) {
        let token = CancellationToken::new();
        self.cancel_tokens
            .insert(operation_id.to_string(), token.clone());

        let operation = match self.registry.get(operation_id) {
            Some(operation) => operation,
            None => {
                self.slot.release(operation_id);
                self.cancel_tokens.remove(operation_id);
                return;
            }
        };

        let started = Instant::now();
        let update =
            |f: &dyn Fn(&mut crate::ops::DeletionOperation)| {
                self.registry.update(operation_id, |op| {
                    f(op);
                    op.elapsed_time = started.elapsed().as_nanos() as u64;
                });
            };

        log::info!(
            "Starting deletion operation {} ({} files, force: {}, dry_run: {})",
            operation_id,
            operation.requested_paths.len(),
            operation.force,
            operation.dry_run
        );

        update(&|op| {
            op.status = OperationStatus::Running;
            op.message = "Validating deletion request...".to_string();
        });

        let validation = self.validate_request(&operation.requested_paths, operation.force);
        update(&|op| {
            op.warnings = validation.warnings.clone();
            op.total_size = validation.total_size;
        });

        if !validation.is_safe && !operation.force {
            self.finish(operation_id, OperationStatus::Failed, |op| {
                op.message =
                    "Deletion blocked due to safety concerns. Use force delete to override."
                        .to_string();
                op.skipped_files = op.requested_paths.clone();
            });
            return;
        }

        let files: Vec<String> = if operation.force {
            operation.requested_paths.clone()
        } else {
            validation.safe_files.clone()
        };
        let skipped: Vec<String> = operation
            .requested_paths
            .iter()
            .filter(|path| !files.contains(path))
            .cloned()
            .collect();

        if files.is_empty() {
            self.finish(operation_id, OperationStatus::Completed, |op| {
                op.message = "No files eligible for deletion".to_string();
                op.skipped_files = skipped.clone();
            });
            return;
        }

        update(&|op| {
            op.total_files = files.len();
            op.skipped_files = skipped.clone();
        });

        // Backup phase. Skipping backup requires an explicit force request.
        let session: Option<BackupSession> = if operation.dry_run {
            None
        } else if operation.create_backup {
            update(&|op| op.message = "Creating mandatory backup...".to_string());
            match self.backups.backup_files(&files, &operation.operation) {
                Ok(session) => {
                    update(&|op| {
                        op.backup_session_id = Some(session.session_id.clone());
                        op.message = "Backup completed, starting deletion...".to_string();
                    });
                    Some(session)
                }
                Err(e) => {
                    self.finish(operation_id, OperationStatus::Failed, |op| {
                        op.message = format!("mandatory backup failed: {}", e);
                    });
                    return;
                }
            }
        } else if operation.force {
            None
        } else {
            self.finish(operation_id, OperationStatus::Failed, |op| {
                op.message = "backup is required unless force delete is requested".to_string();
            });
            return;
        };

        // Deletion phase. Each path is removed only after its backup entry
        // succeeded (or the caller forced the deletion). Dry runs verify
        // backup eligibility and skip the unlink.
        for (index, path) in files.iter().enumerate() {
            if RUNTIME_CONFIG.allow_deletion_cancel && token.is_cancelled() {
                self.finish(operation_id, OperationStatus::Cancelled, |op| {
                    op.message = "Deletion cancelled by user".to_string();
                });
                return;
            }

            let backed_up = session.as_ref().map(|session| {
                session
                    .entries
                    .iter()
                    .find(|entry| &entry.original_path == path)
                    .filter(|entry| entry.success)
                    .map(|entry| entry.size)
            });

            let outcome: Result<u64, String> = match (&session, operation.dry_run) {
                // Dry run: prove the file could be backed up, mutate nothing.
                (_, true) => {
                    if operation.force {
                        probe_size(path)
                    } else {
                        backup_eligible(path)
                    }
                }
                (Some(_), false) => match backed_up.flatten() {
                    Some(size) => delete_path(path).map(|_| size),
                    None => Err("skipped: backup did not succeed".to_string()),
                },
                // Forced deletion without backup.
                (None, false) => {
                    let size = probe_size(path).unwrap_or(0);
                    delete_path(path).map(|_| size)
                }
            };

            match outcome {
                Ok(size) => {
                    update(&|op| {
                        op.deleted_files.push(path.clone());
                        op.current_size_processed += size;
                    });
                    log::debug!("Deleted {} ({} bytes)", path, size);
                }
                Err(e) => {
                    update(&|op| {
                        op.failed_files.push(path.clone());
                        op.warnings.push(format!("{}: {}", path, e));
                    });
                    log::warn!("Failed to delete {}: {}", path, e);
                }
            }

            let processed = index + 1;
            let total = files.len();
            update(&|op| {
                op.files_processed = processed;
                op.message = format!("Deleting file {} of {}", processed, total);
            });

            tokio::task::yield_now().await;
        }

        let verb = if operation.dry_run {
            "Dry run completed"
        } else {
            "Deletion completed"
        };
        self.finish(operation_id, OperationStatus::Completed, |op| {
            op.message = format!(
                "{}: {} files deleted, {} failed",
                verb,
                op.deleted_files.len(),
                op.failed_files.len()
            );
        });
    }

    // Terminal transition: the slot is released and the cancel token
    // dropped; the registry entry stays pollable.
    fn finish(
        &self,
        operation_id: &str,
        status: OperationStatus,
        f: impl Fn(&mut crate::ops::DeletionOperation),
    ) {
        self.registry.update(operation_id, |op| {
            op.status = status;
            f(op);
        });
        self.slot.release(operation_id);
        self.cancel_tokens.remove(operation_id);
        log::info!("Deletion operation {} finished: {:?}", operation_id, status);
    }
}

fn delete_path(path: &str) -> Result<(), String> {
    let metadata =
        fs::symlink_metadata(path).map_err(|e| format!("failed to get file info: {}", e))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(|e| format!("failed to remove directory: {}", e))
    } else {
        fs::remove_file(path).map_err(|e| format!("failed to remove file: {}", e))
    }
}

fn probe_size(path: &str) -> Result<u64, String> {
    fs::symlink_metadata(path)
        .map(|metadata| if metadata.is_dir() { 0 } else { metadata.len() })
        .map_err(|e| format!("failed to get file info: {}", e))
}

// A file is backup-eligible when it is a readable regular file.
fn backup_eligible(path: &str) -> Result<u64, String> {
    let metadata =
        fs::symlink_metadata(path).map_err(|e| format!("failed to get file info: {}", e))?;
    if metadata.is_dir() {
        return Err("directories are not backed up".to_string());
    }
    fs::File::open(path).map_err(|e| format!("file is not readable: {}", e))?;
    Ok(metadata.len())
}

#[cfg(unix)]
fn is_deletable(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return false;
    };
    if metadata.mode() & 0o200 == 0 {
        return false;
    }
    match path.parent().and_then(|parent| fs::metadata(parent).ok()) {
        Some(parent) => parent.mode() & 0o200 != 0,
        None => false,
    }
}

#[cfg(not(unix))]
fn is_deletable(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| !metadata.permissions().readonly())
        .unwrap_or(false)
}
