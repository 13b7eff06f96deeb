use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::backup::{BackupManager, RestoreManager};
use crate::config::{expand_tilde, load_cache_locations, RUNTIME_CONFIG};
use crate::deletion::{ConfirmationDialog, ConfirmationService, DeletionService};
use crate::ops::{DeletionMode, DeletionOperation};
use crate::safety::{load_classification_config, SafetyClassifier};
use crate::scanner::{probe_file, CacheScanner, ScanResult, ScanTarget};

/// The UI-facing boundary: request/response calls that accept and return
/// JSON-encoded payloads. Long operations follow start → immediate ack →
/// repeated status poll → terminal state.
pub struct App {
    scanner: Arc<CacheScanner>,
    last_scan: Arc<RwLock<Option<ScanResult>>>,
    backups: Arc<BackupManager>,
    restorer: RestoreManager,
    deletion: Arc<DeletionService>,
    confirmations: ConfirmationService,
}

impl App {
    pub fn new() -> Result<Self, String> {
        let classifier_config = load_classification_config()?;
        let backups = Arc::new(BackupManager::new()?);

        Ok(App {
            scanner: Arc::new(CacheScanner::new(SafetyClassifier::new(
                classifier_config.clone(),
            ))),
            last_scan: Arc::new(RwLock::new(None)),
            restorer: RestoreManager::new(Arc::clone(&backups)),
            deletion: Arc::new(DeletionService::new(
                Arc::clone(&backups),
                SafetyClassifier::new(classifier_config),
            )),
            backups,
            confirmations: ConfirmationService::new(),
        })
    }

    // ---- Scanning ----

    /// Start scanning a single cache location in the background and return
    /// immediately. Rejected while another scan is in flight.
    pub fn scan_cache_location(&self, id: &str, name: &str, path: &str) -> Result<String, String> {
        log::info!("Starting scan of location: {} ({})", name, path);
        self.spawn_scan(vec![ScanTarget {
            id: id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
        }])
    }

    /// Start scanning several locations concurrently; the aggregated result
    /// lands in the last-scan slot.
    pub fn scan_multiple_cache_locations(&self, locations_json: &str) -> Result<String, String> {
        let targets: Vec<ScanTarget> = serde_json::from_str(locations_json)
            .map_err(|e| format!("invalid locations JSON: {}", e))?;
        log::info!("Starting scan of {} locations", targets.len());
        self.spawn_scan(targets)
    }

    fn spawn_scan(&self, targets: Vec<ScanTarget>) -> Result<String, String> {
        let (scan_id, token) = self.scanner.begin_scan()?;

        let scanner = Arc::clone(&self.scanner);
        let last_scan = Arc::clone(&self.last_scan);
        tokio::spawn(async move {
            let started = Instant::now();
            let timeout = Duration::from_secs(RUNTIME_CONFIG.scan_timeout_secs);
            let result = match tokio::time::timeout(
                timeout,
                Arc::clone(&scanner).scan_locations(scan_id.clone(), targets, token.clone()),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    // Authoritative backend timeout; the client no longer has
                    // to guess when a scan went stale.
                    token.cancel();
                    log::warn!(
                        "Scan {} timed out after {} seconds",
                        scan_id,
                        RUNTIME_CONFIG.scan_timeout_secs
                    );
                    ScanResult::aggregate(
                        scan_id.clone(),
                        Vec::new(),
                        started.elapsed().as_nanos() as u64,
                        Some(format!(
                            "scan timed out after {} seconds",
                            RUNTIME_CONFIG.scan_timeout_secs
                        )),
                    )
                }
            };

            log::info!(
                "Completed scan {} (files: {}, size: {} bytes)",
                result.id,
                result.file_count,
                result.total_size
            );

            if let Ok(mut slot) = last_scan.write() {
                *slot = Some(result);
            }
            scanner.finish_scan(&scan_id);
        });

        Ok(json!({"status": "scan_started", "message": "Scan started in background"}).to_string())
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Request cooperative cancellation of the in-flight scan.
    pub fn stop_scan(&self) -> Result<(), String> {
        self.scanner.stop_scan()
    }

    pub fn get_scan_progress(&self) -> Result<String, String> {
        if !self.scanner.is_scanning() {
            return Err("no scan in progress".to_string());
        }
        match self.scanner.current_progress() {
            Some(progress) => to_json(&progress),
            None => Ok(json!({"status": "scanning"}).to_string()),
        }
    }

    /// The result of the last completed scan. Deletions do not invalidate
    /// it; only the next scan overwrites it.
    pub fn get_last_scan_result(&self) -> Result<String, String> {
        let slot = self
            .last_scan
            .read()
            .map_err(|_| "scan result unavailable".to_string())?;
        match slot.as_ref() {
            Some(result) => to_json(result),
            None => {
                Ok(json!({"status": "no_result", "message": "No scan result available"}).to_string())
            }
        }
    }

    pub fn get_cache_locations_from_config(&self) -> Result<String, String> {
        let locations = load_cache_locations()?;
        to_json(&locations)
    }

    // ---- Classification ----

    pub fn classify_file_safety(&self, file_path: &str) -> Result<String, String> {
        let entry = probe_file(Path::new(file_path))?;
        let classification = self.scanner.classifier().classify(&entry);
        to_json(&classification)
    }

    pub fn get_safety_classification_rules(&self) -> Result<String, String> {
        to_json(self.scanner.classifier().config())
    }

    // ---- Deletion ----

    pub fn validate_files_for_deletion(
        &self,
        files_json: &str,
        operation: &str,
    ) -> Result<String, String> {
        let files = parse_paths(files_json)?;
        log::info!(
            "Validating {} files for deletion (operation: {})",
            files.len(),
            operation
        );
        let result = self.deletion.validate_request(&files, false);
        to_json(&result)
    }

    /// Validate the request and build the confirmation dialog. With
    /// `auto_confirm`, the deletion is started immediately and the response
    /// carries the operation id alongside the dialog.
    pub fn delete_files_with_confirmation(
        &self,
        files_json: &str,
        operation: &str,
        auto_confirm: bool,
        force: bool,
    ) -> Result<String, String> {
        let files = parse_paths(files_json)?;
        let validation = self.deletion.validate_request(&files, force);
        let dialog = self
            .confirmations
            .create_dialog(operation, &files, &validation, force, false);

        if !auto_confirm {
            return to_json(&dialog);
        }

        let operation_id = self.start_deletion(operation, files, true, force, false)?;
        Ok(json!({
            "dialog": dialog,
            "operation_id": operation_id,
            "status": "started",
        })
        .to_string())
    }

    /// Confirm a previously issued dialog and start the asynchronous
    /// deletion. Expired dialogs are rejected.
    pub fn confirm_deletion(
        &self,
        dialog_json: &str,
        files_json: &str,
        create_backup: bool,
        force: bool,
        dry_run: bool,
    ) -> Result<String, String> {
        let dialog: ConfirmationDialog =
            serde_json::from_str(dialog_json).map_err(|e| format!("invalid dialog JSON: {}", e))?;
        self.confirmations.validate_dialog(&dialog)?;

        let files = parse_paths(files_json)?;
        let operation_id =
            self.start_deletion(&dialog.operation, files, create_backup, force, dry_run)?;
        Ok(json!({"operation_id": operation_id, "status": "started"}).to_string())
    }

    fn start_deletion(
        &self,
        operation: &str,
        files: Vec<String>,
        create_backup: bool,
        force: bool,
        dry_run: bool,
    ) -> Result<String, String> {
        // Skipping the backup-before-delete guarantee requires an explicit
        // force request.
        if !create_backup && !force {
            return Err("backup is required unless force delete is requested".to_string());
        }

        // Trim stale terminal operations before registering a new one.
        self.deletion
            .registry()
            .cleanup_completed(chrono::Duration::days(1));

        let operation_id = format!("deletion_{}", uuid::Uuid::new_v4());
        self.deletion.begin(&operation_id)?;
        self.deletion.registry().insert(DeletionOperation::new(
            operation_id.clone(),
            operation.to_string(),
            DeletionMode::Confirmed,
            files,
            force,
            dry_run,
            create_backup,
        ));

        log::info!(
            "Starting deletion {} (operation: {}, force: {}, dry_run: {})",
            operation_id,
            operation,
            force,
            dry_run
        );

        let service = Arc::clone(&self.deletion);
        let id = operation_id.clone();
        tokio::spawn(async move {
            service.execute(&id).await;
        });

        Ok(operation_id)
    }

    /// Progress of a deletion operation. Terminal states keep reporting the
    /// outcome, so a late poller still observes it.
    pub fn get_deletion_progress(&self, operation_id: &str) -> Result<String, String> {
        match self.deletion.registry().get(operation_id) {
            Some(operation) => to_json(&operation),
            None => Err(format!("operation not found: {}", operation_id)),
        }
    }

    /// Cancellation of a confirmed deletion is configuration-gated; see
    /// `RuntimeConfig.allow_deletion_cancel`.
    pub fn stop_deletion(&self, operation_id: &str) -> Result<String, String> {
        self.deletion.stop(operation_id)?;
        Ok(json!({"status": "cancellation_requested", "operation_id": operation_id}).to_string())
    }

    // ---- Backup browsing & restore ----

    pub fn get_available_backups(&self) -> Result<String, String> {
        let sessions = self.backups.list_sessions()?;
        to_json(&sessions)
    }

    pub fn get_backup_browser_data(&self) -> Result<String, String> {
        let manifest = self.backups.get_manifest()?;

        let oldest = manifest.sessions.iter().map(|s| s.start_time).min();
        let newest = manifest.sessions.iter().map(|s| s.start_time).max();

        Ok(json!({
            "sessions": manifest.sessions,
            "summary": {
                "total_sessions": manifest.total_sessions,
                "total_files": manifest.total_files,
                "total_size": manifest.total_size,
                "oldest_session": oldest,
                "newest_session": newest,
            },
        })
        .to_string())
    }

    pub fn get_backup_session_details(&self, session_id: &str) -> Result<String, String> {
        let session = self.backups.get_session(session_id)?;
        let (integrity_valid, integrity_errors) = self.backups.verify_integrity(session_id)?;
        let restoreable_files: Vec<&str> = session
            .entries
            .iter()
            .filter(|entry| entry.success)
            .map(|entry| entry.original_path.as_str())
            .collect();
        let can_restore = !restoreable_files.is_empty();

        Ok(json!({
            "session": session,
            "integrity_valid": integrity_valid,
            "integrity_errors": integrity_errors,
            "restoreable_files": restoreable_files,
            "can_restore": can_restore,
        })
        .to_string())
    }

    /// Read-only restore preview; reports conflicts without writing.
    pub fn preview_restore_operation(
        &self,
        session_id: &str,
        files_json: &str,
    ) -> Result<String, String> {
        let subset = parse_optional_paths(files_json)?;
        let preview = self.restorer.preview(session_id, subset.as_deref())?;
        to_json(&preview)
    }

    pub fn restore_from_backup(&self, session_id: &str, overwrite: bool) -> Result<String, String> {
        let result = self.restorer.restore(session_id, None, overwrite, false)?;
        to_json(&result)
    }

    /// Restore with options: an optional subset, and optionally a
    /// `pre_restore` backup of targets that will be overwritten.
    pub fn restore_from_backup_with_options(
        &self,
        session_id: &str,
        files_json: &str,
        overwrite: bool,
        create_backup: bool,
    ) -> Result<String, String> {
        let subset = parse_optional_paths(files_json)?;
        let result = self
            .restorer
            .restore(session_id, subset.as_deref(), overwrite, create_backup)?;
        to_json(&result)
    }

    /// Delete a backup session and its stored copies. Fails loudly while an
    /// active restore holds the session.
    pub fn delete_backup_session(&self, session_id: &str) -> Result<String, String> {
        let session = self.backups.delete_session(session_id)?;
        Ok(json!({
            "status": "success",
            "session_id": session_id,
            "deleted_at": chrono::Utc::now(),
            "session_info": {
                "operation": session.operation,
                "total_files": session.total_files,
                "total_size": session.total_size,
                "created_at": session.start_time,
            },
        })
        .to_string())
    }

    /// Irreversibly delete sessions older than the cutoff.
    pub fn cleanup_backups_by_age(&self, older_than_days: i64) -> Result<String, String> {
        let deleted_count = self.backups.cleanup_by_age(older_than_days)?;
        Ok(json!({
            "status": "completed",
            "older_than_days": older_than_days,
            "deleted_count": deleted_count,
        })
        .to_string())
    }

    // ---- Desktop-shell collaborator ----

    /// Reveal a path in the macOS Finder.
    #[cfg(target_os = "macos")]
    pub async fn reveal_in_finder(&self, file_path: &str) -> Result<String, String> {
        let expanded = expand_tilde(file_path)?;
        if !expanded.exists() {
            return Err(format!(
                "file or folder does not exist: {}",
                expanded.display()
            ));
        }

        let output = tokio::process::Command::new("open")
            .arg("-R")
            .arg(&expanded)
            .output()
            .await
            .map_err(|e| format!("failed to reveal file in Finder: {}", e))?;
        if !output.status.success() {
            return Err(format!(
                "failed to reveal file in Finder (status: {:?}): {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr)
            ));
        }

        Ok(json!({
            "status": "success",
            "message": format!("Revealed {} in Finder", expanded.display()),
            "path": expanded.to_string_lossy(),
        })
        .to_string())
    }

    #[cfg(not(target_os = "macos"))]
    pub async fn reveal_in_finder(&self, file_path: &str) -> Result<String, String> {
        let _ = expand_tilde(file_path)?;
        Err("reveal in file manager is only supported on macOS".to_string())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("failed to serialize response: {}", e))
}

fn parse_paths(files_json: &str) -> Result<Vec<String>, String> {
    serde_json::from_str(files_json).map_err(|e| format!("invalid files JSON: {}", e))
}

// An empty string or empty array means "no subset".
fn parse_optional_paths(files_json: &str) -> Result<Option<Vec<String>>, String> {
    if files_json.trim().is_empty() {
        return Ok(None);
    }
    let paths = parse_paths(files_json)?;
    Ok((!paths.is_empty()).then_some(paths))
}
