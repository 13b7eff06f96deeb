use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cache_cleaner::{
    App, BackupManager, ConfirmationDialog, DeletionOperation, DeletionService, OperationStatus,
    SafetyClassifier, ScanResult,
};
use lazy_static::lazy_static;
use tempfile::TempDir;

lazy_static! {
    static ref TEST_ENV_GUARD: Mutex<()> = Mutex::new(());
}

struct DeletionTestEnv {
    temp: TempDir,
    prev_backup_dir: Option<String>,
}

impl DeletionTestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let prev_backup_dir = std::env::var("CACHE_CLEANER_BACKUP_DIR").ok();
        std::env::set_var("CACHE_CLEANER_BACKUP_DIR", temp.path().join("backups"));
        DeletionTestEnv {
            temp,
            prev_backup_dir,
        }
    }

    fn create_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.temp.path().join("data").join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write file");
        path
    }

    fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }
}

impl Drop for DeletionTestEnv {
    fn drop(&mut self) {
        if let Some(prev) = self.prev_backup_dir.take() {
            std::env::set_var("CACHE_CLEANER_BACKUP_DIR", prev);
        } else {
            std::env::remove_var("CACHE_CLEANER_BACKUP_DIR");
        }
    }
}

fn acquire_env_guard() -> std::sync::MutexGuard<'static, ()> {
    TEST_ENV_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn paths_json(paths: &[&PathBuf]) -> String {
    let strings: Vec<String> = paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    serde_json::to_string(&strings).expect("paths JSON")
}

async fn start_deletion(
    app: &App,
    files_json: &str,
    create_backup: bool,
    force: bool,
    dry_run: bool,
) -> String {
    let dialog_json = app
        .delete_files_with_confirmation(files_json, "cache_cleanup", false, force)
        .expect("confirmation dialog");
    let response = app
        .confirm_deletion(&dialog_json, files_json, create_backup, force, dry_run)
        .expect("confirm deletion");
    let value: serde_json::Value = serde_json::from_str(&response).expect("response JSON");
    assert_eq!(value["status"], "started");
    value["operation_id"]
        .as_str()
        .expect("operation id")
        .to_string()
}

async fn wait_for_terminal(app: &App, operation_id: &str) -> DeletionOperation {
    for _ in 0..500 {
        let raw = app
            .get_deletion_progress(operation_id)
            .expect("deletion progress");
        let operation: DeletionOperation = serde_json::from_str(&raw).expect("progress JSON");
        if operation.status.is_terminal() {
            return operation;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("deletion did not reach a terminal state in time");
}

async fn wait_for_scan(app: &App) -> ScanResult {
    for _ in 0..500 {
        if !app.is_scanning() {
            let raw = app.get_last_scan_result().expect("last scan result");
            return serde_json::from_str(&raw).expect("scan result JSON");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan did not finish in time");
}

#[tokio::test]
async fn confirmed_deletion_backs_up_then_deletes() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("stale.cache", b"stale cache contents");
    let app = App::new().expect("app");

    // Scan first so the last-scan invariant can be checked afterwards.
    app.scan_cache_location("data", "Data", &env.data_dir().to_string_lossy())
        .expect("scan ack");
    let scan_before = wait_for_scan(&app).await;
    assert_eq!(scan_before.file_count, 1);

    let files = paths_json(&[&target]);
    let operation_id = start_deletion(&app, &files, true, false, false).await;
    let operation = wait_for_terminal(&app, &operation_id).await;

    assert_eq!(operation.status, OperationStatus::Completed);
    assert_eq!(operation.deleted_files.len(), 1);
    assert_eq!(operation.failed_files.len(), 0);
    assert_eq!(operation.files_processed, 1);
    assert!(operation.current_size_processed > 0);
    assert!(!target.exists(), "file must be deleted");

    // Backup-before-delete: a successful session entry covers the path.
    let session_id = operation.backup_session_id.expect("backup session id");
    let details_raw = app
        .get_backup_session_details(&session_id)
        .expect("session details");
    let details: serde_json::Value = serde_json::from_str(&details_raw).expect("details JSON");
    assert_eq!(details["integrity_valid"], true);
    assert_eq!(details["session"]["success_count"], 1);
    assert_eq!(details["can_restore"], true);

    // Deletion does not invalidate the last scan result.
    let scan_after = wait_for_scan(&app).await;
    assert_eq!(scan_after.id, scan_before.id);
    assert_eq!(scan_after.file_count, 1);

    // Restore brings the file back with identical contents.
    app.restore_from_backup(&session_id, false)
        .expect("restore");
    assert_eq!(
        fs::read(&target).expect("read restored"),
        b"stale cache contents"
    );
}

#[tokio::test]
async fn backup_failure_skips_deletion_of_that_path() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let one = env.create_file("one.cache", b"one");
    let two = env.create_file("two.cache", b"two");
    // Directories are not backed up, so this path must survive un-forced.
    let dir = env.data_dir().join("subcache");
    fs::create_dir_all(&dir).expect("create dir");

    let app = App::new().expect("app");
    let files = paths_json(&[&one, &two, &dir]);
    let operation_id = start_deletion(&app, &files, true, false, false).await;
    let operation = wait_for_terminal(&app, &operation_id).await;

    assert_eq!(operation.status, OperationStatus::Completed);
    assert_eq!(operation.deleted_files.len(), 2);
    assert_eq!(operation.failed_files.len(), 1);
    assert!(!one.exists());
    assert!(!two.exists());
    assert!(dir.exists(), "path without successful backup must remain");

    let session_id = operation.backup_session_id.expect("session id");
    let details_raw = app
        .get_backup_session_details(&session_id)
        .expect("session details");
    let details: serde_json::Value = serde_json::from_str(&details_raw).expect("details JSON");
    assert_eq!(details["session"]["total_files"], 3);
    assert_eq!(details["session"]["success_count"], 2);
    assert_eq!(details["session"]["failure_count"], 1);
}

#[tokio::test]
async fn dry_run_performs_no_mutation() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("keep.cache", b"keep me");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let operation_id = start_deletion(&app, &files, true, false, true).await;
    let operation = wait_for_terminal(&app, &operation_id).await;

    assert_eq!(operation.status, OperationStatus::Completed);
    assert!(operation.dry_run);
    assert_eq!(operation.deleted_files.len(), 1, "reports what would happen");
    assert!(target.exists(), "dry run must not delete");
    assert!(operation.backup_session_id.is_none());
    assert!(operation.message.contains("Dry run"));

    // No backup session was written either.
    let sessions = app.get_available_backups().expect("sessions");
    let sessions: serde_json::Value = serde_json::from_str(&sessions).expect("sessions JSON");
    assert_eq!(sessions.as_array().map(|a| a.len()), Some(0));
}

#[tokio::test]
async fn force_delete_skips_backup() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("forced.cache", b"forced");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let operation_id = start_deletion(&app, &files, false, true, false).await;
    let operation = wait_for_terminal(&app, &operation_id).await;

    assert_eq!(operation.status, OperationStatus::Completed);
    assert!(!target.exists());
    assert!(operation.backup_session_id.is_none());
}

#[tokio::test]
async fn unforced_deletion_requires_backup() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("guarded.cache", b"guarded");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let dialog_json = app
        .delete_files_with_confirmation(&files, "cache_cleanup", false, false)
        .expect("dialog");
    let err = app
        .confirm_deletion(&dialog_json, &files, false, false, false)
        .expect_err("skipping backup without force must fail");
    assert!(err.contains("backup is required"), "unexpected error: {}", err);
    assert!(target.exists());
}

#[tokio::test]
async fn expired_dialog_is_rejected() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("expired.cache", b"expired");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let dialog_json = app
        .delete_files_with_confirmation(&files, "cache_cleanup", false, false)
        .expect("dialog");
    let mut dialog: ConfirmationDialog =
        serde_json::from_str(&dialog_json).expect("dialog JSON");
    dialog.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
    let stale = serde_json::to_string(&dialog).expect("dialog JSON");

    let err = app
        .confirm_deletion(&stale, &files, true, false, false)
        .expect_err("expired dialog must be rejected");
    assert!(err.contains("expired"), "unexpected error: {}", err);
    assert!(target.exists());
}

#[tokio::test]
async fn auto_confirm_starts_the_operation_immediately() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("auto.cache", b"auto");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let response = app
        .delete_files_with_confirmation(&files, "cache_cleanup", true, false)
        .expect("auto-confirmed deletion");
    let value: serde_json::Value = serde_json::from_str(&response).expect("response JSON");
    assert_eq!(value["status"], "started");
    let operation_id = value["operation_id"].as_str().expect("operation id");

    let operation = wait_for_terminal(&app, operation_id).await;
    assert_eq!(operation.status, OperationStatus::Completed);
    assert!(!target.exists());
}

#[tokio::test]
async fn terminal_progress_stays_pollable() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("late-poll.cache", b"late");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let operation_id = start_deletion(&app, &files, true, false, false).await;
    wait_for_terminal(&app, &operation_id).await;

    // A late poller still observes the terminal outcome.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let raw = app
        .get_deletion_progress(&operation_id)
        .expect("late progress poll");
    let operation: DeletionOperation = serde_json::from_str(&raw).expect("progress JSON");
    assert_eq!(operation.status, OperationStatus::Completed);
}

#[tokio::test]
async fn unknown_operation_id_is_an_immediate_error() {
    let _guard = acquire_env_guard();
    let _env = DeletionTestEnv::new();
    let app = App::new().expect("app");
    let err = app
        .get_deletion_progress("deletion_nonexistent")
        .expect_err("unknown id");
    assert!(err.contains("not found"));
}

#[tokio::test]
async fn deletion_slot_rejects_concurrent_operations() {
    let _guard = acquire_env_guard();
    let _env = DeletionTestEnv::new();
    let backups = Arc::new(BackupManager::new().expect("backup manager"));
    let service = DeletionService::new(backups, SafetyClassifier::default());

    service.begin("deletion_a").expect("first slot claim");
    let err = service
        .begin("deletion_b")
        .expect_err("second deletion must be rejected");
    assert!(err.contains("already in progress"), "unexpected error: {}", err);
}

#[tokio::test]
async fn stop_deletion_is_disabled_by_default() {
    let _guard = acquire_env_guard();
    let env = DeletionTestEnv::new();
    let target = env.create_file("running.cache", b"running");
    let app = App::new().expect("app");

    let files = paths_json(&[&target]);
    let operation_id = start_deletion(&app, &files, true, false, false).await;

    let err = app
        .stop_deletion(&operation_id)
        .expect_err("cancellation is configuration-gated");
    assert!(err.contains("disabled"), "unexpected error: {}", err);

    let operation = wait_for_terminal(&app, &operation_id).await;
    assert_eq!(operation.status, OperationStatus::Completed);
}
