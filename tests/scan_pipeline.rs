use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use cache_cleaner::{App, CacheScanner, SafetyClassifier, ScanResult};
use lazy_static::lazy_static;
use tempfile::TempDir;

lazy_static! {
    static ref TEST_ENV_GUARD: Mutex<()> = Mutex::new(());
}

struct ScanTestEnv {
    temp: TempDir,
    prev_backup_dir: Option<String>,
}

impl ScanTestEnv {
    fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let prev_backup_dir = std::env::var("CACHE_CLEANER_BACKUP_DIR").ok();
        std::env::set_var("CACHE_CLEANER_BACKUP_DIR", temp.path().join("backups"));
        ScanTestEnv {
            temp,
            prev_backup_dir,
        }
    }
}

impl Drop for ScanTestEnv {
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
async fn scan_collects_metadata_and_classifies_files() {
    let _guard = acquire_env_guard();
    let env = ScanTestEnv::new();
    let root = env.temp.path().join("location");
    fs::create_dir_all(root.join("nested")).expect("create dirs");
    fs::write(root.join("one.cache"), vec![0u8; 2048]).expect("write one");
    fs::write(root.join("nested/two.log"), vec![0u8; 1024]).expect("write two");

    let app = App::new().expect("app");
    let ack = app
        .scan_cache_location("test-loc", "Test Location", &root.to_string_lossy())
        .expect("scan ack");
    assert!(ack.contains("scan_started"));

    let result = wait_for_scan(&app).await;
    assert_eq!(result.locations.len(), 1);
    assert_eq!(result.file_count, 2);
    assert_eq!(result.total_size, 3072);
    assert!(result.dir_count >= 2, "root and nested directory");
    assert!(result.error.is_none());

    let location = &result.locations[0];
    assert_eq!(location.id, "test-loc");
    for entry in location.files.iter().filter(|f| !f.is_dir) {
        assert!(
            entry.safety.is_some(),
            "files must be classified: {}",
            entry.path
        );
        assert!(entry.last_modified.is_some());
        assert!(!entry.permissions.is_empty());
    }
    // Directories are not classified.
    for entry in location.files.iter().filter(|f| f.is_dir) {
        assert!(entry.safety.is_none());
    }
}

#[tokio::test]
async fn scan_multiple_locations_aggregates() {
    let _guard = acquire_env_guard();
    let env = ScanTestEnv::new();
    let first = env.temp.path().join("first");
    let second = env.temp.path().join("second");
    fs::create_dir_all(&first).expect("create first");
    fs::create_dir_all(&second).expect("create second");
    fs::write(first.join("a.cache"), vec![0u8; 100]).expect("write a");
    fs::write(second.join("b.cache"), vec![0u8; 200]).expect("write b");

    let app = App::new().expect("app");
    let locations = serde_json::json!([
        {"id": "first", "name": "First", "path": first.to_string_lossy()},
        {"id": "second", "name": "Second", "path": second.to_string_lossy()},
    ])
    .to_string();
    app.scan_multiple_cache_locations(&locations)
        .expect("scan ack");

    let result = wait_for_scan(&app).await;
    assert_eq!(result.locations.len(), 2);
    assert_eq!(result.file_count, 2);
    assert_eq!(result.total_size, 300);
    // Aggregation order is stable regardless of completion order.
    assert_eq!(result.locations[0].id, "first");
    assert_eq!(result.locations[1].id, "second");
}

#[tokio::test]
async fn missing_path_is_a_location_error_not_a_failure() {
    let _guard = acquire_env_guard();
    let env = ScanTestEnv::new();
    let missing = env.temp.path().join("does-not-exist");

    let app = App::new().expect("app");
    app.scan_cache_location("missing", "Missing", &missing.to_string_lossy())
        .expect("scan ack");

    let result = wait_for_scan(&app).await;
    assert_eq!(result.file_count, 0);
    let location = &result.locations[0];
    assert!(location
        .error
        .as_deref()
        .is_some_and(|e| e.contains("does not exist")));
}

#[test]
fn second_scan_is_rejected_while_one_is_in_flight() {
    let scanner = CacheScanner::new(SafetyClassifier::default());

    let (id, _token) = scanner.begin_scan().expect("first scan slot");
    let err = scanner.begin_scan().expect_err("second scan must be rejected");
    assert!(err.contains("already in progress"), "unexpected error: {}", err);

    scanner.finish_scan(&id);
    scanner.begin_scan().expect("slot free after terminal transition");
}

#[tokio::test]
async fn stop_scan_without_active_scan_is_an_error() {
    let _guard = acquire_env_guard();
    let _env = ScanTestEnv::new();
    let app = App::new().expect("app");
    let err = app.stop_scan().expect_err("no scan to stop");
    assert!(err.contains("no scan in progress"));
}

#[tokio::test]
async fn cancelled_scan_reports_cancellation() {
    let scanner = std::sync::Arc::new(CacheScanner::new(SafetyClassifier::default()));
    let temp = TempDir::new().expect("temp dir");
    for i in 0..50 {
        fs::write(temp.path().join(format!("file-{}.cache", i)), b"x").expect("write");
    }

    let (id, token) = scanner.begin_scan().expect("scan slot");
    token.cancel();
    let result = scanner
        .clone()
        .scan_locations(
            id.clone(),
            vec![cache_cleaner::ScanTarget {
                id: "loc".into(),
                name: "Loc".into(),
                path: temp.path().to_string_lossy().into_owned(),
            }],
            token,
        )
        .await;
    scanner.finish_scan(&id);

    assert!(result
        .error
        .as_deref()
        .is_some_and(|e| e.contains("cancelled")));
}
