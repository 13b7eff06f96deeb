use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::types::{FileEntry, LocationScan, ScanProgress, ScanResult, ScanTarget};
use crate::config::{expand_tilde, RUNTIME_CONFIG};
use crate::safety::SafetyClassifier;

const CANCELLED: &str = "scan cancelled";

struct ScanHandle {
    id: String,
    token: CancellationToken,
}

/// Read-only metadata scanner for configured cache locations.
///
/// Exactly one scan may be in flight at a time: the in-flight scan is an
/// owned slot, acquired on start and released only on terminal transition.
/// Cancellation is cooperative, checked at entry boundaries.
pub struct CacheScanner {
    classifier: SafetyClassifier,
    state: Mutex<Option<ScanHandle>>,
    progress: RwLock<Option<ScanProgress>>,
}

impl CacheScanner {
    pub fn new(classifier: SafetyClassifier) -> Self {
        CacheScanner {
            classifier,
            state: Mutex::new(None),
            progress: RwLock::new(None),
        }
    }

    pub fn classifier(&self) -> &SafetyClassifier {
        &self.classifier
    }

    pub fn is_scanning(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    /// Claim the scan slot. Rejected while another scan is in flight.
    pub fn begin_scan(&self) -> Result<(String, CancellationToken), String> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.is_some() {
            return Err("scan already in progress".to_string());
        }
        let id = uuid::Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        *state = Some(ScanHandle {
            id: id.clone(),
            token: token.clone(),
        });
        Ok((id, token))
    }

    /// Release the scan slot after the scan reached a terminal state.
    pub fn finish_scan(&self, id: &str) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.as_ref().map(|handle| handle.id.as_str()) == Some(id) {
            *state = None;
        }
        if let Ok(mut progress) = self.progress.write() {
            *progress = None;
        }
    }

    /// Request cooperative cancellation of the in-flight scan.
    pub fn stop_scan(&self) -> Result<(), String> {
        let state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match state.as_ref() {
            Some(handle) => {
                handle.token.cancel();
                log::info!("Scan stop requested for {}", handle.id);
                Ok(())
            }
            None => Err("no scan in progress".to_string()),
        }
    }

    pub fn current_progress(&self) -> Option<ScanProgress> {
        self.progress.read().ok().and_then(|guard| guard.clone())
    }

    fn publish_progress(&self, progress: ScanProgress) {
        if let Ok(mut guard) = self.progress.write() {
            *guard = Some(progress);
        }
    }

    /// Scan a single location. Unreadable entries are recorded per-file and
    /// never abort the walk; the filesystem is not mutated.
    pub async fn scan_location(
        &self,
        location: &ScanTarget,
        token: &CancellationToken,
    ) -> LocationScan {
        let started = Instant::now();
        let mut scan = LocationScan {
            id: location.id.clone(),
            name: location.name.clone(),
            path: location.path.clone(),
            total_size: 0,
            file_count: 0,
            dir_count: 0,
            error_count: 0,
            files: Vec::new(),
            error: None,
            scan_duration: 0,
        };

        let root = match expand_tilde(&location.path) {
            Ok(root) => root,
            Err(e) => {
                scan.error = Some(format!("Failed to expand path {}: {}", location.path, e));
                scan.scan_duration = started.elapsed().as_nanos() as u64;
                return scan;
            }
        };
        if !root.exists() {
            scan.error = Some(format!("Path does not exist: {}", root.display()));
            scan.scan_duration = started.elapsed().as_nanos() as u64;
            return scan;
        }

        // Size the walk first so progress can report a percentage.
        let total_entries = match count_entries(&root, token) {
            Ok(count) => count,
            Err(_) => {
                scan.error = Some(CANCELLED.to_string());
                scan.scan_duration = started.elapsed().as_nanos() as u64;
                return scan;
            }
        };

        let interval = RUNTIME_CONFIG.progress_interval.max(1);
        let mut scanned = 0usize;

        for entry in WalkDir::new(&root) {
            if token.is_cancelled() {
                scan.error = Some(CANCELLED.to_string());
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err
                        .path()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_default();
                    log::warn!("Skipping unreadable entry {}: {}", path, err);
                    scan.files.push(unreadable_entry(path, err.to_string()));
                    scan.error_count += 1;
                    scanned += 1;
                    continue;
                }
            };

            let file_entry = match entry.metadata() {
                Ok(metadata) => {
                    let mut file_entry = build_entry(&entry, &metadata);
                    if !file_entry.is_dir {
                        file_entry.safety = Some(self.classifier.classify(&file_entry));
                        scan.file_count += 1;
                        scan.total_size += file_entry.size;
                    } else {
                        scan.dir_count += 1;
                    }
                    file_entry
                }
                Err(err) => {
                    scan.error_count += 1;
                    unreadable_entry(
                        entry.path().to_string_lossy().to_string(),
                        format!("Failed to get file info: {}", err),
                    )
                }
            };
            scan.files.push(file_entry);
            scanned += 1;

            if scanned % interval == 0 {
                self.publish_progress(ScanProgress {
                    location_id: location.id.clone(),
                    location_name: location.name.clone(),
                    current_path: entry.path().to_string_lossy().to_string(),
                    files_scanned: scanned,
                    total_files: total_entries,
                    progress: percentage(scanned, total_entries),
                    elapsed_time: started.elapsed().as_nanos() as u64,
                });
                tokio::task::yield_now().await;
            }
        }

        scan.scan_duration = started.elapsed().as_nanos() as u64;
        scan
    }

    /// Scan several locations concurrently, bounded by
    /// `RuntimeConfig.max_parallel_scans`, and aggregate the results.
    pub async fn scan_locations(
        self: Arc<Self>,
        scan_id: String,
        locations: Vec<ScanTarget>,
        token: CancellationToken,
    ) -> ScanResult {
        let started = Instant::now();
        let permits = RUNTIME_CONFIG.max_parallel_scans.max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut tasks: JoinSet<Option<LocationScan>> = JoinSet::new();

        for location in locations {
            let scanner = Arc::clone(&self);
            let token = token.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                Some(scanner.scan_location(&location, &token).await)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(location)) => results.push(location),
                Ok(None) => {}
                Err(err) => log::warn!("Location scan task failed: {}", err),
            }
        }

        let error = token.is_cancelled().then(|| CANCELLED.to_string());
        ScanResult::aggregate(
            scan_id,
            results,
            started.elapsed().as_nanos() as u64,
            error,
        )
    }
}

/// Build a [`FileEntry`] for a single path outside of a scan, e.g. for
/// ad hoc classification or pre-deletion validation.
pub(crate) fn probe_file(path: &Path) -> Result<FileEntry, String> {
    let metadata = fs::symlink_metadata(path)
        .map_err(|e| format!("failed to get file info for {}: {}", path.display(), e))?;
    Ok(FileEntry {
        path: path.to_string_lossy().to_string(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        is_dir: metadata.is_dir(),
        is_symlink: metadata.file_type().is_symlink(),
        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        last_accessed: metadata.accessed().ok().map(DateTime::<Utc>::from),
        permissions: format_permissions(&metadata),
        error: None,
        safety: None,
    })
}

fn build_entry(entry: &walkdir::DirEntry, metadata: &fs::Metadata) -> FileEntry {
    FileEntry {
        path: entry.path().to_string_lossy().to_string(),
        name: entry.file_name().to_string_lossy().to_string(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        is_dir: metadata.is_dir(),
        is_symlink: entry.path_is_symlink(),
        last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        last_accessed: metadata.accessed().ok().map(DateTime::<Utc>::from),
        permissions: format_permissions(metadata),
        error: None,
        safety: None,
    }
}

fn unreadable_entry(path: String, error: String) -> FileEntry {
    let name = Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    FileEntry {
        path,
        name,
        size: 0,
        is_dir: false,
        is_symlink: false,
        last_modified: None,
        last_accessed: None,
        permissions: String::new(),
        error: Some(error),
        safety: None,
    }
}

// Counting pass: unreadable entries are skipped here and surface during the
// real walk instead.
fn count_entries(root: &Path, token: &CancellationToken) -> Result<usize, ()> {
    let mut count = 0usize;
    for _ in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        count += 1;
        if count % 256 == 0 && token.is_cancelled() {
            return Err(());
        }
    }
    Ok(count)
}

fn percentage(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64) * 100.0
}

#[cfg(unix)]
fn format_permissions(metadata: &fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    let mode = metadata.permissions().mode();
    let mut out = String::with_capacity(9);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    out
}

#[cfg(not(unix))]
fn format_permissions(metadata: &fs::Metadata) -> String {
    if metadata.permissions().readonly() {
        "r--r--r--".to_string()
    } else {
        "rw-rw-rw-".to_string()
    }
}
