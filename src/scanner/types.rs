use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::safety::SafetyClassification;

/// A location to scan: a configured [`crate::config::CacheLocation`] or an
/// ad hoc id/name/path triple supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTarget {
    pub id: String,
    pub name: String,
    pub path: String,
}

/// Metadata for a single scanned file or directory.
///
/// Produced fresh on each scan and never mutated afterwards; a rescan
/// produces new values. Unreadable entries carry `error` instead of metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    #[serde(default)]
    pub is_symlink: bool,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub permissions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyClassification>,
}

/// Scan outcome for one cache location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationScan {
    pub id: String,
    pub name: String,
    pub path: String,
    pub total_size: u64,
    pub file_count: usize,
    pub dir_count: usize,
    pub error_count: usize,
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Nanoseconds.
    pub scan_duration: u64,
}

/// Aggregated result of a scan across one or more locations. One result is
/// retained as the "last scan result" and overwritten by the next scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub id: String,
    pub locations: Vec<LocationScan>,
    pub file_count: usize,
    pub dir_count: usize,
    pub error_count: usize,
    pub total_size: u64,
    /// Nanoseconds.
    pub scan_duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanResult {
    pub fn aggregate(
        id: String,
        mut locations: Vec<LocationScan>,
        scan_duration: u64,
        error: Option<String>,
    ) -> Self {
        // Completion order of concurrent location scans is not stable.
        locations.sort_by(|a, b| a.id.cmp(&b.id));

        let mut result = ScanResult {
            id,
            locations: Vec::new(),
            file_count: 0,
            dir_count: 0,
            error_count: 0,
            total_size: 0,
            scan_duration,
            error,
        };
        for location in &locations {
            result.file_count += location.file_count;
            result.dir_count += location.dir_count;
            result.error_count += location.error_count;
            result.total_size += location.total_size;
        }
        result.locations = locations;
        result
    }
}

/// Snapshot of an in-flight scan, queryable while `IsScanning()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgress {
    pub location_id: String,
    pub location_name: String,
    pub current_path: String,
    pub files_scanned: usize,
    pub total_files: usize,
    pub progress: f64,
    /// Nanoseconds.
    pub elapsed_time: u64,
}
