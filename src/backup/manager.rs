use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One file attempted in a backup session. Failed entries are retained for
/// audit even though nothing is restorable for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub original_path: String,
    pub backup_path: String,
    pub size: u64,
    pub checksum: String,
    pub backup_time: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An atomic record of a backup operation covering possibly many files.
/// Immutable once `end_time` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSession {
    pub session_id: String,
    pub operation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: String,
    pub total_files: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub total_size: u64,
    pub backup_size: u64,
    pub entries: Vec<BackupEntry>,
}

/// Persisted catalog of backup sessions; the system of record for "what was
/// deleted and how to get it back".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub sessions: Vec<BackupSession>,
    pub total_sessions: usize,
    pub total_files: usize,
    pub total_size: u64,
}

impl BackupManifest {
    fn empty() -> Self {
        let now = Utc::now();
        BackupManifest {
            version: "1.0".to_string(),
            created_at: now,
            last_updated: now,
            sessions: Vec::new(),
            total_sessions: 0,
            total_files: 0,
            total_size: 0,
        }
    }

    fn recalculate(&mut self) {
        self.total_sessions = self.sessions.len();
        self.total_files = self.sessions.iter().map(|s| s.total_files).sum();
        self.total_size = self.sessions.iter().map(|s| s.total_size).sum();
        self.last_updated = Utc::now();
    }
}

/// Guard pinning a session against deletion and age cleanup while a
/// restore or preview reads it. Released on drop.
pub struct SessionLock<'a> {
    manager: &'a BackupManager,
    session_id: String,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        self.manager.unlock_session(&self.session_id);
    }
}

/// Creates and catalogs checksum-verified backups of files before deletion.
///
/// Stored copies are content-addressed: each blob lives under the session
/// directory named by its SHA-256 checksum.
pub struct BackupManager {
    backup_dir: PathBuf,
    manifest_file: PathBuf,
    // Serializes manifest read-modify-write cycles.
    manifest_lock: Mutex<()>,
    locked_sessions: Mutex<HashSet<String>>,
}

impl BackupManager {
    /// `CACHE_CLEANER_BACKUP_DIR` overrides the default
    /// `~/CacheCleaner/Backups` location.
    pub fn new() -> Result<Self, String> {
        let backup_dir = match std::env::var("CACHE_CLEANER_BACKUP_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let home = dirs::home_dir().ok_or_else(|| "Could not find home directory".to_string())?;
                home.join("CacheCleaner").join("Backups")
            }
        };
        let manifest_file = backup_dir.join("manifest.json");

        fs::create_dir_all(backup_dir.join("files"))
            .map_err(|e| format!("Failed to create backup directory {}: {}", backup_dir.display(), e))?;

        Ok(BackupManager {
            backup_dir,
            manifest_file,
            manifest_lock: Mutex::new(()),
            locked_sessions: Mutex::new(HashSet::new()),
        })
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.backup_dir.join("files").join(session_id)
    }

    /// Back up every path in `paths`, one attempt each. Individual failures
    /// mark their entry and never abort the session; `end_time` is set only
    /// after every path has been attempted.
    pub fn backup_files(&self, paths: &[String], operation: &str) -> Result<BackupSession, String> {
        let session_id = format!("backup_{}", uuid::Uuid::new_v4());
        let mut session = BackupSession {
            session_id: session_id.clone(),
            operation: operation.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: "in_progress".to_string(),
            total_files: paths.len(),
            success_count: 0,
            failure_count: 0,
            total_size: 0,
            backup_size: 0,
            entries: Vec::with_capacity(paths.len()),
        };

        let session_dir = self.session_dir(&session_id);
        fs::create_dir_all(&session_dir)
            .map_err(|e| format!("Failed to create session directory: {}", e))?;

        log::info!(
            "Starting backup session {} ({} files, operation: {})",
            session_id,
            paths.len(),
            operation
        );

        for path in paths {
            let entry = self.backup_single_file(path, &session_dir);
            if entry.success {
                session.success_count += 1;
                session.backup_size += entry.size;
            } else {
                session.failure_count += 1;
                log::warn!(
                    "Backup failed for {}: {}",
                    path,
                    entry.error.as_deref().unwrap_or("unknown error")
                );
            }
            session.total_size += entry.size;
            session.entries.push(entry);
        }

        session.end_time = Some(Utc::now());
        session.status = "completed".to_string();

        self.append_session(session.clone())?;

        log::info!(
            "Completed backup session {}: {} succeeded, {} failed",
            session_id,
            session.success_count,
            session.failure_count
        );

        Ok(session)
    }

    fn backup_single_file(&self, original_path: &str, session_dir: &Path) -> BackupEntry {
        let mut entry = BackupEntry {
            original_path: original_path.to_string(),
            backup_path: String::new(),
            size: 0,
            checksum: String::new(),
            backup_time: Utc::now(),
            success: false,
            error: None,
        };

        let metadata = match fs::symlink_metadata(original_path) {
            Ok(metadata) => metadata,
            Err(e) => {
                entry.error = Some(format!("failed to get file info: {}", e));
                return entry;
            }
        };
        if metadata.is_dir() {
            entry.error = Some("directories are not backed up".to_string());
            return entry;
        }

        // Copy while hashing, then read back and re-hash before the entry may
        // count as successful.
        let staging = session_dir.join(format!(".staging-{}", uuid::Uuid::new_v4()));
        let (size, checksum) = match copy_and_hash(Path::new(original_path), &staging) {
            Ok(result) => result,
            Err(e) => {
                let _ = fs::remove_file(&staging);
                entry.error = Some(format!("failed to copy file: {}", e));
                return entry;
            }
        };
        entry.size = size;

        match calculate_checksum(&staging) {
            Ok(written) if written == checksum => {}
            Ok(written) => {
                let _ = fs::remove_file(&staging);
                entry.error = Some(format!(
                    "checksum mismatch after write: expected {}, got {}",
                    checksum, written
                ));
                return entry;
            }
            Err(e) => {
                let _ = fs::remove_file(&staging);
                entry.error = Some(format!("failed to verify backup: {}", e));
                return entry;
            }
        }

        let blob_path = session_dir.join(&checksum);
        if blob_path.exists() {
            // Same content already stored in this session.
            let _ = fs::remove_file(&staging);
        } else if let Err(e) = fs::rename(&staging, &blob_path) {
            let _ = fs::remove_file(&staging);
            entry.error = Some(format!("failed to store backup copy: {}", e));
            return entry;
        }

        entry.backup_path = blob_path.to_string_lossy().to_string();
        entry.checksum = checksum;
        entry.success = true;
        entry
    }

    fn load_manifest_unlocked(&self) -> Result<BackupManifest, String> {
        match fs::read_to_string(&self.manifest_file) {
            Ok(data) => serde_json::from_str(&data)
                .map_err(|e| format!("Failed to parse manifest file: {}", e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackupManifest::empty()),
            Err(e) => Err(format!("Failed to read manifest file: {}", e)),
        }
    }

    fn save_manifest_unlocked(&self, manifest: &BackupManifest) -> Result<(), String> {
        let data = serde_json::to_string_pretty(manifest)
            .map_err(|e| format!("Failed to serialize manifest: {}", e))?;
        fs::write(&self.manifest_file, data)
            .map_err(|e| format!("Failed to write manifest file: {}", e))
    }

    fn append_session(&self, session: BackupSession) -> Result<(), String> {
        let _guard = self
            .manifest_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut manifest = self.load_manifest_unlocked()?;
        manifest.sessions.push(session);
        manifest.recalculate();
        self.save_manifest_unlocked(&manifest)
    }

    pub fn get_manifest(&self) -> Result<BackupManifest, String> {
        let _guard = self
            .manifest_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load_manifest_unlocked()
    }

    pub fn get_session(&self, session_id: &str) -> Result<BackupSession, String> {
        let manifest = self.get_manifest()?;
        manifest
            .sessions
            .into_iter()
            .find(|session| session.session_id == session_id)
            .ok_or_else(|| format!("session {} not found", session_id))
    }

    pub fn list_sessions(&self) -> Result<Vec<BackupSession>, String> {
        Ok(self.get_manifest()?.sessions)
    }

    /// Re-validate every successful entry of a session: the stored blob must
    /// exist and still hash to the recorded checksum.
    pub fn verify_integrity(&self, session_id: &str) -> Result<(bool, Vec<String>), String> {
        let session = self.get_session(session_id)?;
        let mut errors = Vec::new();

        for entry in session.entries.iter().filter(|entry| entry.success) {
            let blob = Path::new(&entry.backup_path);
            if !blob.exists() {
                errors.push(format!("backup file missing: {}", entry.backup_path));
                continue;
            }
            match calculate_checksum(blob) {
                Ok(current) if current == entry.checksum => {}
                Ok(current) => errors.push(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    entry.backup_path, entry.checksum, current
                )),
                Err(e) => errors.push(format!(
                    "failed to calculate checksum for {}: {}",
                    entry.backup_path, e
                )),
            }
        }

        Ok((errors.is_empty(), errors))
    }

    /// Pin a session for restore/preview. Fails if the session is already
    /// pinned or unknown.
    pub fn lock_session(&self, session_id: &str) -> Result<SessionLock<'_>, String> {
        // Existence check before taking the pin.
        self.get_session(session_id)?;
        let mut locked = self
            .locked_sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !locked.insert(session_id.to_string()) {
            return Err(format!("restore already in progress for session {}", session_id));
        }
        Ok(SessionLock {
            manager: self,
            session_id: session_id.to_string(),
        })
    }

    fn unlock_session(&self, session_id: &str) {
        let mut locked = self
            .locked_sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locked.remove(session_id);
    }

    fn is_session_locked(&self, session_id: &str) -> bool {
        self.locked_sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(session_id)
    }

    /// Remove a session and its stored copies. Fails loudly while a restore
    /// or preview holds the session.
    pub fn delete_session(&self, session_id: &str) -> Result<BackupSession, String> {
        if self.is_session_locked(session_id) {
            return Err(format!(
                "session {} is in use by an active restore and cannot be deleted",
                session_id
            ));
        }

        let _guard = self
            .manifest_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut manifest = self.load_manifest_unlocked()?;
        let index = manifest
            .sessions
            .iter()
            .position(|session| session.session_id == session_id)
            .ok_or_else(|| format!("session {} not found", session_id))?;
        let session = manifest.sessions.remove(index);

        fs::remove_dir_all(self.session_dir(session_id))
            .map_err(|e| format!("failed to remove session directory: {}", e))?;

        manifest.recalculate();
        self.save_manifest_unlocked(&manifest)?;
        log::info!("Deleted backup session {}", session_id);
        Ok(session)
    }

    /// Delete sessions whose `end_time` is older than the cutoff, along with
    /// their stored copies. Irreversible. Sessions pinned by an active
    /// restore are skipped. Returns the number of deleted sessions.
    pub fn cleanup_by_age(&self, older_than_days: i64) -> Result<usize, String> {
        let cutoff = Utc::now() - Duration::days(older_than_days);

        let _guard = self
            .manifest_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut manifest = self.load_manifest_unlocked()?;

        let mut remaining = Vec::with_capacity(manifest.sessions.len());
        let mut deleted = 0usize;
        for session in manifest.sessions.drain(..) {
            let reference = session.end_time.unwrap_or(session.start_time);
            if reference >= cutoff {
                remaining.push(session);
                continue;
            }
            if self.is_session_locked(&session.session_id) {
                log::warn!(
                    "Skipping cleanup of session {}: restore in progress",
                    session.session_id
                );
                remaining.push(session);
                continue;
            }
            fs::remove_dir_all(self.session_dir(&session.session_id))
                .map_err(|e| format!("failed to remove session directory: {}", e))?;
            deleted += 1;
        }

        manifest.sessions = remaining;
        manifest.recalculate();
        self.save_manifest_unlocked(&manifest)?;

        log::info!("Cleaned up {} backup sessions older than {} days", deleted, older_than_days);
        Ok(deleted)
    }
}

/// Streaming SHA-256 of a file's contents.
pub fn calculate_checksum(path: &Path) -> Result<String, String> {
    let mut file = File::open(path).map_err(|e| format!("failed to open file: {}", e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|e| format!("failed to read file: {}", e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// Copy `src` to `dst`, returning the copied byte count and the SHA-256 of
// the bytes that were read.
fn copy_and_hash(src: &Path, dst: &Path) -> Result<(u64, String), String> {
    let mut source = File::open(src).map_err(|e| format!("failed to open source file: {}", e))?;
    let mut dest = File::create(dst).map_err(|e| format!("failed to create backup file: {}", e))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let read = source
            .read(&mut buffer)
            .map_err(|e| format!("failed to read source file: {}", e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        dest.write_all(&buffer[..read])
            .map_err(|e| format!("failed to write backup file: {}", e))?;
        total += read as u64;
    }
    dest.sync_all()
        .map_err(|e| format!("failed to flush backup file: {}", e))?;

    Ok((total, format!("{:x}", hasher.finalize())))
}
