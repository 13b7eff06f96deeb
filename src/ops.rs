use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub type OperationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionMode {
    Manual,
    Confirmed,
}

/// Pollable state of an asynchronous deletion operation.
///
/// Terminal states remain queryable by id so that a client polling late
/// still observes the outcome; stale entries are trimmed explicitly via
/// [`OperationRegistry::cleanup_completed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionOperation {
    pub operation_id: OperationId,
    pub operation: String,
    pub mode: DeletionMode,
    pub requested_paths: Vec<String>,
    pub force: bool,
    pub dry_run: bool,
    pub create_backup: bool,
    pub status: OperationStatus,
    pub files_processed: usize,
    pub total_files: usize,
    pub current_size_processed: u64,
    pub total_size: u64,
    /// Nanoseconds.
    pub elapsed_time: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_session_id: Option<String>,
    pub deleted_files: Vec<String>,
    pub failed_files: Vec<String>,
    pub skipped_files: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl DeletionOperation {
    pub fn new(
        operation_id: OperationId,
        operation: String,
        mode: DeletionMode,
        requested_paths: Vec<String>,
        force: bool,
        dry_run: bool,
        create_backup: bool,
    ) -> Self {
        let total_files = requested_paths.len();
        DeletionOperation {
            operation_id,
            operation,
            mode,
            requested_paths,
            force,
            dry_run,
            create_backup,
            status: OperationStatus::Pending,
            files_processed: 0,
            total_files,
            current_size_processed: 0,
            total_size: 0,
            elapsed_time: 0,
            message: "Operation pending".to_string(),
            backup_session_id: None,
            deleted_files: Vec::new(),
            failed_files: Vec::new(),
            skipped_files: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
        }
    }
}

/// Mutex-guarded single-owner slot for the one in-flight operation of a
/// kind. Acquired before work starts and released only on terminal
/// transition; a second acquisition attempt is rejected, not queued.
pub struct OperationSlot {
    current: Mutex<Option<OperationId>>,
}

impl Default for OperationSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationSlot {
    pub fn new() -> Self {
        OperationSlot {
            current: Mutex::new(None),
        }
    }

    pub fn try_acquire(&self, id: &str) -> Result<(), String> {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(active) = current.as_ref() {
            return Err(format!("operation already in progress: {}", active));
        }
        *current = Some(id.to_string());
        Ok(())
    }

    pub fn release(&self, id: &str) {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.as_deref() == Some(id) {
            *current = None;
        }
    }

    pub fn current(&self) -> Option<OperationId> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// Registry of deletion operations addressable by opaque id.
#[derive(Clone, Default)]
pub struct OperationRegistry {
    inner: Arc<DashMap<OperationId, DeletionOperation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        OperationRegistry {
            inner: Arc::new(DashMap::new()),
        }
    }

    pub fn insert(&self, operation: DeletionOperation) {
        self.inner.insert(operation.operation_id.clone(), operation);
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut DeletionOperation)) {
        if let Some(mut entry) = self.inner.get_mut(id) {
            f(entry.value_mut());
        }
    }

    pub fn get(&self, id: &str) -> Option<DeletionOperation> {
        self.inner.get(id).map(|entry| entry.value().clone())
    }

    /// Trim terminal operations started before the cutoff. Running
    /// operations are never removed.
    pub fn cleanup_completed(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let stale: Vec<OperationId> = self
            .inner
            .iter()
            .filter(|entry| entry.value().status.is_terminal() && entry.value().started_at < cutoff)
            .map(|entry| entry.key().clone())
            .collect();
        let removed = stale.len();
        for id in stale {
            self.inner.remove(&id);
        }
        removed
    }
}
