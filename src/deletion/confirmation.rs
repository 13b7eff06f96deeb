use bytesize::ByteSize;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::service::SafetyCheckResult;
use crate::config::RUNTIME_CONFIG;

/// Payload shown to the user before a deletion is confirmed. Expires after
/// `RuntimeConfig.dialog_ttl_secs`; an expired dialog cannot confirm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationDialog {
    pub title: String,
    pub message: String,
    pub details: Vec<String>,
    pub warnings: Vec<String>,
    pub file_count: usize,
    pub total_size: u64,
    pub operation: String,
    pub force: bool,
    pub dry_run: bool,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Builds and validates confirmation dialogs for deletion operations.
#[derive(Default)]
pub struct ConfirmationService;

impl ConfirmationService {
    pub fn new() -> Self {
        ConfirmationService
    }

    pub fn create_dialog(
        &self,
        operation: &str,
        files: &[String],
        safety: &SafetyCheckResult,
        force: bool,
        dry_run: bool,
    ) -> ConfirmationDialog {
        let now = Utc::now();
        let ttl = Duration::seconds(RUNTIME_CONFIG.dialog_ttl_secs as i64);

        let mut warnings = safety.warnings.clone();
        if !safety.risky_files.is_empty() {
            warnings.push(format!(
                "{} risky files detected that may cause system issues",
                safety.risky_files.len()
            ));
        }
        if !safety.blocked_files.is_empty() {
            warnings.push(format!(
                "{} files blocked due to safety concerns",
                safety.blocked_files.len()
            ));
        }

        ConfirmationDialog {
            title: generate_title(operation, files.len()),
            message: generate_message(operation, files.len(), safety.total_size),
            details: generate_details(files, safety.total_size),
            warnings,
            file_count: files.len(),
            total_size: safety.total_size,
            operation: operation.to_string(),
            force,
            dry_run,
            timestamp: now,
            expires_at: now + ttl,
        }
    }

    pub fn validate_dialog(&self, dialog: &ConfirmationDialog) -> Result<(), String> {
        if Utc::now() > dialog.expires_at {
            return Err("confirmation dialog has expired".to_string());
        }
        Ok(())
    }
}

fn generate_title(operation: &str, file_count: usize) -> String {
    match operation {
        "cache_cleanup" => format!("Clean Cache Files ({} files)", file_count),
        "manual_deletion" => format!("Delete Selected Files ({} files)", file_count),
        "bulk_deletion" => format!("Bulk Delete Files ({} files)", file_count),
        "system_cleanup" => format!("System Cleanup ({} files)", file_count),
        _ => format!("Delete Files ({} files)", file_count),
    }
}

fn generate_message(operation: &str, file_count: usize, total_size: u64) -> String {
    let base = format!(
        "You are about to delete {} files ({}).",
        file_count,
        ByteSize(total_size)
    );
    let suffix = match operation {
        "cache_cleanup" => " This will clean up cache files to free disk space.",
        "system_cleanup" => " This will clean up system files.",
        _ => "",
    };
    format!("{}{} A backup will be created before deletion.", base, suffix)
}

fn generate_details(files: &[String], total_size: u64) -> Vec<String> {
    let mut details = vec![
        format!("Total files: {}", files.len()),
        format!("Total size: {}", ByteSize(total_size)),
        String::new(),
        "Safety measures:".to_string(),
        "- A backup will be created before deletion".to_string(),
        "- Files can be restored from backup if needed".to_string(),
        "- System critical files are protected".to_string(),
        String::new(),
        "Files to be deleted:".to_string(),
    ];

    const MAX_LISTED: usize = 10;
    for file in files.iter().take(MAX_LISTED) {
        details.push(format!("- {}", file));
    }
    if files.len() > MAX_LISTED {
        details.push(format!("- ... and {} more files", files.len() - MAX_LISTED));
    }

    details
}
