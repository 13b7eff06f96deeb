use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::context::PathContext;
use crate::scanner::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SafetyLevel {
    Safe,
    Caution,
    Risky,
}

impl std::fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SafetyLevel::Safe => write!(f, "Safe"),
            SafetyLevel::Caution => write!(f, "Caution"),
            SafetyLevel::Risky => write!(f, "Risky"),
        }
    }
}

/// Result of the safety analysis for a single file.
///
/// Derived purely from a [`FileEntry`] and the classifier configuration;
/// `reasons` lists the signals that fired, in evaluation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyClassification {
    pub level: SafetyLevel,
    pub confidence: u8,
    pub explanation: String,
    pub reasons: Vec<String>,
}

/// Thresholds and pattern lists for the classification rules.
///
/// These are configuration input, not constants: callers may load an
/// override file or construct their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Files unmodified for at least this many days are generally safer.
    pub safe_age_days: i64,
    /// Files modified within this many days need more caution.
    pub caution_age_days: i64,
    /// Files larger than this are flagged for attention.
    pub large_file_bytes: u64,
    /// Paths matching these patterns are protected and classified Risky.
    pub system_critical_paths: Vec<String>,
    /// Recognized cache/temp roots where old files are safe to delete.
    pub cache_root_patterns: Vec<String>,
    /// Development caches that are regenerable but expensive to rebuild.
    pub dev_cache_patterns: Vec<String>,
    /// Extensions that mark a file as cache-like scratch data.
    pub cache_extensions: Vec<String>,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        ClassificationConfig {
            safe_age_days: 30,
            caution_age_days: 7,
            large_file_bytes: 100 * 1024 * 1024,
            system_critical_paths: vec![
                "/System/".into(),
                "/usr/".into(),
                "/bin/".into(),
                "/sbin/".into(),
                "/var/log/".into(),
                "/Library/Logs/".into(),
                "/Applications/".into(),
                "/private/var/db/".into(),
                "/private/var/run/".into(),
            ],
            cache_root_patterns: vec![
                "/tmp/".into(),
                "/var/tmp/".into(),
                "~/Library/Caches/".into(),
                "/Library/Caches/".into(),
                "/private/var/folders/".into(),
                "cache".into(),
                "temp".into(),
                "tmp".into(),
            ],
            dev_cache_patterns: vec![
                "node_modules".into(),
                ".git".into(),
                "build/".into(),
                "dist/".into(),
                "target/".into(),
                ".gradle".into(),
                ".m2/".into(),
            ],
            cache_extensions: vec![
                "cache".into(),
                "tmp".into(),
                "temp".into(),
                "log".into(),
                "crdownload".into(),
                "part".into(),
                "partial".into(),
            ],
        }
    }
}

/// Load the classification config, honoring `CACHE_CLEANER_CLASSIFIER_OVERRIDE`.
pub fn load_classification_config() -> Result<ClassificationConfig, String> {
    match std::env::var("CACHE_CLEANER_CLASSIFIER_OVERRIDE") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read classifier override {}: {}", path, e))?;
            serde_json::from_str(&raw)
                .map_err(|e| format!("Failed to parse classifier override: {}", e))
        }
        Err(_) => Ok(ClassificationConfig::default()),
    }
}

// Confidence weights per signal. Confidence grows monotonically with the
// number of signals agreeing with the final level.
const BASE_CONFIDENCE: i32 = 40;
const WEIGHT_PROTECTED: i32 = 45;
const WEIGHT_CACHE_ROOT: i32 = 15;
const WEIGHT_AGE: i32 = 20;
const WEIGHT_DEV_CACHE: i32 = 15;
const WEIGHT_EXTENSION: i32 = 10;
const WEIGHT_SYMLINK: i32 = 15;
const WEIGHT_UNRECOGNIZED: i32 = 10;
const PENALTY_NO_TIMESTAMP: i32 = 15;
const PENALTY_LARGE_FILE: i32 = 10;

struct Signal {
    supports: SafetyLevel,
    weight: i32,
}

/// Rule-based safety classifier.
pub struct SafetyClassifier {
    config: ClassificationConfig,
}

impl Default for SafetyClassifier {
    fn default() -> Self {
        SafetyClassifier::new(ClassificationConfig::default())
    }
}

impl SafetyClassifier {
    pub fn new(config: ClassificationConfig) -> Self {
        SafetyClassifier { config }
    }

    pub fn config(&self) -> &ClassificationConfig {
        &self.config
    }

    /// Classify a scanned file. Directories are not classified; callers skip
    /// them. Never fails: the worst case is Caution with zero confidence.
    pub fn classify(&self, entry: &FileEntry) -> SafetyClassification {
        self.classify_at(entry, Utc::now())
    }

    /// Classification pinned to an explicit evaluation instant. Two calls
    /// with the same entry and instant produce identical results.
    pub fn classify_at(&self, entry: &FileEntry, now: DateTime<Utc>) -> SafetyClassification {
        if entry.error.is_some() {
            return SafetyClassification {
                level: SafetyLevel::Caution,
                confidence: 0,
                explanation: "Unable to classify: file metadata could not be read.".to_string(),
                reasons: vec!["unable to classify".to_string()],
            };
        }

        let ctx = PathContext::new(&entry.path);
        let mut reasons: Vec<String> = Vec::new();
        let mut signals: Vec<Signal> = Vec::new();
        let mut penalties: i32 = 0;

        // Rule 1 (highest precedence): protected system locations.
        let protected = self
            .config
            .system_critical_paths
            .iter()
            .find(|pattern| ctx.matches_pattern(pattern));
        if let Some(pattern) = protected {
            reasons.push(format!(
                "Located in protected system path ({})",
                pattern.trim_matches('/')
            ));
            signals.push(Signal {
                supports: SafetyLevel::Risky,
                weight: WEIGHT_PROTECTED,
            });
        }

        // Symbolic links are never classified Safe.
        if entry.is_symlink {
            reasons.push("Symbolic link; target not resolved".to_string());
            signals.push(Signal {
                supports: SafetyLevel::Caution,
                weight: WEIGHT_SYMLINK,
            });
        }

        // Rules 2/3: recognized cache root, gated by age.
        let age_days = entry
            .last_modified
            .map(|modified| now.signed_duration_since(modified).num_days());
        let cache_root = self
            .config
            .cache_root_patterns
            .iter()
            .find(|pattern| ctx.matches_pattern(pattern));
        let mut age_supports_safe = false;
        if let Some(pattern) = cache_root {
            reasons.push(format!(
                "Located under recognized cache root ({})",
                pattern.trim_matches('/')
            ));
            signals.push(Signal {
                supports: SafetyLevel::Safe,
                weight: WEIGHT_CACHE_ROOT,
            });

            match age_days {
                Some(days) if days >= self.config.safe_age_days => {
                    reasons.push(format!(
                        "Unmodified for {} days (safe threshold: {} days)",
                        days, self.config.safe_age_days
                    ));
                    signals.push(Signal {
                        supports: SafetyLevel::Safe,
                        weight: WEIGHT_AGE,
                    });
                    age_supports_safe = true;
                }
                Some(days) => {
                    reasons.push(format!(
                        "Modified {} days ago; may still be in active use (safe threshold: {} days)",
                        days.max(0),
                        self.config.safe_age_days
                    ));
                    signals.push(Signal {
                        supports: SafetyLevel::Caution,
                        weight: WEIGHT_AGE,
                    });
                }
                None => {
                    reasons.push("Modification time unavailable".to_string());
                    penalties += PENALTY_NO_TIMESTAMP;
                }
            }
        } else if age_days.is_none() {
            reasons.push("Modification time unavailable".to_string());
            penalties += PENALTY_NO_TIMESTAMP;
        }

        // Development caches are regenerable but expensive; always Caution.
        let dev_cache = self
            .config
            .dev_cache_patterns
            .iter()
            .find(|pattern| ctx.matches_pattern(pattern));
        if let Some(pattern) = dev_cache {
            reasons.push(format!("Development cache detected ({})", pattern.trim_matches('/')));
            signals.push(Signal {
                supports: SafetyLevel::Caution,
                weight: WEIGHT_DEV_CACHE,
            });
        }

        // Extension signal supports Safe but never establishes it alone.
        if let Some(ext) = ctx.extension() {
            if self.config.cache_extensions.iter().any(|candidate| candidate == ext) {
                reasons.push(format!("Cache-like extension (.{})", ext));
                signals.push(Signal {
                    supports: SafetyLevel::Safe,
                    weight: WEIGHT_EXTENSION,
                });
            }
        }

        // Size adjustments.
        if entry.size > self.config.large_file_bytes {
            reasons.push(format!(
                "Large file: {:.2} MB (threshold: {:.2} MB)",
                entry.size as f64 / (1024.0 * 1024.0),
                self.config.large_file_bytes as f64 / (1024.0 * 1024.0)
            ));
            penalties += PENALTY_LARGE_FILE;
        } else if entry.size < 1024 {
            reasons.push("Very small file, cheap to recreate".to_string());
        }

        // Read-only files are more likely system-managed.
        if is_read_only(&entry.permissions) {
            reasons.push("Read-only permissions; may be system-managed".to_string());
            penalties += 5;
        }

        // Resolve the level by rule precedence.
        let level = if protected.is_some() {
            SafetyLevel::Risky
        } else if cache_root.is_some()
            && age_supports_safe
            && dev_cache.is_none()
            && !entry.is_symlink
        {
            SafetyLevel::Safe
        } else {
            // Unrecognized locations default to Caution, never silently Safe.
            if protected.is_none() && cache_root.is_none() && dev_cache.is_none() {
                reasons.push("Unrecognized location; defaulting to caution".to_string());
                signals.push(Signal {
                    supports: SafetyLevel::Caution,
                    weight: WEIGHT_UNRECOGNIZED,
                });
            }
            SafetyLevel::Caution
        };

        let agreeing: i32 = signals
            .iter()
            .filter(|signal| signal.supports == level)
            .map(|signal| signal.weight)
            .sum();
        let confidence = (BASE_CONFIDENCE + agreeing - penalties).clamp(0, 100) as u8;

        let explanation = self.generate_explanation(level, confidence, &reasons);

        SafetyClassification {
            level,
            confidence,
            explanation,
            reasons,
        }
    }

    fn generate_explanation(&self, level: SafetyLevel, confidence: u8, reasons: &[String]) -> String {
        let key_factors = if reasons.is_empty() {
            String::new()
        } else {
            let shown = reasons.len().min(3);
            format!(" Key factors: {}.", reasons[..shown].join("; "))
        };

        match level {
            SafetyLevel::Safe => format!(
                "This file is classified as SAFE to delete with {}% confidence.{} It appears to \
                 be a cache or temporary file that can be removed without affecting system \
                 functionality.",
                confidence, key_factors
            ),
            SafetyLevel::Caution => format!(
                "This file is classified as requiring CAUTION with {}% confidence.{} Review the \
                 file details before deletion; it may contain important data or be in active use.",
                confidence, key_factors
            ),
            SafetyLevel::Risky => format!(
                "This file is classified as RISKY to delete with {}% confidence.{} It appears to \
                 be in a system-critical location; deletion is not recommended.",
                confidence, key_factors
            ),
        }
    }
}

// Permission strings look like "rw-r--r--"; a file with no write bit anywhere
// is treated as read-only.
fn is_read_only(permissions: &str) -> bool {
    !permissions.is_empty() && !permissions.contains('w')
}
