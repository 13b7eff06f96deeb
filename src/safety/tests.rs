use chrono::{Duration, Utc};

use super::{ClassificationConfig, SafetyClassifier, SafetyLevel};
use crate::scanner::FileEntry;

fn entry(path: &str, age_days: i64, size: u64) -> FileEntry {
    let modified = Utc::now() - Duration::days(age_days);
    FileEntry {
        path: path.to_string(),
        name: std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size,
        is_dir: false,
        is_symlink: false,
        last_modified: Some(modified),
        last_accessed: Some(modified),
        permissions: "rw-r--r--".to_string(),
        error: None,
        safety: None,
    }
}

fn classifier() -> SafetyClassifier {
    SafetyClassifier::new(ClassificationConfig::default())
}

#[test]
fn protected_system_path_is_risky() {
    let classification = classifier().classify(&entry(
        "/System/Library/Frameworks/Foundation.framework/Foundation",
        120,
        4096,
    ));
    assert_eq!(classification.level, SafetyLevel::Risky);
    assert!(classification.confidence >= 70);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("protected system path")));
}

#[test]
fn old_file_in_cache_root_is_safe() {
    let classification = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/data.db",
        60,
        4096,
    ));
    assert_eq!(classification.level, SafetyLevel::Safe);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("recognized cache root")));
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("safe threshold")));
}

#[test]
fn recent_file_in_cache_root_is_caution() {
    let classification = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/data.db",
        2,
        4096,
    ));
    assert_eq!(classification.level, SafetyLevel::Caution);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("active use")));
}

#[test]
fn unrecognized_location_defaults_to_caution() {
    let classification = classifier().classify(&entry("/Users/test/Notes/report.pdf", 200, 4096));
    assert_eq!(classification.level, SafetyLevel::Caution);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("Unrecognized location")));
}

#[test]
fn dev_cache_is_caution_even_when_old() {
    let classification = classifier().classify(&entry(
        "/Users/test/project/node_modules/pkg/index.js",
        365,
        4096,
    ));
    assert_eq!(classification.level, SafetyLevel::Caution);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("Development cache")));
}

#[test]
fn symlink_is_never_safe() {
    let mut link = entry("/Users/test/Library/Caches/com.example.app/data.db", 60, 4096);
    link.is_symlink = true;
    let classification = classifier().classify(&link);
    assert_ne!(classification.level, SafetyLevel::Safe);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("Symbolic link")));
}

#[test]
fn missing_timestamps_are_penalized() {
    let aged = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/data.db",
        60,
        4096,
    ));

    let mut unknown = entry("/Users/test/Library/Caches/com.example.app/data.db", 60, 4096);
    unknown.last_modified = None;
    unknown.last_accessed = None;
    let classification = classifier().classify(&unknown);

    assert_eq!(classification.level, SafetyLevel::Caution);
    assert!(classification.confidence < aged.confidence);
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("Modification time unavailable")));
}

#[test]
fn unreadable_entry_yields_zero_confidence_caution() {
    let mut broken = entry("/Users/test/Library/Caches/com.example.app/data.db", 60, 4096);
    broken.error = Some("Permission denied".to_string());
    let classification = classifier().classify(&broken);
    assert_eq!(classification.level, SafetyLevel::Caution);
    assert_eq!(classification.confidence, 0);
}

#[test]
fn zero_byte_file_noted_in_reasons() {
    let classification = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/empty",
        60,
        0,
    ));
    assert!(classification
        .reasons
        .iter()
        .any(|reason| reason.contains("Very small file")));
}

#[test]
fn agreeing_extension_signal_raises_confidence() {
    let without_ext = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/data.db",
        60,
        4096,
    ));
    let with_ext = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/data.tmp",
        60,
        4096,
    ));
    assert_eq!(with_ext.level, SafetyLevel::Safe);
    assert!(with_ext.confidence >= without_ext.confidence);
}

#[test]
fn classification_is_deterministic_for_fixed_instant() {
    let classifier = classifier();
    let file = entry("/Users/test/Library/Caches/com.example.app/data.db", 45, 4096);
    let now = Utc::now();

    let first = classifier.classify_at(&file, now);
    let second = classifier.classify_at(&file, now);

    assert_eq!(first.level, second.level);
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.reasons, second.reasons);
    assert_eq!(first.explanation, second.explanation);
}

#[test]
fn explanation_names_the_level_and_confidence() {
    let classification = classifier().classify(&entry(
        "/Users/test/Library/Caches/com.example.app/data.db",
        60,
        4096,
    ));
    assert!(classification.explanation.contains("SAFE"));
    assert!(classification
        .explanation
        .contains(&format!("{}%", classification.confidence)));
}
