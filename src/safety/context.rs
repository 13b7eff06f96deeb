use std::path::Path;

/// Pre-computed, lowercased view of a path used by the classifier.
///
/// Built from the path string alone; classification must stay read-only and
/// must not touch the filesystem.
#[derive(Debug)]
pub(super) struct PathContext {
    lower: String,
    extension: Option<String>,
}

impl PathContext {
    pub(super) fn new(path: &str) -> Self {
        let lower = path.to_lowercase();
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        Self { lower, extension }
    }

    pub(super) fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Substring match against the full lowercased path. A leading `~` in the
    /// pattern is dropped so configured patterns like `~/Library/Caches/`
    /// match the expanded paths the scanner produces.
    pub(super) fn matches_pattern(&self, pattern: &str) -> bool {
        let normalized = pattern.trim_start_matches('~').to_lowercase();
        if normalized.is_empty() {
            return false;
        }
        self.lower.contains(&normalized)
    }
}
