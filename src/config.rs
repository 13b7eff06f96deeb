// src/config.rs

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // Parallelism
    pub max_parallel_scans: usize, // Default: num_cpus::get()

    // Authoritative backend timeouts
    pub scan_timeout_secs: u64,  // Default: 300 seconds
    pub dialog_ttl_secs: u64,    // Default: 300 seconds

    // Confirmed deletions run to completion unless this is enabled.
    pub allow_deletion_cancel: bool, // Default: false

    // Scan progress snapshot cadence (entries between updates)
    pub progress_interval: usize, // Default: 100
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_parallel_scans: num_cpus::get(),
            scan_timeout_secs: 300,
            dialog_ttl_secs: 300,
            allow_deletion_cancel: false,
            progress_interval: 100,
        }
    }
}

// Global configuration
lazy_static! {
    pub static ref RUNTIME_CONFIG: RuntimeConfig = RuntimeConfig::default();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    User,
    System,
    Application,
}

/// A configured filesystem root known to contain cache-like files.
/// Loaded once from configuration; immutable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheLocation {
    pub id: String,
    pub name: String,
    pub path: String,
    pub kind: LocationKind,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct LocationEntry {
    id: String,
    name: String,
    path: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct LocationsFile {
    #[serde(default)]
    system_caches: Vec<LocationEntry>,
    #[serde(default)]
    user_caches: Vec<LocationEntry>,
    #[serde(default)]
    application_caches: Vec<LocationEntry>,
}

/// Load the configured cache locations.
///
/// `CACHE_CLEANER_LOCATIONS_OVERRIDE` may point at an alternate JSON file;
/// otherwise the embedded defaults are used.
pub fn load_cache_locations() -> Result<Vec<CacheLocation>, String> {
    let raw = match std::env::var("CACHE_CLEANER_LOCATIONS_OVERRIDE") {
        Ok(path) => std::fs::read_to_string(&path)
            .map_err(|e| format!("Failed to read locations override {}: {}", path, e))?,
        Err(_) => include_str!("../rules/cache_locations.json").to_string(),
    };

    let parsed: LocationsFile =
        serde_json::from_str(&raw).map_err(|e| format!("Failed to parse cache locations: {}", e))?;

    let mut locations = Vec::new();
    for (entries, kind) in [
        (parsed.system_caches, LocationKind::System),
        (parsed.user_caches, LocationKind::User),
        (parsed.application_caches, LocationKind::Application),
    ] {
        for entry in entries {
            locations.push(CacheLocation {
                id: entry.id,
                name: entry.name,
                path: entry.path,
                kind,
                description: entry.description,
            });
        }
    }

    Ok(locations)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_tilde(path: &str) -> Result<std::path::PathBuf, String> {
    if path == "~" {
        return dirs::home_dir().ok_or_else(|| "Could not find home directory".to_string());
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| "Could not find home directory".to_string())?;
        return Ok(home.join(rest));
    }
    Ok(std::path::PathBuf::from(path))
}
