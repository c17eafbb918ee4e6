//! Configuration module
//!
//! Settings are resolved once at start-up (defaults, then an optional YAML
//! file, then `ANALOG_*` environment variables) and threaded through the
//! service as an immutable `Arc<Settings>`.

mod settings;

pub use settings::*;

use std::path::PathBuf;

/// Environment variable naming an explicit settings file
pub const SETTINGS_PATH_ENV: &str = "ANALOG_SETTINGS_PATH";

/// Locate the settings file: explicit path, environment variable, then well-known locations
pub fn locate_settings(explicit: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path);
    }

    if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    let mut candidates = vec![
        PathBuf::from("settings.yml"),
        PathBuf::from("config/settings.yml"),
    ];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("analog-ensemble/settings.yml"));
    }

    candidates.into_iter().find(|p| p.exists())
}
