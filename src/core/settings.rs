//! Persisted user settings (retry switches, cookie source, quality, last folder).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::retry::RetryPolicy;

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    config::retry::DEFAULT_MAX_RETRIES
}

fn default_quality() -> String {
    format!("{}p", config::download::DEFAULT_QUALITY_HEIGHT)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enable_retry: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_true")]
    pub enable_individual_download: bool,
    #[serde(default)]
    pub get_cookies_from_browser: bool,
    #[serde(default = "default_quality")]
    pub quality_default: String,
    #[serde(default)]
    pub last_save_folder: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_retry: true,
            max_retries: default_max_retries(),
            enable_individual_download: true,
            get_cookies_from_browser: false,
            quality_default: default_quality(),
            last_save_folder: None,
        }
    }
}

impl Settings {
    /// Loads settings. A missing or unreadable file yields the defaults.
    pub fn load(path: &Path) -> Self {
        let content = match fs_err::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                log::warn!("⚠️ Could not read settings, using defaults: {}", e);
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("⚠️ Settings file {} is corrupt, using defaults: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        fs_err::write(path, serde_json::to_string_pretty(self)?)?;
        log::debug!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_switches(self.enable_retry, self.max_retries, self.enable_individual_download)
    }
}
