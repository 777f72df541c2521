//! Cookie file persistence for yt-dlp
//!
//! This module provides functionality to:
//! - Save, load and clear the cookies.txt used with `--cookies`
//! - Tell whether a usable (non-empty) cookie file exists
//! - Sanity-check Netscape cookie file content before saving it

use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::config;
use crate::core::error::AppResult;

/// Mutex to prevent concurrent cookie file writes (race condition protection)
static COOKIES_WRITE_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Summary of a Netscape cookie file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookiesDiagnostic {
    pub has_header: bool,
    pub total_cookies: usize,
    pub youtube_cookies: usize,
    pub issues: Vec<String>,
}

impl CookiesDiagnostic {
    pub fn is_valid(&self) -> bool {
        self.youtube_cookies > 0
    }
}

/// Parse Netscape cookie file content and report what it contains
pub fn diagnose_cookies_content(content: &str) -> CookiesDiagnostic {
    let mut diagnostic = CookiesDiagnostic {
        has_header: content.lines().any(|l| l.contains("Netscape HTTP Cookie File")),
        ..Default::default()
    };
    if !diagnostic.has_header {
        diagnostic
            .issues
            .push("Missing '# Netscape HTTP Cookie File' header".to_string());
    }

    for line in content.lines() {
        let line = line.trim();
        // `#HttpOnly_` prefixed lines are cookies, plain `#` lines are comments
        let line = line.strip_prefix("#HttpOnly_").unwrap_or(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // Netscape format: domain TAB flag TAB path TAB secure TAB expires TAB name TAB value
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 7 {
            continue;
        }
        diagnostic.total_cookies += 1;
        if parts[0].contains("youtube.com") || parts[0].contains("google.com") {
            diagnostic.youtube_cookies += 1;
        }
    }

    if diagnostic.total_cookies == 0 {
        diagnostic.issues.push("No cookie entries found".to_string());
    } else if diagnostic.youtube_cookies == 0 {
        diagnostic.issues.push("No youtube.com / google.com cookies found".to_string());
    }
    diagnostic
}

/// The cookie file the downloader reads with `--cookies`.
#[derive(Debug, Clone)]
pub struct CookieStore {
    path: PathBuf,
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new(config::cookie_file_path())
    }
}

impl CookieStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file exists and is not empty (the condition for `--cookies`).
    pub fn exists_non_empty(&self) -> bool {
        fs_err::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Returns the file content, or `None` if there is no cookie file.
    pub fn load(&self) -> AppResult<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }
        Ok(Some(fs_err::read_to_string(&self.path)?))
    }

    /// Writes the cookie file atomically (temp file + rename), owner-only on unix.
    pub fn save(&self, content: &str) -> AppResult<()> {
        let _lock = COOKIES_WRITE_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }

        let temp_path = PathBuf::from(format!("{}.tmp.{}", self.path.display(), std::process::id()));
        fs_err::write(&temp_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs_err::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = fs_err::rename(&temp_path, &self.path) {
            // Clean up temp file on rename failure
            let _ = fs_err::remove_file(&temp_path);
            return Err(e.into());
        }

        log::info!("✅ Cookies file saved: {}", self.path.display());
        Ok(())
    }

    /// Copies an exported cookies.txt into the store. Returns its diagnostic.
    pub fn import(&self, source: &Path) -> AppResult<CookiesDiagnostic> {
        let content = fs_err::read_to_string(source)?;
        let diagnostic = diagnose_cookies_content(&content);
        for issue in &diagnostic.issues {
            log::warn!("🍪 {}: {}", source.display(), issue);
        }
        self.save(&content)?;
        Ok(diagnostic)
    }

    /// Removes the cookie file. Returns false if there was none.
    pub fn clear(&self) -> AppResult<bool> {
        let _lock = COOKIES_WRITE_MUTEX.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match fs_err::remove_file(&self.path) {
            Ok(()) => {
                log::info!("🗑️ Cookies file removed: {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
