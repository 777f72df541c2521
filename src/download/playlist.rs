//! Playlist expansion for the individual-download fallback.
//!
//! Lists the entries of a playlist with `yt-dlp --flat-playlist` so each
//! video can be downloaded on its own when the playlist as a whole fails.

use std::time::Duration;

use crate::core::config;
use crate::core::process::run_with_timeout;
use crate::download::builder::{playlist_info_args, playlist_url_args, CredentialSource};
use crate::download::error::DownloadError;
use crate::download::process::Launcher;
use crate::download::ytdlp_errors::is_valid_video_url;

/// Single entry in a playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    /// Video URL
    pub url: String,
    /// Video title (may be empty)
    pub title: String,
}

/// Parses `url|title` lines. Lines without a valid video URL are skipped;
/// titles may themselves contain '|'.
pub fn parse_entries(stdout: &str) -> Vec<PlaylistEntry> {
    stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let (url, title) = line.split_once('|').unwrap_or((line, ""));
            let url = url.trim();
            if !is_valid_video_url(url) {
                log::debug!("Skipping playlist line without a usable URL: {}", line);
                return None;
            }
            Some(PlaylistEntry {
                url: url.to_string(),
                title: title.trim().to_string(),
            })
        })
        .collect()
}

/// Parses one-URL-per-line output, keeping valid video URLs only.
pub fn parse_urls(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| is_valid_video_url(line))
        .map(str::to_string)
        .collect()
}

/// Expands playlist URLs into their entries.
///
/// `Err` means the listing could not be obtained (launch failure, timeout,
/// non-zero exit); `Ok(vec![])` means the playlist is genuinely empty.
#[derive(Debug, Clone)]
pub struct PlaylistExpander {
    launcher: Launcher,
    credentials: CredentialSource,
    timeout: Duration,
}

impl PlaylistExpander {
    pub fn new(launcher: Launcher) -> Self {
        Self {
            launcher,
            credentials: CredentialSource::None,
            timeout: config::download::PLAYLIST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn credentials(mut self, credentials: CredentialSource) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: Vec<String>) -> Result<String, DownloadError> {
        let mut cmd = self.launcher.command(&args);
        let output = run_with_timeout(&mut cmd, self.timeout).await.map_err(|e| {
            log::error!("Playlist listing failed to run: {}", e);
            DownloadError::PlaylistExpansion(e.to_string())
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("unknown error")
                .trim()
                .to_string();
            log::error!("Playlist listing exited with {:?}: {}", output.status.code(), reason);
            return Err(DownloadError::PlaylistExpansion(reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Lists `(url, title)` for every entry.
    pub async fn extract_video_info(&self, url: &str) -> Result<Vec<PlaylistEntry>, DownloadError> {
        log::info!("📋 Listing playlist {}", url);
        let stdout = self.run(playlist_info_args(url, &self.credentials)).await?;
        let entries = parse_entries(&stdout);
        log::info!("📋 Playlist {} has {} entries", url, entries.len());
        Ok(entries)
    }

    /// Lists entry URLs only.
    pub async fn extract_video_urls(&self, url: &str) -> Result<Vec<String>, DownloadError> {
        let stdout = self.run(playlist_url_args(url, &self.credentials)).await?;
        Ok(parse_urls(&stdout))
    }
}
