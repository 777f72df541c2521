//! Builder pattern for yt-dlp command lines.
//!
//! Provides a fluent API for constructing the argument vector of a download,
//! plus the smaller argument sets used by the metadata probe and the playlist
//! listing.

use std::path::{Path, PathBuf};

use crate::core::config;

/// Where yt-dlp gets its credentials from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// `--cookies-from-browser <name>`
    Browser(String),
    /// `--cookies <path>`
    CookieFile(PathBuf),
    /// No credentials; the pre-flight probe decides whether that is enough.
    None,
}

impl CredentialSource {
    /// Browser mode wins; otherwise a non-empty cookie file is used.
    pub fn resolve(use_browser: bool, browser: &str, cookie_file: &Path) -> Self {
        if use_browser {
            return CredentialSource::Browser(browser.to_string());
        }
        let non_empty = std::fs::metadata(cookie_file)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if non_empty {
            CredentialSource::CookieFile(cookie_file.to_path_buf())
        } else {
            CredentialSource::None
        }
    }

    pub fn args(&self) -> Vec<String> {
        match self {
            CredentialSource::Browser(browser) => vec!["--cookies-from-browser".to_string(), browser.clone()],
            CredentialSource::CookieFile(path) => {
                vec!["--cookies".to_string(), path.to_string_lossy().into_owned()]
            }
            CredentialSource::None => Vec::new(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            CredentialSource::Browser(browser) => format!("browser cookies ({})", browser),
            CredentialSource::CookieFile(path) => format!("cookie file {}", path.display()),
            CredentialSource::None => "no cookies".to_string(),
        }
    }
}

/// Parses the leading height from a quality string: "720p (HD)" -> 720.
///
/// Falls back to the configured default height when nothing parsable is found.
pub fn parse_quality_height(quality: &str) -> u32 {
    quality
        .split_whitespace()
        .next()
        .map(|token| token.trim_end_matches(['p', 'P']))
        .and_then(|digits| digits.parse::<u32>().ok())
        .filter(|height| *height > 0)
        .unwrap_or(config::download::DEFAULT_QUALITY_HEIGHT)
}

/// yt-dlp format selector: best mp4 video up to `height` plus best m4a audio,
/// falling back to the best single file.
pub fn format_selector(height: u32) -> String {
    format!("bestvideo[height<={}][ext=mp4]+bestaudio[ext=m4a]/best", height)
}

/// Builder for a full download command line.
///
/// # Example
///
/// ```
/// use ytgrab::download::builder::{CredentialSource, DownloadArgsBuilder};
///
/// let args = DownloadArgsBuilder::new("https://youtu.be/abc", "/tmp/out")
///     .quality("720p")
///     .credentials(CredentialSource::None)
///     .build();
/// assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/abc"));
/// ```
pub struct DownloadArgsBuilder {
    url: String,
    target_dir: PathBuf,
    height: u32,
    credentials: CredentialSource,
    embed: bool,
}

impl DownloadArgsBuilder {
    pub fn new(url: &str, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            url: url.to_string(),
            target_dir: target_dir.into(),
            height: config::download::DEFAULT_QUALITY_HEIGHT,
            credentials: CredentialSource::None,
            embed: true,
        }
    }

    /// Set the quality from a user-facing string such as "1080p (Full HD)".
    #[must_use]
    pub fn quality(mut self, quality: &str) -> Self {
        self.height = parse_quality_height(quality);
        self
    }

    #[must_use]
    pub fn height(mut self, height: u32) -> Self {
        self.height = height;
        self
    }

    #[must_use]
    pub fn credentials(mut self, credentials: CredentialSource) -> Self {
        self.credentials = credentials;
        self
    }

    /// Skip thumbnail/metadata/chapter embedding.
    #[must_use]
    pub fn no_embed(mut self) -> Self {
        self.embed = false;
        self
    }

    pub fn build(self) -> Vec<String> {
        let mut args: Vec<String> = vec!["--progress".into(), "--newline".into()];
        args.extend(self.credentials.args());
        if self.embed {
            args.extend([
                "--embed-thumbnail".to_string(),
                "--embed-metadata".to_string(),
                "--embed-chapters".to_string(),
            ]);
        }
        args.push("-f".into());
        args.push(format_selector(self.height));
        args.push("-o".into());
        args.push(
            self.target_dir
                .join(config::download::OUTPUT_TEMPLATE)
                .to_string_lossy()
                .into_owned(),
        );
        args.push("--".into());
        args.push(self.url);
        args
    }
}

/// Metadata-only probe used to check whether a video needs credentials.
pub fn probe_args(url: &str) -> Vec<String> {
    vec!["--dump-json".into(), "--no-download".into(), "--".into(), url.to_string()]
}

/// Flat playlist listing, one `url|title` line per entry.
pub fn playlist_info_args(url: &str, credentials: &CredentialSource) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--flat-playlist".into(),
        "--print".into(),
        config::download::PLAYLIST_PRINT_TEMPLATE.into(),
    ];
    args.extend(credentials.args());
    args.push("--".into());
    args.push(url.to_string());
    args
}

/// Flat playlist listing, one URL per line.
pub fn playlist_url_args(url: &str, credentials: &CredentialSource) -> Vec<String> {
    let mut args: Vec<String> = vec!["--flat-playlist".into(), "--get-url".into()];
    args.extend(credentials.args());
    args.push("--".into());
    args.push(url.to_string());
    args
}
