//! Classification of yt-dlp failure text and source URLs.
//!
//! Decides whether a failure means "credentials expired" (worth a refresh)
//! or something transient, and whether a URL points at a playlist.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use url::Url;

/// Failure text patterns that indicate missing or expired credentials.
/// Matched case-insensitively against the whole error message.
const COOKIE_EXPIRY_PATTERNS: &[&str] = &[
    r"HTTP Error 403.*Forbidden",
    r"Sign in to confirm your age",
    r"This video is only available to Music Premium members",
    r"Members-only content",
    r"membership required",
    r"This video is private",
    r"Video unavailable.*(?:private|member|sign in)",
    r"Cookies.*expired",
    r"Authentication.*failed",
    r"requires? authentication",
    r"Login.*required",
];

static COOKIE_EXPIRY_SET: Lazy<Option<RegexSet>> = Lazy::new(|| {
    let patterns = COOKIE_EXPIRY_PATTERNS.iter().map(|p| format!("(?is){}", p));
    match RegexSet::new(patterns) {
        Ok(set) => Some(set),
        Err(e) => {
            log::error!("Failed to compile cookie expiry patterns: {}", e);
            None
        }
    }
});

static PLAYLIST_URL_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[?&]list=|/playlist(?:[/?#]|$)").ok());

/// Hosts accepted as single-video sources.
const VIDEO_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
    "youtu.be",
];

/// Returns true when the failure text indicates missing or expired credentials.
///
/// A bare "Video unavailable" is not a credential failure; it only counts
/// together with a private/member/sign-in qualifier.
pub fn is_cookie_expired(message: &str) -> bool {
    COOKIE_EXPIRY_SET
        .as_ref()
        .map(|set| set.is_match(message))
        .unwrap_or(false)
}

/// Actionable message shown when credentials are needed.
pub fn credential_guidance() -> &'static str {
    "This video requires you to be signed in (members-only, private or age-restricted). \
     Export fresh YouTube cookies to a cookies.txt file (`ytgrab cookies set <file>`) \
     or enable browser cookies, then try again."
}

/// Returns true if the URL refers to a playlist (`list=` query parameter or `/playlist` path).
pub fn is_playlist_url(url: &str) -> bool {
    PLAYLIST_URL_RE
        .as_ref()
        .map(|re| re.is_match(url))
        .unwrap_or(false)
}

/// Returns true for http(s) URLs on a known YouTube host.
pub fn is_valid_video_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    parsed
        .host_str()
        .map(|host| VIDEO_HOSTS.contains(&host.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
