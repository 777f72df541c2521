use std::fmt;

use thiserror::Error;

use crate::core::retry::Retryable;
use crate::download::ytdlp_errors::is_cookie_expired;

/// Structured error type for download operations.
///
/// Variants are categorized so the retry layer can tell credential failures,
/// fatal rejections and plain transient failures apart.
#[derive(Debug)]
pub enum DownloadError {
    /// Request rejected before anything ran (blank URL, missing folder, ...)
    Validation(String),
    /// A session is already active
    Busy,
    /// The downloader executable could not be started
    Spawn(String),
    /// A helper process exceeded its time budget
    Timeout(String),
    /// Non-zero exit; carries the last meaningful output line
    Process(String),
    /// Credentials are missing or expired (pre-flight probe or a credential error line)
    CredentialRequired(String),
    /// Playlist listing could not be obtained
    PlaylistExpansion(String),
    /// The user stopped the session
    Cancelled,
    /// Catch-all for uncategorized errors
    Other(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Busy => write!(f, "Already downloading"),
            DownloadError::Cancelled => write!(f, "Download cancelled"),
            other => write!(f, "{}", other.message()),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Returns subcategory for logs
    pub fn subcategory(&self) -> &'static str {
        match self {
            DownloadError::Validation(_) => "validation",
            DownloadError::Busy => "busy",
            DownloadError::Spawn(_) => "spawn",
            DownloadError::Timeout(_) => "timeout",
            DownloadError::Process(_) => "process",
            DownloadError::CredentialRequired(_) => "credential",
            DownloadError::PlaylistExpansion(_) => "playlist",
            DownloadError::Cancelled => "cancelled",
            DownloadError::Other(_) => "other",
        }
    }

    /// Returns the inner message
    pub fn message(&self) -> &str {
        match self {
            DownloadError::Validation(msg)
            | DownloadError::Spawn(msg)
            | DownloadError::Timeout(msg)
            | DownloadError::Process(msg)
            | DownloadError::CredentialRequired(msg)
            | DownloadError::PlaylistExpansion(msg)
            | DownloadError::Other(msg) => msg,
            DownloadError::Busy => "Already downloading",
            DownloadError::Cancelled => "Download cancelled",
        }
    }
}

impl Retryable for DownloadError {
    fn is_credential_error(&self) -> bool {
        match self {
            DownloadError::CredentialRequired(_) => true,
            DownloadError::Validation(_) | DownloadError::Busy | DownloadError::Cancelled => false,
            other => is_cookie_expired(other.message()),
        }
    }

    fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::Validation(_) | DownloadError::Busy | DownloadError::Cancelled
        )
    }
}

/// Backwards compatibility: plain strings become `DownloadError::Other`
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        DownloadError::Other(s)
    }
}

impl From<&str> for DownloadError {
    fn from(s: &str) -> Self {
        DownloadError::Other(s.to_string())
    }
}

/// Outcome of a single kill attempt.
///
/// `AlreadyGone` is the expected result when racing a process that exited on
/// its own and is logged at debug level only.
#[derive(Error, Debug)]
pub enum KillError {
    #[error("process already exited")]
    AlreadyGone,
    #[error("permission denied: {0}")]
    Denied(String),
    #[error("unexpected kill failure: {0}")]
    Unexpected(String),
}

impl KillError {
    pub fn from_io(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidInput => KillError::AlreadyGone,
            std::io::ErrorKind::PermissionDenied => KillError::Denied(err.to_string()),
            _ => KillError::Unexpected(err.to_string()),
        }
    }

    /// Logs the failure at a level matching its severity.
    pub fn log(&self, step: &str) {
        match self {
            KillError::AlreadyGone => log::debug!("{}: process already gone", step),
            KillError::Denied(msg) => log::warn!("{}: {}", step, msg),
            KillError::Unexpected(msg) => log::error!("{}: {}", step, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_display() {
        let err = DownloadError::Process("yt-dlp exited with code 1".into());
        assert_eq!(err.to_string(), "yt-dlp exited with code 1");
        assert_eq!(DownloadError::Busy.to_string(), "Already downloading");
    }

    #[test]
    fn test_download_error_subcategory() {
        assert_eq!(DownloadError::Validation("".into()).subcategory(), "validation");
        assert_eq!(DownloadError::Spawn("".into()).subcategory(), "spawn");
        assert_eq!(DownloadError::Timeout("".into()).subcategory(), "timeout");
        assert_eq!(DownloadError::CredentialRequired("".into()).subcategory(), "credential");
        assert_eq!(DownloadError::Cancelled.subcategory(), "cancelled");
        assert_eq!(DownloadError::Other("".into()).subcategory(), "other");
    }

    #[test]
    fn test_from_string() {
        let err: DownloadError = "test error".to_string().into();
        assert!(matches!(err, DownloadError::Other(_)));
        assert_eq!(err.message(), "test error");
    }

    #[test]
    fn test_retry_classification() {
        assert!(DownloadError::CredentialRequired("members only".into()).is_credential_error());
        assert!(DownloadError::Process("ERROR: HTTP Error 403: Forbidden".into()).is_credential_error());
        assert!(!DownloadError::Process("ERROR: Video unavailable".into()).is_credential_error());
        assert!(DownloadError::Cancelled.is_fatal());
        assert!(!DownloadError::Process("exit 1".into()).is_fatal());
    }

    #[test]
    fn test_kill_error_from_io() {
        let gone = std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid argument");
        assert!(matches!(KillError::from_io(gone), KillError::AlreadyGone));
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(KillError::from_io(denied), KillError::Denied(_)));
    }
}
