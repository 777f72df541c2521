use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Extra arguments placed before every yt-dlp invocation
/// Read from YTDL_BIN_ARGS (whitespace separated), e.g. "-m yt_dlp" with YTDL_BIN=python3
pub static YTDL_BIN_ARGS: Lazy<Vec<String>> = Lazy::new(|| {
    env::var("YTDL_BIN_ARGS")
        .map(|raw| raw.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
});

/// Browser to extract cookies from when browser credential mode is enabled
/// Read from YTDL_COOKIES_BROWSER environment variable
/// Supported: chrome, firefox, safari, brave, chromium, edge, opera, vivaldi
///
/// Default: firefox
pub static YTDL_COOKIES_BROWSER: Lazy<String> =
    Lazy::new(|| env::var("YTDL_COOKIES_BROWSER").unwrap_or_else(|_| "firefox".to_string()));

/// Application data directory (cookies.txt, settings.json)
/// Read from YTGRAB_DATA_DIR environment variable
/// Supports tilde (~) expansion for home directory
pub static YTGRAB_DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let raw = env::var("YTGRAB_DATA_DIR").unwrap_or_else(|_| {
        #[cfg(windows)]
        {
            "~/AppData/Local/ytgrab".to_string()
        }
        #[cfg(not(windows))]
        {
            "~/.local/share/ytgrab".to_string()
        }
    });
    PathBuf::from(shellexpand::tilde(&raw).into_owned())
});

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: ytgrab.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "ytgrab.log".to_string()));

/// Path of the persisted cookie file inside the data directory
pub fn cookie_file_path() -> PathBuf {
    YTGRAB_DATA_DIR.join("cookies.txt")
}

/// Path of the persisted settings file inside the data directory
pub fn settings_file_path() -> PathBuf {
    YTGRAB_DATA_DIR.join("settings.json")
}

/// Child process supervision
pub mod process {
    use super::Duration;

    /// Bounded wait for one output line; the read loop re-checks the stop flag on every tick
    pub const READ_POLL_INTERVAL: Duration = Duration::from_secs(1);

    /// Time a process gets to exit after the polite termination request
    pub const GRACEFUL_TERMINATE_TIMEOUT: Duration = Duration::from_secs(3);

    /// Wait between forced kill and the verification check
    pub const KILL_SETTLE_DELAY: Duration = Duration::from_millis(500);

    /// Upper bound for the OS helper commands (taskkill, pkill, pgrep, tasklist)
    pub const KILL_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Poll step while waiting for a child to be reaped
    pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Downloader names swept when it is started through an interpreter
    pub const DOWNLOADER_SWEEP_TARGETS: &[&str] = &["yt-dlp", "yt_dlp"];

    /// Executables swept by name during an immediate stop, besides the downloader itself
    pub const SWEEP_EXTRA_TARGETS: &[&str] = &["ffmpeg"];
}

/// Retry defaults
pub mod retry {
    use super::Duration;

    /// Transient-failure retries after the first attempt
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Delay between transient-failure retries (seconds)
    pub const DEFAULT_RETRY_DELAY_SECS: u64 = 5;

    pub fn default_retry_delay() -> Duration {
        Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)
    }
}

/// Credential refresh round trip
pub mod credentials {
    use super::Duration;

    /// How long the worker waits for the user to answer a refresh request.
    /// No answer counts as "declined".
    pub const REFRESH_RESPONSE_TIMEOUT: Duration = Duration::from_secs(60);
}

/// Download argument defaults
pub mod download {
    use super::Duration;

    /// Used when the quality string carries no parsable height
    pub const DEFAULT_QUALITY_HEIGHT: u32 = 1080;

    /// yt-dlp output template, relative to the target directory
    pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

    /// `--print` template used for playlist listing; url and title separated by '|'
    pub const PLAYLIST_PRINT_TEMPLATE: &str = "%(url)s|%(title)s";

    /// Metadata probe timeout (pre-flight credential check)
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Playlist listing timeout
    pub const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(240);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_files_live_in_data_dir() {
        assert!(cookie_file_path().starts_with(&*YTGRAB_DATA_DIR));
        assert!(settings_file_path().ends_with("settings.json"));
    }

    #[test]
    fn test_read_poll_is_bounded() {
        assert!(process::READ_POLL_INTERVAL <= Duration::from_secs(1));
        assert!(process::KILL_SETTLE_DELAY < process::GRACEFUL_TERMINATE_TIMEOUT);
    }
}
